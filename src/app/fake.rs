//! Scripted in-memory page session for tests.
//!
//! Selectors are plain words (see [`test_config`]); the fake answers them
//! from per-URL fixtures and simulates the loading spinner that follows a
//! page-size or next-page click.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::config::{DetailSelectors, ScrapeConfig, SearchSelectors, WaitPolicy};
use super::error::{Result, ScrapeError};
use super::session::{ElementHandle, PageSession};

pub fn test_config() -> ScrapeConfig {
    ScrapeConfig {
        search: SearchSelectors {
            results_table: "results".to_string(),
            result_links: "links".to_string(),
            loading: "spinner".to_string(),
            page_size: "page-size".to_string(),
            next_page: "next".to_string(),
        },
        detail: DetailSelectors {
            ready: "perf".to_string(),
            name: "name".to_string(),
            isin: "isin".to_string(),
            symbol: "symbol".to_string(),
            kind: "type".to_string(),
            labels: "labels".to_string(),
            values: "values".to_string(),
        },
        waits: WaitPolicy {
            poll_interval: Duration::from_millis(2),
            ready_timeout: Some(Duration::from_secs(2)),
            probe_timeout: Duration::from_millis(30),
        },
    }
}

struct FakeSearch {
    pages: Vec<Vec<String>>,
    page_bar: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeDetail {
    pub name: Option<String>,
    pub isin: Option<String>,
    pub symbol: Option<String>,
    pub kind: Option<String>,
    pub labels: Vec<String>,
    pub values: Vec<String>,
}

#[derive(Default)]
pub struct FakeSession {
    searches: HashMap<String, FakeSearch>,
    details: HashMap<String, FakeDetail>,
    current: Option<String>,
    page: usize,
    reloading: bool,
    pub navigations: Vec<String>,
    pub clicks: Vec<String>,
}

fn handle(id: impl Into<String>) -> ElementHandle {
    ElementHandle(id.into())
}

fn indexed(prefix: &str, count: usize) -> Vec<ElementHandle> {
    (0..count).map(|i| handle(format!("{prefix}:{i}"))).collect()
}

impl FakeSession {
    /// A search listing whose result pages hold the given hrefs.
    pub fn with_search(mut self, url: &str, pages: Vec<Vec<&str>>) -> Self {
        let page_bar = !pages.iter().all(Vec::is_empty);
        self.searches.insert(
            url.to_string(),
            FakeSearch {
                pages: pages
                    .into_iter()
                    .map(|page| page.into_iter().map(str::to_string).collect())
                    .collect(),
                page_bar,
            },
        );
        self
    }

    pub fn with_detail(mut self, url: &str, detail: FakeDetail) -> Self {
        self.details.insert(url.to_string(), detail);
        self
    }

    fn search(&self) -> Option<&FakeSearch> {
        self.current.as_ref().and_then(|url| self.searches.get(url))
    }

    fn detail(&self) -> Option<&FakeDetail> {
        self.current.as_ref().and_then(|url| self.details.get(url))
    }

    fn current_page(&self) -> &[String] {
        self.search()
            .and_then(|search| search.pages.get(self.page))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn lookup_text(&self, id: &str) -> Option<String> {
        let detail = self.detail()?;
        match id.split_once(':') {
            Some(("label", i)) => detail.labels.get(i.parse::<usize>().ok()?).cloned(),
            Some(("value", i)) => detail.values.get(i.parse::<usize>().ok()?).cloned(),
            _ => match id {
                "name" => detail.name.clone(),
                "isin" => detail.isin.clone(),
                "symbol" => detail.symbol.clone(),
                "type" => detail.kind.clone(),
                _ => None,
            },
        }
    }
}

fn no_such_element(id: &str) -> ScrapeError {
    ScrapeError::WebDriver {
        command: "element".to_string(),
        error: "no such element".to_string(),
        message: format!("unknown element {id}"),
    }
}

#[async_trait]
impl PageSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.navigations.push(url.to_string());
        if !self.searches.contains_key(url) && !self.details.contains_key(url) {
            return Err(ScrapeError::WebDriver {
                command: "navigate".to_string(),
                error: "unknown error".to_string(),
                message: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            });
        }
        self.current = Some(url.to_string());
        self.page = 0;
        self.reloading = false;
        Ok(())
    }

    async fn find_elements(&mut self, xpath: &str) -> Result<Vec<ElementHandle>> {
        let found = match xpath {
            "results" if self.search().is_some() => vec![handle("results")],
            "spinner" if self.reloading => {
                self.reloading = false;
                vec![handle("spinner")]
            }
            "page-size" if self.search().is_some_and(|s| s.page_bar) => {
                vec![handle("page-size")]
            }
            "next" if self.search().is_some_and(|s| self.page + 1 < s.pages.len()) => {
                vec![handle("next")]
            }
            "links" => indexed("link", self.current_page().len()),
            "perf" if self.detail().is_some() => vec![handle("perf")],
            "name" | "isin" | "symbol" | "type" if self.lookup_text(xpath).is_some() => {
                vec![handle(xpath)]
            }
            "labels" => indexed("label", self.detail().map_or(0, |d| d.labels.len())),
            "values" => indexed("value", self.detail().map_or(0, |d| d.values.len())),
            _ => Vec::new(),
        };
        Ok(found)
    }

    async fn is_displayed(&mut self, _element: &ElementHandle) -> Result<bool> {
        Ok(true)
    }

    async fn text(&mut self, element: &ElementHandle) -> Result<String> {
        self.lookup_text(&element.0)
            .ok_or_else(|| no_such_element(&element.0))
    }

    async fn attribute(&mut self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        let Some(("link", i)) = element.0.split_once(':') else {
            return Ok(None);
        };
        if name != "href" {
            return Ok(None);
        }
        let index = i.parse::<usize>().map_err(|_| no_such_element(&element.0))?;
        Ok(self.current_page().get(index).cloned())
    }

    async fn click(&mut self, element: &ElementHandle) -> Result<()> {
        self.clicks.push(element.0.clone());
        match element.0.as_str() {
            "page-size" => self.reloading = true,
            "next" => {
                self.page += 1;
                self.reloading = true;
            }
            other => return Err(no_such_element(other)),
        }
        Ok(())
    }
}
