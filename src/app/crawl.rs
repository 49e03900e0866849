//! Link collection: walks every page of an equity search listing.

use std::collections::BTreeSet;

use tracing::{debug, info};
use url::Url;

use super::config::ScrapeConfig;
use super::error::{Result, ScrapeError};
use super::session::{PageSession, probe, wait_not_present, wait_reload, wait_visible};

/// Collects the detail-page links of every result page of every search URL.
///
/// The session is reused across search URLs, so cookies and the selected
/// page size carry over. Any required wait or read failure aborts the whole
/// collection; the caller gets either every link or an error.
pub async fn collect_links<S: PageSession + ?Sized>(
    session: &mut S,
    search_urls: &[String],
    config: &ScrapeConfig,
) -> Result<BTreeSet<String>> {
    let mut links = BTreeSet::new();
    for search_url in search_urls {
        let base = parse_search_url(search_url)?;
        let before = links.len();
        let pages = collect_search(session, &base, config, &mut links).await?;
        info!(
            search_url = %base,
            pages,
            new_links = links.len() - before,
            "collected search results"
        );
    }
    Ok(links)
}

fn parse_search_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| ScrapeError::invalid_url(raw, e))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ScrapeError::invalid_url(
            raw,
            "search url must be an absolute http(s) url",
        ));
    }
    Ok(url)
}

async fn collect_search<S: PageSession + ?Sized>(
    session: &mut S,
    base: &Url,
    config: &ScrapeConfig,
    links: &mut BTreeSet<String>,
) -> Result<usize> {
    let sel = &config.search;
    let waits = &config.waits;

    debug!(url = %base, "navigate");
    session.navigate(base.as_str()).await?;
    wait_visible(session, &sel.results_table, "search results", waits).await?;
    wait_not_present(session, &sel.loading, "loading indicator to clear", waits).await?;

    // Listings too short for a page bar have no page-size control.
    if let Some(page_size) = probe(session, &sel.page_size, waits).await?.into_iter().next() {
        session.click(&page_size).await?;
        wait_reload(session, &sel.loading, waits).await?;
    } else {
        debug!(url = %base, "no page size control");
    }

    let mut pages = 0usize;
    loop {
        pages += 1;
        for anchor in session.find_elements(&sel.result_links).await? {
            let Some(href) = session.attribute(&anchor, "href").await? else {
                continue;
            };
            if let Some(link) = normalize_link(base, &href) {
                links.insert(link);
            }
        }

        let Some(next) = probe(session, &sel.next_page, waits).await?.into_iter().next() else {
            break;
        };
        debug!(url = %base, page = pages + 1, "next page");
        session.click(&next).await?;
        wait_reload(session, &sel.loading, waits).await?;
    }

    Ok(pages)
}

/// Resolves `href` against the search page's `scheme://host` root and drops
/// the fragment.
///
/// Relative hrefs, with or without a leading `/`, end up as
/// `scheme://host/` + href; absolute ones are kept as they are. Blank or
/// unparsable hrefs yield `None`.
pub fn normalize_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut root = base.clone();
    root.set_path("/");
    root.set_query(None);
    root.set_fragment(None);
    let mut url = root.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}
