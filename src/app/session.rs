//! The browser page the scraper drives, and the synchronization points it
//! waits on before reading DOM state.
//!
//! A [`PageSession`] is one stateful tab. Every operation takes `&mut self`
//! so navigation stays strictly sequential; callers own the session for the
//! whole run and hand it down by reference.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::trace;

use super::config::WaitPolicy;
use super::error::{Result, ScrapeError};

/// Opaque reference to an element of the currently loaded page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

#[async_trait]
pub trait PageSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// All elements matching `xpath`; empty when nothing matches.
    async fn find_elements(&mut self, xpath: &str) -> Result<Vec<ElementHandle>>;

    async fn is_displayed(&mut self, element: &ElementHandle) -> Result<bool>;

    async fn text(&mut self, element: &ElementHandle) -> Result<String>;

    async fn attribute(&mut self, element: &ElementHandle, name: &str) -> Result<Option<String>>;

    async fn click(&mut self, element: &ElementHandle) -> Result<()>;
}

struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    fn start(limit: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    fn check(&self, what: &str, xpath: &str) -> Result<()> {
        match self.limit {
            Some(limit) if self.started.elapsed() >= limit => Err(ScrapeError::WaitTimeout {
                what: what.to_string(),
                xpath: xpath.to_string(),
                elapsed: self.started.elapsed(),
            }),
            _ => Ok(()),
        }
    }
}

async fn any_displayed<S: PageSession + ?Sized>(session: &mut S, xpath: &str) -> Result<bool> {
    for element in session.find_elements(xpath).await? {
        match session.is_displayed(&element).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) if err.is_stale_element() => {}
            Err(err) => return Err(err),
        }
    }
    Ok(false)
}

/// Blocks until an element matching `xpath` is displayed.
pub async fn wait_visible<S: PageSession + ?Sized>(
    session: &mut S,
    xpath: &str,
    what: &str,
    policy: &WaitPolicy,
) -> Result<()> {
    let deadline = Deadline::start(policy.ready_timeout);
    loop {
        if any_displayed(session, xpath).await? {
            trace!(what, "visible");
            return Ok(());
        }
        deadline.check(what, xpath)?;
        tokio::time::sleep(policy.poll_interval).await;
    }
}

/// Blocks until at least one element matches `xpath`.
pub async fn wait_present<S: PageSession + ?Sized>(
    session: &mut S,
    xpath: &str,
    what: &str,
    policy: &WaitPolicy,
) -> Result<()> {
    let deadline = Deadline::start(policy.ready_timeout);
    loop {
        if !session.find_elements(xpath).await?.is_empty() {
            trace!(what, "present");
            return Ok(());
        }
        deadline.check(what, xpath)?;
        tokio::time::sleep(policy.poll_interval).await;
    }
}

/// Blocks until nothing matches `xpath`.
pub async fn wait_not_present<S: PageSession + ?Sized>(
    session: &mut S,
    xpath: &str,
    what: &str,
    policy: &WaitPolicy,
) -> Result<()> {
    let deadline = Deadline::start(policy.ready_timeout);
    loop {
        if session.find_elements(xpath).await?.is_empty() {
            trace!(what, "gone");
            return Ok(());
        }
        deadline.check(what, xpath)?;
        tokio::time::sleep(policy.poll_interval).await;
    }
}

/// Waits for an async reload: the loading indicator shows up, then goes away.
///
/// An indicator that comes and goes between two polls is never seen; without
/// `ready_timeout` this then waits forever.
pub async fn wait_reload<S: PageSession + ?Sized>(
    session: &mut S,
    loading_xpath: &str,
    policy: &WaitPolicy,
) -> Result<()> {
    wait_present(session, loading_xpath, "loading indicator", policy).await?;
    wait_not_present(session, loading_xpath, "loading indicator to clear", policy).await
}

/// Looks for an optional element for at most `policy.probe_timeout`.
///
/// Running out of time is the normal "absent" answer and yields an empty
/// list. Session errors still propagate.
pub async fn probe<S: PageSession + ?Sized>(
    session: &mut S,
    xpath: &str,
    policy: &WaitPolicy,
) -> Result<Vec<ElementHandle>> {
    let search = async {
        loop {
            let found = session.find_elements(xpath).await?;
            if !found.is_empty() {
                return Ok::<_, ScrapeError>(found);
            }
            tokio::time::sleep(policy.poll_interval).await;
        }
    };
    match tokio::time::timeout(policy.probe_timeout, search).await {
        Ok(found) => found,
        Err(_) => Ok(Vec::new()),
    }
}

/// Trimmed text of the first element matching `xpath`; `None` when nothing matches.
pub async fn first_text<S: PageSession + ?Sized>(
    session: &mut S,
    xpath: &str,
) -> Result<Option<String>> {
    let Some(element) = session.find_elements(xpath).await?.into_iter().next() else {
        return Ok(None);
    };
    Ok(Some(session.text(&element).await?.trim().to_string()))
}
