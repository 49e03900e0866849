use std::time::Duration;

use super::types::WaitArgs;

const RESULT_TABLE: &str =
    "//app-equity-search-result-table//div[contains(@class, 'table-responsive')]";
const ACTIVE_PAGE_BUTTON: &str = "//app-page-bar[1]//button[contains(@class, 'active') and contains(@class, 'page-bar-type-button-width-auto')]";

/// XPath expressions for the equity search listing.
#[derive(Debug, Clone)]
pub struct SearchSelectors {
    pub results_table: String,
    pub result_links: String,
    pub loading: String,
    pub page_size: String,
    pub next_page: String,
}

impl Default for SearchSelectors {
    fn default() -> Self {
        Self {
            results_table: RESULT_TABLE.to_string(),
            result_links: format!("{RESULT_TABLE}//tbody//tr//td[1]//a"),
            loading: "//app-loading-spinner".to_string(),
            page_size: "//app-page-bar//button[contains(text(), '100')]".to_string(),
            next_page: format!(
                "{ACTIVE_PAGE_BUTTON}/following-sibling::button[contains(@class, 'page-bar-type-button-width-auto')][1]"
            ),
        }
    }
}

/// XPath expressions for an equity detail page.
#[derive(Debug, Clone)]
pub struct DetailSelectors {
    pub ready: String,
    pub name: String,
    pub isin: String,
    pub symbol: String,
    pub kind: String,
    pub labels: String,
    pub values: String,
}

impl Default for DetailSelectors {
    fn default() -> Self {
        let master = "//app-widget-equity-master-data//div[contains(@class, 'table-responsive')]//tbody//tr";
        Self {
            ready: "//app-widget-performance//div[contains(@class, 'table-responsive')]".to_string(),
            name: "//h1[contains(@class, 'instrument-name')]".to_string(),
            isin: "//span[contains(text(), 'ISIN:')]".to_string(),
            symbol: "//span[contains(text(), 'Symbol:')]".to_string(),
            kind: "//span[contains(text(), 'Type:')]".to_string(),
            labels: format!("{master}/td[1]"),
            values: format!("{master}/td[2]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    /// `None` waits for page-ready signals indefinitely.
    pub ready_timeout: Option<Duration>,
    /// Expiry means "not there", not failure.
    pub probe_timeout: Duration,
}

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            ready_timeout: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl From<&WaitArgs> for WaitPolicy {
    fn from(args: &WaitArgs) -> Self {
        Self {
            poll_interval: Duration::from_millis(args.poll_interval_ms.max(1)),
            ready_timeout: args.ready_timeout_ms.map(Duration::from_millis),
            probe_timeout: Duration::from_millis(args.probe_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScrapeConfig {
    pub search: SearchSelectors,
    pub detail: DetailSelectors,
    pub waits: WaitPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_args_map_onto_policy() {
        let args = WaitArgs {
            probe_timeout_ms: 1500,
            poll_interval_ms: 0,
            ready_timeout_ms: Some(60_000),
        };
        let policy = WaitPolicy::from(&args);
        assert_eq!(policy.probe_timeout, Duration::from_millis(1500));
        assert_eq!(policy.poll_interval, Duration::from_millis(1));
        assert_eq!(policy.ready_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn default_probe_is_three_seconds_and_ready_waits_are_unbounded() {
        let policy = WaitPolicy::default();
        assert_eq!(policy.probe_timeout, Duration::from_secs(3));
        assert!(policy.ready_timeout.is_none());
    }

    #[test]
    fn next_page_follows_the_active_button() {
        let sel = SearchSelectors::default();
        assert!(sel.next_page.contains("contains(@class, 'active')"));
        assert!(sel.next_page.ends_with("[1]"));
        assert!(sel.result_links.starts_with(&sel.results_table));
    }
}
