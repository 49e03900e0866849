//! Master data extraction from one equity detail page.

use tracing::debug;

use super::config::ScrapeConfig;
use super::error::{Result, ScrapeError};
use super::session::{PageSession, first_text, wait_visible};
use super::types::SecRecord;

/// Visits `url` and reads the instrument header plus the master data table.
///
/// The name heading is required; a page without it is a failed extraction.
/// ISIN, symbol and type fall back to empty strings.
pub async fn extract<S: PageSession + ?Sized>(
    session: &mut S,
    url: &str,
    config: &ScrapeConfig,
) -> Result<SecRecord> {
    let sel = &config.detail;

    debug!(url, "navigate");
    session.navigate(url).await?;
    // The page fills in asynchronously after the navigation completes.
    wait_visible(session, &sel.ready, "performance widget", &config.waits).await?;

    let mut rec = SecRecord::new(url);
    rec.name = first_text(session, &sel.name)
        .await?
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ScrapeError::extraction(url, "instrument name not found"))?;
    rec.isin = labeled_text(session, &sel.isin, "ISIN:").await?;
    rec.symbol = labeled_text(session, &sel.symbol, "Symbol:").await?;
    rec.kind = labeled_text(session, &sel.kind, "Type:").await?;

    let labels = texts(session, &sel.labels).await?;
    let values = texts(session, &sel.values).await?;
    if labels.len() != values.len() {
        return Err(ScrapeError::extraction(
            url,
            format!(
                "master data table has {} labels but {} values",
                labels.len(),
                values.len()
            ),
        ));
    }
    for (label, value) in labels.iter().zip(values) {
        rec.master.insert(master_key(label), value.trim().to_string());
    }

    debug!(url, name = %rec.name, fields = rec.master.len(), "extracted");
    Ok(rec)
}

async fn labeled_text<S: PageSession + ?Sized>(
    session: &mut S,
    xpath: &str,
    label: &str,
) -> Result<String> {
    Ok(first_text(session, xpath)
        .await?
        .map(|raw| strip_label(&raw, label))
        .unwrap_or_default())
}

async fn texts<S: PageSession + ?Sized>(session: &mut S, xpath: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for element in session.find_elements(xpath).await? {
        out.push(session.text(&element).await?);
    }
    Ok(out)
}

/// `"| Symbol: BAS"` → `"BAS"`.
pub fn strip_label(raw: &str, label: &str) -> String {
    let text = raw.trim();
    let text = text.strip_prefix('|').unwrap_or(text).trim();
    let text = text.strip_prefix(label).unwrap_or(text).trim();
    text.to_string()
}

pub fn master_key(label: &str) -> String {
    label.trim().to_lowercase()
}
