use std::path::{Path, PathBuf};

use async_trait::async_trait;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use super::cache::FetchCache;
use super::config::{ScrapeConfig, WaitPolicy};
use super::crawl::collect_links;
use super::data_io::{
    check_input_files, check_output_path, export_records, open_output, read_link_files,
    sort_records, write_links,
};
use super::error::{Result, ScrapeError};
use super::session::{ElementHandle, PageSession};
use super::types::{Cli, Command, DriverArgs, FileFormatArg, OutputArgs, SecRecord};
use super::webdriver::{DriverProcess, WebDriverSession, ensure_webdriver};

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = ScrapeConfig {
        waits: WaitPolicy::from(&cli.waits),
        ..ScrapeConfig::default()
    };

    match &cli.command {
        Command::Urls {
            output,
            search_urls,
        } => run_urls(&cli.driver, &config, output, search_urls).await,
        Command::Export {
            output,
            format,
            database,
            link_files,
        } => run_export(&cli.driver, &config, output, *format, database, link_files).await,
    }
}

fn default_log_filter(verbose: u8) -> String {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    format!("warn,fran={level}")
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn output_label(output: &OutputArgs) -> PathBuf {
    output
        .out
        .clone()
        .unwrap_or_else(|| PathBuf::from("<stdout>"))
}

async fn run_urls(
    driver: &DriverArgs,
    config: &ScrapeConfig,
    output: &OutputArgs,
    search_urls: &[String],
) -> Result<()> {
    if let Some(out) = &output.out {
        check_output_path(out, output.force)?;
    }

    let mut session = LazySession::new(driver);
    let collected = collect_links(&mut session, search_urls, config).await;
    session.close().await;
    let links = collected?;

    let writer = open_output(output.out.as_deref(), output.force)?;
    write_links(writer, &links).map_err(|e| ScrapeError::io(output_label(output), e))?;
    info!(links = links.len(), "wrote link list");
    Ok(())
}

async fn run_export(
    driver: &DriverArgs,
    config: &ScrapeConfig,
    output: &OutputArgs,
    format: FileFormatArg,
    database: &Path,
    link_files: &[PathBuf],
) -> Result<()> {
    check_input_files(link_files)?;
    if let Some(out) = &output.out {
        check_output_path(out, output.force)?;
    }

    let links = read_link_files(link_files)?;
    let cache = FetchCache::open(database)?;
    info!(links = links.len(), cache = %cache.dir().display(), "exporting");
    let mut session = LazySession::new(driver);
    let fetched = fetch_records(&cache, &mut session, &links, config).await;
    session.close().await;
    let mut records = fetched?;

    sort_records(&mut records);
    let writer = open_output(output.out.as_deref(), output.force)?;
    export_records(writer, format, &records, &output_label(output))?;
    info!(records = records.len(), format = ?format, "export finished");
    Ok(())
}

async fn fetch_records<S: PageSession + ?Sized>(
    cache: &FetchCache,
    session: &mut S,
    links: &[String],
    config: &ScrapeConfig,
) -> Result<Vec<SecRecord>> {
    let mut records = Vec::with_capacity(links.len());
    for (i, link) in links.iter().enumerate() {
        debug!(%link, n = i + 1, total = links.len(), "record");
        records.push(cache.fetch_record(session, link, config).await?);
    }
    Ok(records)
}

struct ActiveSession {
    session: WebDriverSession,
    // Dropped after the session so the driver outlives it.
    _driver: Option<DriverProcess>,
}

/// Starts the browser on first use, so runs served entirely from the cache
/// never launch one.
struct LazySession<'a> {
    args: &'a DriverArgs,
    active: Option<ActiveSession>,
}

impl<'a> LazySession<'a> {
    fn new(args: &'a DriverArgs) -> Self {
        Self { args, active: None }
    }

    async fn get(&mut self) -> Result<&mut WebDriverSession> {
        let active = match self.active.take() {
            Some(active) => active,
            None => {
                let driver = ensure_webdriver(self.args).await?;
                let session = WebDriverSession::create(
                    &self.args.webdriver_url,
                    self.args.webdriver_browser,
                    self.args.webdriver_headless,
                )
                .await?;
                ActiveSession {
                    session,
                    _driver: driver,
                }
            }
        };
        Ok(&mut self.active.insert(active).session)
    }

    async fn close(self) {
        let Some(active) = self.active else {
            return;
        };
        if let Err(err) = active.session.close().await {
            warn!("closing webdriver session failed: {err}");
        }
    }
}

#[async_trait]
impl PageSession for LazySession<'_> {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.get().await?.navigate(url).await
    }

    async fn find_elements(&mut self, xpath: &str) -> Result<Vec<ElementHandle>> {
        self.get().await?.find_elements(xpath).await
    }

    async fn is_displayed(&mut self, element: &ElementHandle) -> Result<bool> {
        self.get().await?.is_displayed(element).await
    }

    async fn text(&mut self, element: &ElementHandle) -> Result<String> {
        self.get().await?.text(element).await
    }

    async fn attribute(&mut self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        self.get().await?.attribute(element, name).await
    }

    async fn click(&mut self, element: &ElementHandle) -> Result<()> {
        self.get().await?.click(element).await
    }
}
