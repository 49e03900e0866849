use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Debug, Parser, Clone)]
#[command(
    name = "fran",
    version,
    about = "Collect equity master data from Börse Frankfurt through a WebDriver browser"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub driver: DriverArgs,

    #[command(flatten)]
    pub waits: WaitArgs,

    /// Raise log verbosity from warn (-v info, -vv debug, -vvv trace). RUST_LOG wins when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Collects detail page urls from search results.
    #[command(
        after_help = "Example:\n  fran urls --out eu.txt --force \"https://www.boerse-frankfurt.de/equities/search?REGIONS=Europe&TYPE=1002&FORM=2&MARKET=REGULATED&ORDER_BY=NAME&ORDER_DIRECTION=ASC\""
    )]
    Urls {
        #[command(flatten)]
        output: OutputArgs,

        #[arg(value_name = "SEARCH_URL", required = true)]
        search_urls: Vec<String>,
    },

    /// Downloads master data for the urls in link files and exports it.
    #[command(after_help = "Example:\n  fran export --format csv --out eu.csv --force eu.txt")]
    Export {
        #[command(flatten)]
        output: OutputArgs,

        #[arg(long, value_enum, default_value_t = FileFormatArg::Csv)]
        format: FileFormatArg,

        /// Directory where downloaded records are saved and cached.
        #[arg(long, value_name = "DIR", default_value = "frandb")]
        database: PathBuf,

        #[arg(value_name = "LINK_FILE", required = true)]
        link_files: Vec<PathBuf>,
    },
}

#[derive(Debug, Args, Clone)]
pub struct OutputArgs {
    /// Output file. Standard output when omitted.
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Overwrite the output file if it already exists.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Args, Clone)]
pub struct DriverArgs {
    #[arg(
        long,
        value_name = "URL",
        default_value = "http://localhost:9515",
        global = true
    )]
    pub webdriver_url: String,

    #[arg(long, value_enum, default_value_t = BrowserArg::Chrome, global = true)]
    pub webdriver_browser: BrowserArg,

    #[arg(long, default_value_t = false, global = true)]
    pub webdriver_headless: bool,

    #[arg(long, value_name = "PATH", global = true)]
    pub webdriver_binary: Option<String>,

    #[arg(long, default_value_t = false, global = true)]
    pub no_webdriver_autostart: bool,

    #[arg(long, value_name = "MS", default_value_t = 12000, global = true)]
    pub webdriver_start_timeout_ms: u64,
}

#[derive(Debug, Args, Clone)]
pub struct WaitArgs {
    /// How long to look for an optional control (next page, page size) before treating it as absent.
    #[arg(long, value_name = "MS", default_value_t = 3000, global = true)]
    pub probe_timeout_ms: u64,

    /// Delay between DOM polls. A loading indicator that shows and clears
    /// between polls goes unseen, and the wait for it only ends at
    /// --ready-timeout-ms.
    #[arg(long, value_name = "MS", default_value_t = 100, global = true)]
    pub poll_interval_ms: u64,

    /// Give up on page-ready signals after this long. Waits forever when
    /// omitted, which includes a loading indicator missed between polls.
    #[arg(long, value_name = "MS", global = true)]
    pub ready_timeout_ms: Option<u64>,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum BrowserArg {
    Chrome,
    Firefox,
    Edge,
    Safari,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum FileFormatArg {
    Csv,
    Json,
}

/// Master data of one listed security, as persisted in the cache directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecRecord {
    url: String,
    pub isin: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub master: BTreeMap<String, String>,
}

impl SecRecord {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            isin: String::new(),
            symbol: String::new(),
            kind: String::new(),
            name: String::new(),
            master: BTreeMap::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Missing labels read as empty.
    pub fn master_value(&self, label: &str) -> &str {
        self.master.get(label).map(String::as_str).unwrap_or_default()
    }
}
