//! W3C WebDriver backend for [`PageSession`], plus starting a local driver
//! process when none is listening.

use std::fs::{self, File};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{Value, json};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use url::Url;

use super::error::{Result, ScrapeError};
use super::session::{ElementHandle, PageSession};
use super::types::{BrowserArg, DriverArgs};

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

pub struct WebDriverSession {
    client: reqwest::Client,
    endpoint: String,
    session_id: String,
    // Chrome user data dir; removed on drop, after the session is deleted.
    _profile: Option<TempDir>,
}

impl WebDriverSession {
    pub async fn create(endpoint: &str, browser: BrowserArg, headless: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ScrapeError::Http {
                command: "client build".to_string(),
                source: e,
            })?;
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let profile = browser_profile_dir(browser)?;
        let value = send_command(
            &client,
            Method::POST,
            &format!("{endpoint}/session"),
            "session create",
            Some(webdriver_capabilities(
                browser,
                headless,
                profile.as_ref().map(TempDir::path),
            )),
        )
        .await?;

        let session_id = value
            .pointer("/sessionId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ScrapeError::WebDriver {
                command: "session create".to_string(),
                error: "invalid response".to_string(),
                message: format!(
                    "session id missing in response: {}",
                    truncate_for_log(&value.to_string(), 220)
                ),
            })?;
        info!(%endpoint, %session_id, browser = ?browser, "webdriver session created");

        Ok(Self {
            client,
            endpoint,
            session_id,
            _profile: profile,
        })
    }

    pub async fn close(self) -> Result<()> {
        let url = format!("{}/session/{}", self.endpoint, self.session_id);
        send_command(&self.client, Method::DELETE, &url, "session delete", None).await?;
        debug!(session_id = %self.session_id, "webdriver session deleted");
        Ok(())
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        command: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let url = format!("{}/session/{}{}", self.endpoint, self.session_id, path);
        send_command(&self.client, method, &url, command, body).await
    }

    async fn element_call(
        &self,
        method: Method,
        element: &ElementHandle,
        suffix: &str,
        command: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        self.call(method, &format!("/element/{}{suffix}", element.0), command, body)
            .await
    }
}

/// Sends one WebDriver command and returns the `value` member of the reply.
async fn send_command(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    command: &str,
    body: Option<Value>,
) -> Result<Value> {
    let mut req = client.request(method, url);
    if let Some(body) = body {
        req = req.json(&body);
    }
    let http_err = |e: reqwest::Error| ScrapeError::Http {
        command: command.to_string(),
        source: e,
    };
    let res = req.send().await.map_err(http_err)?;
    let status = res.status();
    let body = res.text().await.map_err(http_err)?;

    let mut value: Value = serde_json::from_str(&body).unwrap_or_default();
    if let Some(err) = value.pointer("/value/error").and_then(|v| v.as_str()) {
        let message = value
            .pointer("/value/message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown webdriver error");
        return Err(ScrapeError::WebDriver {
            command: command.to_string(),
            error: err.to_string(),
            message: message.to_string(),
        });
    }
    if !status.is_success() {
        return Err(ScrapeError::WebDriver {
            command: command.to_string(),
            error: format!("HTTP {}", status.as_u16()),
            message: truncate_for_log(&body, 260),
        });
    }
    Ok(value.get_mut("value").map(Value::take).unwrap_or_default())
}

#[async_trait]
impl PageSession for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.call(Method::POST, "/url", "navigate", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn find_elements(&mut self, xpath: &str) -> Result<Vec<ElementHandle>> {
        let value = self
            .call(
                Method::POST,
                "/elements",
                "find elements",
                Some(json!({ "using": "xpath", "value": xpath })),
            )
            .await?;
        Ok(value
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|el| el.get(ELEMENT_KEY).and_then(|id| id.as_str()))
                    .map(|id| ElementHandle(id.to_string()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default())
    }

    async fn is_displayed(&mut self, element: &ElementHandle) -> Result<bool> {
        let value = self
            .element_call(Method::GET, element, "/displayed", "element displayed", None)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn text(&mut self, element: &ElementHandle) -> Result<String> {
        let value = self
            .element_call(Method::GET, element, "/text", "element text", None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(&mut self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        let value = self
            .element_call(
                Method::GET,
                element,
                &format!("/attribute/{name}"),
                "element attribute",
                None,
            )
            .await?;
        Ok(value.as_str().map(|s| s.to_string()))
    }

    async fn click(&mut self, element: &ElementHandle) -> Result<()> {
        self.element_call(Method::POST, element, "/click", "element click", Some(json!({})))
            .await?;
        Ok(())
    }
}

/// A fresh user data dir for browsers that need one, so runs never share
/// browser state.
fn browser_profile_dir(browser: BrowserArg) -> Result<Option<TempDir>> {
    if browser != BrowserArg::Chrome {
        return Ok(None);
    }
    let prefix = format!(
        "fran-chrome-profile-{}-{}-",
        std::process::id(),
        Utc::now().timestamp_millis()
    );
    let dir = tempfile::Builder::new()
        .prefix(&prefix)
        .tempdir()
        .map_err(|e| ScrapeError::io(std::env::temp_dir(), e))?;
    debug!(path = %dir.path().display(), "chrome profile dir");
    Ok(Some(dir))
}

pub fn webdriver_capabilities(
    browser: BrowserArg,
    headless: bool,
    profile: Option<&Path>,
) -> Value {
    match browser {
        BrowserArg::Firefox => {
            let mut args = Vec::<String>::new();
            if headless {
                args.push("-headless".to_string());
            }
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "firefox",
                        "acceptInsecureCerts": true,
                        "moz:firefoxOptions": { "args": args }
                    }
                }
            })
        }
        BrowserArg::Edge => {
            let mut args = Vec::<String>::new();
            if headless {
                args.push("--headless=new".to_string());
            }
            args.push("--window-size=1400,1200".to_string());
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "MicrosoftEdge",
                        "acceptInsecureCerts": true,
                        "ms:edgeOptions": { "args": args }
                    }
                }
            })
        }
        BrowserArg::Safari => json!({
            "capabilities": {
                "alwaysMatch": { "browserName": "safari" }
            }
        }),
        BrowserArg::Chrome => {
            let mut args = Vec::<String>::new();
            if let Some(profile) = profile {
                args.push(format!("--user-data-dir={}", profile.display()));
            }
            if headless {
                args.push("--headless=new".to_string());
            }
            args.push("--window-size=1400,1200".to_string());
            args.push("--disable-gpu".to_string());
            args.push("--disable-dev-shm-usage".to_string());
            args.push("--no-first-run".to_string());
            args.push("--no-default-browser-check".to_string());
            args.push("--disable-blink-features=AutomationControlled".to_string());
            if !cfg!(target_os = "macos") {
                args.push("--no-sandbox".to_string());
            }
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "chrome",
                        "acceptInsecureCerts": true,
                        "goog:chromeOptions": {
                            "args": args,
                            "excludeSwitches": ["enable-automation"]
                        }
                    }
                }
            })
        }
    }
}

pub fn truncate_for_log(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "..."
}

/// A driver process this run started; killed on drop.
pub struct DriverProcess(Child);

impl Drop for DriverProcess {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn webdriver_reachable(endpoint: &str) -> bool {
    let Ok(parsed) = Url::parse(endpoint) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let port = parsed.port_or_known_default().unwrap_or(9515);
    let Ok(addrs) = (host, port).to_socket_addrs() else {
        return false;
    };
    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, Duration::from_secs(2)).is_ok())
}

/// Makes sure something answers at `--webdriver-url`, starting a local
/// driver binary when allowed. The returned process must outlive the session.
pub async fn ensure_webdriver(args: &DriverArgs) -> Result<Option<DriverProcess>> {
    let endpoint = args.webdriver_url.as_str();
    if webdriver_reachable(endpoint) {
        debug!(endpoint, "webdriver reachable");
        return Ok(None);
    }
    if args.no_webdriver_autostart {
        return Err(ScrapeError::Driver(format!(
            "nothing listening at {endpoint} and autostart is disabled"
        )));
    }
    start_webdriver(args).await.map(Some)
}

async fn start_webdriver(args: &DriverArgs) -> Result<DriverProcess> {
    let endpoint = args.webdriver_url.as_str();
    let parsed = Url::parse(endpoint)
        .map_err(|e| ScrapeError::Driver(format!("invalid webdriver url {endpoint}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ScrapeError::Driver(format!("webdriver url has no host: {endpoint}")))?
        .to_ascii_lowercase();
    if host != "localhost" && host != "127.0.0.1" {
        return Err(ScrapeError::Driver(format!(
            "{endpoint} is unreachable and autostart only supports localhost endpoints"
        )));
    }
    let port = parsed.port_or_known_default().unwrap_or(9515);
    let binary = args
        .webdriver_binary
        .clone()
        .unwrap_or_else(|| default_driver_binary(args.webdriver_browser).to_string());

    let log_path = webdriver_log_path(port);
    let log_file = File::options()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&log_path)
        .map_err(|e| ScrapeError::io(&log_path, e))?;
    let log_file_err = log_file
        .try_clone()
        .map_err(|e| ScrapeError::io(&log_path, e))?;

    let spawned = {
        let mut cmd = Command::new(&binary);
        configure_webdriver_command(&mut cmd, &binary, args.webdriver_browser, port);
        cmd.stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .stdin(Stdio::null());
        cmd.spawn()
    };
    let mut child = DriverProcess(
        spawned.map_err(|e| ScrapeError::Driver(format!("failed to spawn {binary}: {e}")))?,
    );
    info!(%binary, port, log = %log_path.display(), "started webdriver");

    let steps = (args.webdriver_start_timeout_ms / 200).max(1);
    for _ in 0..steps {
        if webdriver_reachable(endpoint) {
            return Ok(child);
        }
        if let Ok(Some(status)) = child.0.try_wait() {
            let mut reason = format!(
                "{binary} exited early with status {status} (log: {})",
                log_path.display()
            );
            if let Some(tail) = read_log_tail(&log_path, 30) {
                reason = format!("{reason}; tail: {tail}");
            }
            return Err(ScrapeError::Driver(reason));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    warn!(%binary, log = %log_path.display(), "webdriver did not become ready");
    let mut reason = format!(
        "{binary} did not become ready in time (log: {})",
        log_path.display()
    );
    if let Some(tail) = read_log_tail(&log_path, 30) {
        reason = format!("{reason}; tail: {tail}");
    }
    Err(ScrapeError::Driver(reason))
}

fn default_driver_binary(browser: BrowserArg) -> &'static str {
    match browser {
        BrowserArg::Chrome => "chromedriver",
        BrowserArg::Firefox => "geckodriver",
        BrowserArg::Edge => "msedgedriver",
        BrowserArg::Safari => "safaridriver",
    }
}

fn configure_webdriver_command(cmd: &mut Command, bin: &str, browser: BrowserArg, port: u16) {
    let lower = bin.to_ascii_lowercase();
    if matches!(browser, BrowserArg::Safari | BrowserArg::Firefox)
        || lower.contains("safaridriver")
        || lower.contains("geckodriver")
    {
        cmd.arg("--port").arg(port.to_string());
        return;
    }
    cmd.arg(format!("--port={port}"));
    if lower.contains("chromedriver") {
        cmd.arg("--log-level=SEVERE");
    }
}

fn webdriver_log_path(port: u16) -> PathBuf {
    std::env::temp_dir().join(format!("fran-webdriver-{port}.log"))
}

fn read_log_tail(path: &Path, lines: usize) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    let mut tail = text.lines().rev().take(lines.max(1)).collect::<Vec<_>>();
    tail.reverse();
    let tail = tail.join(" | ");
    if tail.is_empty() { None } else { Some(tail) }
}
