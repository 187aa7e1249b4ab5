//! Environment and connectivity checks behind `sleuth doctor`.
//!
//! Each check produces a [`CheckResult`]; failures carry a suggestion for
//! the usual causes (missing key, proxy, blocked endpoint, TLS interception).

use crate::brain::{InvokeOptions, LlmClient};
use crate::config::{LlmConfig, SleuthConfig};
use crate::error::{ConfigError, SleuthError};
use crate::providers::{create_provider, gemini::DEFAULT_BASE_URL};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Proxy variables honoured by the HTTP client.
pub const PROXY_VARS: [&str; 4] = ["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"];

/// Endpoint used to tell general connectivity apart from an API-specific block.
pub const CONNECTIVITY_PROBE_URL: &str = "https://www.google.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

impl CheckStatus {
    fn symbol(self) -> &'static str {
        match self {
            CheckStatus::Pass => "ok  ",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Skipped => "skip",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
            suggestion: None,
        }
    }

    fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticReport {
    pub checks: Vec<CheckResult>,
}

impl DiagnosticReport {
    pub fn push(&mut self, check: CheckResult) {
        debug!(check = check.name.as_str(), status = ?check.status, "Diagnostic check");
        self.checks.push(check);
    }

    pub fn has_failures(&self) -> bool {
        self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    /// Human-readable report with a suggestions section.
    pub fn render(&self) -> String {
        let mut out = String::from("Sleuth Doctor\n==============================\n");
        for check in &self.checks {
            out.push_str(&format!(
                "  [{}] {:<14} {}\n",
                check.status.symbol(),
                check.name,
                check.detail
            ));
        }

        let suggestions: Vec<&CheckResult> = self
            .checks
            .iter()
            .filter(|c| c.suggestion.is_some())
            .collect();
        if !suggestions.is_empty() {
            out.push_str("\nSuggestions:\n");
            for check in suggestions {
                if let Some(s) = &check.suggestion {
                    out.push_str(&format!("  - {}: {}\n", check.name, s));
                }
            }
        }

        out.push_str(if self.has_failures() {
            "\nProblems detected.\n"
        } else {
            "\nEverything looks fine.\n"
        });
        out
    }
}

/// Check that an API key is available and looks like a Gemini key.
pub fn check_api_key(config: &LlmConfig) -> CheckResult {
    const NAME: &str = "api key";
    if config.provider != "gemini" {
        return CheckResult::new(
            NAME,
            CheckStatus::Skipped,
            format!("provider '{}' needs no key", config.provider),
        );
    }
    match config.resolve_api_key() {
        None => CheckResult::new(
            NAME,
            CheckStatus::Fail,
            format!("{} is not set", config.api_key_env),
        )
        .suggest(format!(
            "run `sleuth init-env --api-key <KEY>` or export {}",
            config.api_key_env
        )),
        Some(key) if !key.starts_with("AIza") => CheckResult::new(
            NAME,
            CheckStatus::Warn,
            format!("{} does not start with 'AIza'", config.api_key_env),
        )
        .suggest("create a key at https://aistudio.google.com/apikey"),
        Some(key) => CheckResult::new(
            NAME,
            CheckStatus::Pass,
            format!("{} set ({} chars)", config.api_key_env, key.len()),
        ),
    }
}

/// Report proxy variables found through `lookup`.
pub fn check_proxy_vars(lookup: impl Fn(&str) -> Option<String>) -> CheckResult {
    const NAME: &str = "proxy";
    let found: Vec<String> = PROXY_VARS
        .iter()
        .filter_map(|var| {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .map(|v| format!("{var}={}", mask_userinfo(&v)))
        })
        .collect();

    if found.is_empty() {
        CheckResult::new(NAME, CheckStatus::Pass, "no proxy variables set")
    } else {
        CheckResult::new(NAME, CheckStatus::Warn, found.join(", ")).suggest(
            "make sure the proxy allows HTTPS to Google endpoints; if it intercepts TLS, \
             install its root certificate in the system store",
        )
    }
}

/// Replace any `user:pass@` in a proxy URL with `***@`.
fn mask_userinfo(value: &str) -> String {
    let start = value.find("://").map_or(0, |i| i + 3);
    let authority_end = value[start..].find('/').map_or(value.len(), |i| start + i);
    match value[start..authority_end].rfind('@') {
        Some(at) => format!("{}***{}", &value[..start], &value[start + at..]),
        None => value.to_string(),
    }
}

/// Where the configured API lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoint {
    pub host: String,
    pub port: u16,
    /// `scheme://host[:port]` of the base URL.
    pub origin: String,
}

/// Parse the configured base URL, keeping its scheme and port.
pub fn api_endpoint(config: &LlmConfig) -> Result<ApiEndpoint, SleuthError> {
    let base = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let invalid = |message: String| SleuthError::from(ConfigError::Invalid { message });
    let url = url::Url::parse(base).map_err(|e| invalid(format!("invalid base_url '{base}': {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| invalid(format!("base_url '{base}' has no host")))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid(format!("base_url '{base}' has no port for its scheme")))?;
    Ok(ApiEndpoint {
        host,
        port,
        origin: url.origin().ascii_serialization(),
    })
}

/// Resolve `host` through the system resolver.
pub async fn check_dns(host: &str, port: u16) -> CheckResult {
    const NAME: &str = "dns";
    match tokio::net::lookup_host((host, port)).await {
        Ok(addrs) => {
            let addrs: Vec<String> = addrs.map(|a| a.ip().to_string()).collect();
            if addrs.is_empty() {
                CheckResult::new(NAME, CheckStatus::Fail, format!("{host} has no addresses"))
            } else {
                CheckResult::new(
                    NAME,
                    CheckStatus::Pass,
                    format!("{host} -> {}", addrs.join(", ")),
                )
            }
        }
        Err(e) => CheckResult::new(NAME, CheckStatus::Fail, format!("{host}: {e}"))
            .suggest("check your DNS settings or network connection"),
    }
}

/// Any HTTP response counts as reachable; only transport errors fail.
pub async fn check_https(name: &str, client: &reqwest::Client, url: &str) -> CheckResult {
    let started = Instant::now();
    match client.get(url).send().await {
        Ok(resp) => CheckResult::new(
            name,
            CheckStatus::Pass,
            format!(
                "{url} answered {} in {} ms",
                resp.status(),
                started.elapsed().as_millis()
            ),
        ),
        Err(e) => {
            let message = format!("{e:?}");
            let suggestion = if message.contains("certificate") || message.contains("Tls") {
                "TLS verification failed: check the system clock, update the certificate \
                 store, and import your proxy's root certificate if it intercepts TLS"
            } else if e.is_timeout() {
                "the request timed out: a firewall may be dropping outbound HTTPS traffic"
            } else {
                "the endpoint is unreachable: check firewall and proxy settings"
            };
            CheckResult::new(name, CheckStatus::Fail, format!("{url}: {e}")).suggest(suggestion)
        }
    }
}

/// Send a one-line prompt through the configured provider.
pub async fn check_generation(config: &LlmConfig) -> CheckResult {
    const NAME: &str = "generation";
    let provider = match create_provider(config) {
        Ok(p) => p,
        Err(e) => {
            return CheckResult::new(NAME, CheckStatus::Skipped, format!("no provider: {e}"));
        }
    };
    let client = LlmClient::new(provider, config);
    let started = Instant::now();
    match client
        .invoke_text(
            "Reply with the single word: ok",
            InvokeOptions::default().temperature(0.0),
        )
        .await
    {
        Ok(text) => CheckResult::new(
            NAME,
            CheckStatus::Pass,
            format!(
                "{} replied {:?} in {} ms",
                client.model_name(),
                text.trim().chars().take(40).collect::<String>(),
                started.elapsed().as_millis()
            ),
        ),
        Err(e) => CheckResult::new(NAME, CheckStatus::Fail, e.to_string())
            .suggest("verify the API key and that the model name is available to it"),
    }
}

/// Run every check. `offline` skips the live generation call.
pub async fn run_diagnostics(config: &SleuthConfig, offline: bool) -> DiagnosticReport {
    let mut report = DiagnosticReport::default();
    report.push(check_api_key(&config.llm));
    report.push(check_proxy_vars(|var| std::env::var(var).ok()));
    for warning in config.validate() {
        report.push(CheckResult::new("config", CheckStatus::Warn, warning));
    }

    let endpoint = match api_endpoint(&config.llm) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            report.push(CheckResult::new("endpoint", CheckStatus::Fail, e.to_string()));
            return report;
        }
    };
    report.push(check_dns(&endpoint.host, endpoint.port).await);

    match reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(config.llm.connect_timeout_secs))
        .build()
    {
        Ok(http) => {
            report.push(check_https("internet", &http, CONNECTIVITY_PROBE_URL).await);
            report.push(check_https("api endpoint", &http, &endpoint.origin).await);
        }
        Err(e) => report.push(CheckResult::new(
            "http client",
            CheckStatus::Fail,
            e.to_string(),
        )),
    }

    if offline {
        report.push(CheckResult::new(
            "generation",
            CheckStatus::Skipped,
            "skipped (--offline)",
        ));
    } else {
        report.push(check_generation(&config.llm).await);
    }
    report
}

/// Write a `.env` file holding the API key variable.
///
/// Refuses to replace an existing file unless `force` is set.
pub fn write_env_file(
    dir: &Path,
    key_var: &str,
    api_key: Option<&str>,
    force: bool,
) -> Result<PathBuf, SleuthError> {
    let path = dir.join(".env");
    if path.exists() && !force {
        return Err(SleuthError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists (use --force to overwrite)", path.display()),
        )));
    }
    let contents = format!("{}={}\n", key_var, api_key.unwrap_or_default());
    crate::persistence::atomic_write(&path, contents.as_bytes())?;
    Ok(path)
}
