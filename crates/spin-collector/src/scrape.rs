//! Scrape sources
//!
//! A scraper reports the most recent outcome shown by the game's history
//! widget, or nothing when the widget is absent or empty. Range checking is
//! left to the caller so sources that report raw integers can be plugged in.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{CollectorError, CollectorResult};

lazy_static! {
    /// A standalone pocket number (0..=36)
    static ref NUMBER_PATTERN: Regex =
        Regex::new(r"\b([0-9]|[1-2][0-9]|3[0-6])\b").expect("Invalid regex pattern");

    /// Markup tags, stripped before numbers are searched for
    static ref TAG_PATTERN: Regex = Regex::new(r"<[^>]*>").expect("Invalid regex pattern");
}

/// Source of the latest observed outcome
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Read the latest outcome, `None` when nothing is shown
    async fn scrape(&self) -> CollectorResult<Option<i64>>;
}

/// Extract the first pocket number from a fragment of the history widget
///
/// Markup is stripped and text before `anchor` (when given and present) is
/// ignored.
pub fn extract_number(text: &str, anchor: Option<&str>) -> Option<i64> {
    let text = match anchor {
        Some(anchor) => &text[text.find(anchor)?..],
        None => text,
    };
    let plain = TAG_PATTERN.replace_all(text, " ");

    NUMBER_PATTERN
        .captures(&plain)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Scrapes the history widget from a page fetched over HTTP
pub struct HttpScraper {
    client: Client,
    url: String,
    anchor: Option<String>,
}

impl HttpScraper {
    pub fn new(url: &str, anchor: Option<String>, timeout: Duration) -> CollectorResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                CollectorError::invalid_config(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            url: url.to_string(),
            anchor,
        })
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn scrape(&self) -> CollectorResult<Option<i64>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CollectorError::scrape(format!("Page request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::scrape(format!(
                "Page returned status {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CollectorError::scrape(format!("Failed to read page body: {}", e)))?;

        Ok(extract_number(&body, self.anchor.as_deref()))
    }
}

/// Scrapes a dumped copy of the history widget from disk
pub struct FileScraper {
    path: PathBuf,
    anchor: Option<String>,
}

impl FileScraper {
    pub fn new(path: impl Into<PathBuf>, anchor: Option<String>) -> Self {
        Self {
            path: path.into(),
            anchor,
        }
    }
}

#[async_trait]
impl Scraper for FileScraper {
    async fn scrape(&self) -> CollectorResult<Option<i64>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            // Widget not rendered yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(extract_number(&text, self.anchor.as_deref()))
    }
}

/// Scraper that never observes anything
///
/// Backs collectors opened only to inspect or resend stored data.
pub struct NullScraper;

#[async_trait]
impl Scraper for NullScraper {
    async fn scrape(&self) -> CollectorResult<Option<i64>> {
        Ok(None)
    }
}

/// Scraper replaying a fixed script of observations, for tests
///
/// Once the script is exhausted every scrape reports nothing.
#[derive(Default)]
pub struct ScriptedScraper {
    script: Mutex<VecDeque<Result<Option<i64>, String>>>,
}

impl ScriptedScraper {
    pub fn new(values: impl IntoIterator<Item = Option<i64>>) -> Self {
        Self {
            script: Mutex::new(values.into_iter().map(Ok).collect()),
        }
    }

    /// Append an observation to the script
    pub fn push(&self, value: Option<i64>) {
        self.script.lock().unwrap().push_back(Ok(value));
    }

    /// Append a failing scrape to the script
    pub fn push_error(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }
}

#[async_trait]
impl Scraper for ScriptedScraper {
    async fn scrape(&self) -> CollectorResult<Option<i64>> {
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(CollectorError::scrape(message)),
            None => Ok(None),
        }
    }
}
