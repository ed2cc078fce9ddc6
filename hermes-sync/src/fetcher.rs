//! The fetch contract and its HTTP implementation.

use std::time::Duration;

use hermes_core::{ConfigError, FetchOutcome, SourceConfig, SourceFormat, SyncError};

use crate::payload;

/// One network round trip.
///
/// Implementations block; callers run them on a blocking thread.
pub trait Fetcher: Send + Sync {
    fn fetch(&self) -> Result<FetchOutcome, SyncError>;
}

impl<F> Fetcher for F
where
    F: Fn() -> Result<FetchOutcome, SyncError> + Send + Sync,
{
    fn fetch(&self) -> Result<FetchOutcome, SyncError> {
        self()
    }
}

/// Fetches the document over HTTP(S) with `ureq`.
///
/// The request timeout comes from `source.timeout_secs`; the scheduler adds
/// none of its own.
pub struct HttpFetcher {
    url: String,
    format: SourceFormat,
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn from_config(source: &SourceConfig) -> Result<Self, ConfigError> {
        let url = source
            .url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ConfigError::Invalid("source.url is not set".to_string()))?;
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(source.timeout_secs))
            .build();
        Ok(Self {
            url,
            format: source.format,
            agent,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn get_body(&self) -> Result<String, SyncError> {
        let response = match self.agent.get(&self.url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                return Err(SyncError::Fetch(format!(
                    "HTTP {code} {} from {}",
                    response.status_text(),
                    self.url
                )));
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(SyncError::Fetch(transport.to_string()));
            }
        };
        let body = response
            .into_string()
            .map_err(|e| SyncError::Fetch(format!("failed reading response body: {e}")))?;
        if body.trim().is_empty() {
            return Err(SyncError::Fetch("empty response body".to_string()));
        }
        Ok(body)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self) -> Result<FetchOutcome, SyncError> {
        let body = self.get_body()?;
        let raw_payload = match self.format {
            SourceFormat::Raw => body,
            SourceFormat::SheetsCell => payload::unwrap_sheets_cell(&body)?,
        };
        let document = payload::parse_document(&raw_payload)?;
        let active_alarm_items = payload::active_alarms(&document);
        tracing::debug!(
            url = %self.url,
            items = document.len(),
            alarms = active_alarm_items.len(),
            "fetched document"
        );
        Ok(FetchOutcome {
            raw_payload,
            active_alarm_items,
        })
    }
}
