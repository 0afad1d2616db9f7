//! HTTP client for the upstream lines provider.
//!
//! The provider serves `GET {base_url}{sport}` with a body of the form
//! `{"lines": {"<ID>": "<value>"}}`. Values normally arrive as decimal
//! strings; plain JSON numbers are accepted too.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::application::ports::{FeedError, LineFeed};
use crate::domain::sport::SportName;
use crate::infrastructure::config::ProviderSettings;

#[derive(Debug, Deserialize)]
struct LinesDocument {
    lines: Map<String, Value>,
}

/// `LineFeed` that talks to the provider over HTTP.
#[derive(Debug, Clone)]
pub struct HttpLineFeed {
    client: Client,
    base_url: String,
}

impl HttpLineFeed {
    /// Create a client from provider settings.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Transport`] if the HTTP client cannot be built.
    pub fn new(settings: &ProviderSettings) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
        })
    }

    fn url(&self, sport: SportName) -> String {
        format!("{}{}", self.base_url, sport.as_str())
    }
}

#[async_trait]
impl LineFeed for HttpLineFeed {
    async fn fetch_lines(&self, sport: SportName) -> Result<Vec<(String, f64)>, FeedError> {
        let url = self.url(sport);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::debug!(%url, status = status.as_u16(), "Lines provider rejected request");
            return Err(FeedError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        parse_lines(&body)
    }
}

fn parse_lines(body: &[u8]) -> Result<Vec<(String, f64)>, FeedError> {
    let document: LinesDocument =
        serde_json::from_slice(body).map_err(|e| FeedError::Decode(e.to_string()))?;

    document
        .lines
        .into_iter()
        .map(|(id, value)| {
            let line = parse_value(&value).ok_or_else(|| {
                FeedError::Decode(format!("line {id} has non-numeric value {value}"))
            })?;
            Ok((id, line))
        })
        .collect()
}

fn parse_value(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
