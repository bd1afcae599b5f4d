// HTTP Boundary
//
// Direct downloads go through the HttpClient trait so the handler can
// be driven without a network. ReqwestHttpClient is the real client.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::operation::config::HttpSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("could not build HTTP client: {0}")]
    Client(String),

    #[error("{0}")]
    Transport(String),
}

/// Outbound GET with caller-chosen headers.
///
/// Implementations return error statuses as responses; only failures to
/// get any response at all are errors.
pub trait HttpClient: Send + Sync {
    fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<HttpResponse, HttpError>;
}

/// Blocking reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::blocking::Client,
}

impl ReqwestHttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, HttpError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| HttpError::Client(e.to_string()))?;

        Ok(Self { client })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<HttpResponse, HttpError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        let response = request
            .send()
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .map_err(|e| HttpError::Transport(e.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
