//! HTTP client for the runner backend control-plane
//!
//! Pure transport: no retry, no interpretation of status codes. Non-2xx
//! responses become [`Error::Http`] carrying the backend payload verbatim.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::{Error, Result};

use super::types::ErrorResponse;

/// Client bound to one backend instance's base URL
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client for a backend reachable at `base_url`
    /// (e.g. `http://127.0.0.1:3002`, no trailing slash)
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// Base URL this client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Derive the WebSocket URL for a control-plane path
    pub fn ws_url(&self, path: &str) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.base_url)
        };
        format!("{ws_base}{path}")
    }

    /// GET a JSON endpoint, with optional query parameters
    pub async fn get_json<T, Q>(&self, path: &str, query: Option<&Q>) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let mut request = self.http.get(format!("{}{}", self.base_url, path));
        if let Some(query) = query {
            request = request.query(query);
        }
        let response = request.send().await?;
        Self::decode(response).await
    }

    /// POST a JSON endpoint, with optional JSON body
    pub async fn post_json<T, B>(&self, path: &str, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut request = self.http.post(format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        Self::decode(response).await
    }

    /// Probe the liveness endpoint once
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/ping", self.base_url))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Http {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }

    /// Ask the backend to reload its configuration. Callers owning a
    /// directory cache must invalidate it afterwards (or go through
    /// `ProjectDirectory::reload`, which does both).
    pub async fn reload(&self) -> Result<()> {
        let _: serde_json::Value = self.post_json("/reload", None::<&()>).await?;
        Ok(())
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::debug!(status = %status, "backend returned an error payload");
            // Prefer the backend's own message when the payload parses,
            // but keep the raw body either way.
            let body = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(error) => error.message,
                Err(_) => body,
            };
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|err| {
            Error::Protocol(format!("failed to decode response for {status}: {err}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_swaps_scheme() {
        let client = ApiClient::new("http://127.0.0.1:3002");
        assert_eq!(client.ws_url("/ws/run-1"), "ws://127.0.0.1:3002/ws/run-1");

        let client = ApiClient::new("https://runner.example.com/");
        assert_eq!(client.ws_url("/ws/x"), "wss://runner.example.com/ws/x");
    }

    #[test]
    fn base_url_trailing_slash_is_stripped() {
        let client = ApiClient::new("http://localhost:8080///");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
