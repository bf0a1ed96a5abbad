//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest`, with optional retry
//! middleware and standardized JSON response handling.

use std::time::Duration;

use anyhow::Context;
use reqwest::{header::HeaderMap, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;

/// A response with the metadata adapters need.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized body on success.
    pub data: Option<T>,
    /// The raw body when the status was not 2xx.
    pub error_body: Option<String>,
    /// HTTP status code.
    pub status: u16,
    /// `true` for 2xx statuses.
    pub success: bool,
    /// Response headers.
    pub headers: HeaderMap,
}

/// Options for [`ApiClient::new`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Retries on transient failures; 0 disables the retry middleware.
    pub max_retries: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 0,
        }
    }
}

/// HTTP client bound to a base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
}

impl ApiClient {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute URL or the TLS backend cannot be
    /// initialised.
    pub fn new(base_url: &str, options: ClientOptions) -> anyhow::Result<Self> {
        let url = Url::parse(base_url).with_context(|| format!("invalid base URL '{}'", base_url))?;
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .context("building HTTP client")?;

        let mut builder = ClientBuilder::new(http);
        if options.max_retries > 0 {
            let retry_policy = ExponentialBackoff::builder().build_with_max_retries(options.max_retries);
            builder = builder.with(RetryTransientMiddleware::new_with_policy(retry_policy));
        }

        Ok(Self {
            inner: builder.build(),
            base_url: url,
        })
    }

    /// The base all paths are joined to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a GET and deserializes a 2xx body into `T`.
    ///
    /// Non-2xx responses are not errors: their body is returned as text in
    /// `error_body` so adapters can interpret provider error payloads.
    ///
    /// # Errors
    /// URL joining, transport failures and 2xx bodies that do not decode.
    pub async fn get<T>(&self, path: &str) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        let full_url = self.base_url.join(path)?;
        let response: reqwest::Response = self.inner.get(full_url).send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nx-mbx-used-weight-1m: 7\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    /// Answers one connection with `response` and returns the request head.
    async fn serve_once(response: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&head).into_owned()
        });
        (base, handle)
    }

    #[tokio::test]
    async fn test_get_decodes_success_body() {
        let body = r#"{"symbol":"BTCUSDT","price":"64250.50"}"#;
        let (base, server) = serve_once(http_response("200 OK", body)).await;
        let client = ApiClient::new(&base, ClientOptions::default()).unwrap();

        let response = client
            .get::<serde_json::Value>("api/v3/ticker/price?symbol=BTCUSDT")
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.status, 200);
        assert_eq!(response.data.unwrap()["price"], "64250.50");
        assert_eq!(
            response.headers.get("x-mbx-used-weight-1m").unwrap().to_str().unwrap(),
            "7"
        );

        let head = server.await.unwrap();
        assert!(head.starts_with("GET /api/v3/ticker/price?symbol=BTCUSDT HTTP/1.1"));
        assert!(!head.to_ascii_lowercase().contains("content-type"));
    }

    #[tokio::test]
    async fn test_get_returns_error_body_for_4xx() {
        let body = r#"{"code":-1121,"msg":"Invalid symbol."}"#;
        let (base, server) = serve_once(http_response("400 Bad Request", body)).await;
        let client = ApiClient::new(&base, ClientOptions::default()).unwrap();

        let response = client.get::<serde_json::Value>("api/v3/ticker/24hr?symbol=NOPE").await.unwrap();
        assert!(!response.success);
        assert_eq!(response.status, 400);
        assert!(response.data.is_none());
        assert!(response.error_body.unwrap().contains("-1121"));
        server.await.unwrap();
    }

    #[test]
    fn test_relative_base_url_is_rejected() {
        assert!(ApiClient::new("api/v3/", ClientOptions::default()).is_err());
    }

    #[test]
    fn test_paths_join_onto_base() {
        let client = ApiClient::new("https://api.binance.com/", ClientOptions::default()).unwrap();
        let joined = client.base_url().join("api/v3/ticker/price?symbol=BTCUSDT").unwrap();
        assert_eq!(joined.as_str(), "https://api.binance.com/api/v3/ticker/price?symbol=BTCUSDT");
    }
}
