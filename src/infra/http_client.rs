//! Blocking HTTP access to remote rendering services.

use std::time::{Duration, Instant};

use reqwest::blocking::{Client, RequestBuilder};
use tracing::{debug, warn};

use crate::application::renderer::RendererError;

const BODY_EXCERPT: usize = 512;

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self, RendererError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("diagram-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| {
                RendererError::configuration(format!("http client setup failed: {err}"))
            })?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn get(&self, url: &str) -> Result<Vec<u8>, RendererError> {
        self.send("GET", url, self.client.get(url))
    }

    pub fn post(
        &self,
        url: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, RendererError> {
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        self.send("POST", url, request)
    }

    /// True when anything answers at `url` below HTTP 500 within `budget`.
    pub fn probe(&self, url: &str, budget: Duration) -> bool {
        match self.client.head(url).timeout(budget).send() {
            Ok(response) => !response.status().is_server_error(),
            Err(err) => {
                debug!(
                    target = "application::http",
                    op = "http::probe",
                    result = "unreachable",
                    url,
                    error = %err,
                );
                false
            }
        }
    }

    fn send(
        &self,
        method: &'static str,
        url: &str,
        request: RequestBuilder,
    ) -> Result<Vec<u8>, RendererError> {
        let started = Instant::now();
        let response = request.send().map_err(|err| {
            warn!(
                target = "application::http",
                op = "http::send",
                result = "error",
                method,
                url,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %err,
                "Remote renderer request failed"
            );
            self.map_error(err)
        })?;

        let status = response.status();
        let body = response.bytes().map_err(|err| self.map_error(err))?.to_vec();
        if !status.is_success() {
            let excerpt: String = String::from_utf8_lossy(&body)
                .chars()
                .take(BODY_EXCERPT)
                .collect();
            warn!(
                target = "application::http",
                op = "http::send",
                result = "error",
                method,
                url,
                status = status.as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Remote renderer answered with an error status"
            );
            return Err(RendererError::HttpStatus {
                status: status.as_u16(),
                body: excerpt.trim().to_string(),
            });
        }

        debug!(
            target = "application::http",
            op = "http::send",
            result = "success",
            method,
            url,
            body_bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
        );
        Ok(body)
    }

    fn map_error(&self, err: reqwest::Error) -> RendererError {
        if err.is_timeout() {
            RendererError::Timeout { after: self.timeout }
        } else if err.is_connect() {
            RendererError::network(format!("connection failed: {err}"))
        } else {
            RendererError::network(err.to_string())
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_body_on_success() {
        let (base, seen) = test_server::serve(vec![(200, "image/svg+xml", b"<svg/>".to_vec())]);
        let client = HttpClient::new(Duration::from_secs(5)).unwrap();

        let body = client
            .post(&format!("{base}/mermaid/svg"), "text/plain", b"graph TD".to_vec())
            .unwrap();
        assert_eq!(body, b"<svg/>");

        let request = seen.recv().unwrap();
        assert_eq!(request.request_line, "POST /mermaid/svg HTTP/1.1");
        assert_eq!(request.body, b"graph TD");
    }

    #[test]
    fn error_statuses_keep_a_body_excerpt() {
        let long_body = format!("Syntax error in graph {}", "x".repeat(2_000));
        let (base, _seen) = test_server::serve(vec![(400, "text/plain", long_body.into_bytes())]);
        let client = HttpClient::new(Duration::from_secs(5)).unwrap();

        match client.get(&format!("{base}/svg/abc")).unwrap_err() {
            RendererError::HttpStatus { status, body } => {
                assert_eq!(status, 400);
                assert!(body.starts_with("Syntax error"));
                assert_eq!(body.chars().count(), BODY_EXCERPT);
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn refused_connections_are_network_errors() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = HttpClient::new(Duration::from_secs(2)).unwrap();
        let err = client.get(&format!("http://127.0.0.1:{port}/svg/x")).unwrap_err();
        assert!(matches!(err, RendererError::Network { .. }));
        assert!(!client.probe(&format!("http://127.0.0.1:{port}/"), Duration::from_millis(200)));
    }
}
