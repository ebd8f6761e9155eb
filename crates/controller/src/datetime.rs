//! Timestamp text for moisture log entries, fetched from a time API.
//!
//! The response body is stored verbatim, unparsed. When the lookup fails the
//! returned text is a sentinel that gets stored just the same, so the
//! dashboard keeps seeing the strings it always has.

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

/// Host unreachable.
pub const DISCONNECTED: &str = "WiFi Disconnected";

/// HTTP client error codes, as reported in `Error: <code>`.
const CODE_READ_TIMEOUT: i32 = -11;
const CODE_CONNECTION_FAILED: i32 = -1;

pub trait DateSource {
    /// Never fails; problems come back as sentinel text.
    async fn lookup(&mut self) -> String;
}

pub struct HttpDateSource {
    http: Client,
    url: String,
}

impl HttpDateSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

fn error_text(code: i32) -> String {
    format!("Error: {code}")
}

impl DateSource for HttpDateSource {
    async fn lookup(&mut self) -> String {
        let result = match self.http.get(&self.url).send().await {
            Ok(resp) => resp.text().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(body) => body,
            Err(e) if e.is_connect() => {
                tracing::debug!(url = %self.url, "date lookup unreachable: {e}");
                DISCONNECTED.to_string()
            }
            Err(e) => {
                tracing::debug!(url = %self.url, "date lookup failed: {e}");
                let code = if e.is_timeout() {
                    CODE_READ_TIMEOUT
                } else {
                    CODE_CONNECTION_FAILED
                };
                error_text(code)
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{read_request, serve};
    use tokio::net::TcpListener;

    #[test]
    fn error_text_format() {
        assert_eq!(error_text(-11), "Error: -11");
        assert_eq!(error_text(CODE_CONNECTION_FAILED), "Error: -1");
    }

    #[tokio::test]
    async fn unreachable_host_reports_disconnected() {
        // Port 9 on loopback (discard) is closed on any sane test host.
        let mut src = HttpDateSource::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        assert_eq!(src.lookup().await, DISCONNECTED);
    }

    #[tokio::test]
    async fn body_is_returned_verbatim() {
        let body = r#"{"datetime":"2024-05-01T10:15:00+05:45"}"#;
        let (base, log, _server) = serve(vec![(200, body)]).await;

        let url = format!("{base}/api/timezone/Asia/Kathmandu");
        let mut src = HttpDateSource::new(&url, Duration::from_secs(5)).unwrap();
        assert_eq!(src.lookup().await, body);
        assert_eq!(log.lock().unwrap()[0].target, "/api/timezone/Asia/Kathmandu");
    }

    #[tokio::test]
    async fn error_status_body_is_still_returned() {
        let (base, _log, _server) = serve(vec![(404, r#"{"error":"unknown location"}"#)]).await;

        let mut src = HttpDateSource::new(&base, Duration::from_secs(5)).unwrap();
        assert_eq!(src.lookup().await, r#"{"error":"unknown location"}"#);
    }

    #[tokio::test]
    async fn stalled_server_reports_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let _server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            read_request(&mut sock).await;
            std::future::pending::<()>().await;
        });

        let mut src = HttpDateSource::new(&base, Duration::from_millis(300)).unwrap();
        assert_eq!(src.lookup().await, "Error: -11");
    }
}
