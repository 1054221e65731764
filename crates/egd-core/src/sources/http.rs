//! HTTP(S) acquisition.
//!
//! The timeout contract is idle-based rather than a single overall
//! deadline: the fetch is allowed 60 seconds to produce its next byte, and
//! every received chunk re-arms the timer. Long, slowly streaming
//! responses therefore complete, while a stalled server still fails the
//! cycle promptly. This requires reading the body as a chunk stream with a
//! per-read timer instead of using the client's total-deadline knob.
//!
//! TLS certificate validation is strict unless the source opts out, and
//! every request carries the fixed build-tagged User-Agent.

use std::time::Duration;

use futures_util::StreamExt;

use crate::config::SourceSpec;
use crate::error::{codes, Component, EgdError, ErrorCategory};

/// Identifying User-Agent sent with every request.
pub const USER_AGENT: &str = concat!("EGD-Rust/", env!("CARGO_PKG_VERSION"));

/// Idle ceiling: time allowed without receiving a single byte.
pub const FETCH_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn fetch(spec: &SourceSpec, url: &str) -> Result<Vec<u8>, EgdError> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .danger_accept_invalid_certs(spec.insecure_tls())
        .connect_timeout(FETCH_IDLE_TIMEOUT)
        .build()
        .map_err(|e| {
            EgdError::permanent(Component::Source, codes::FETCH_HTTP, "cannot build HTTP client")
                .with_cause(e)
        })?;

    // Session warm-up: fetched and drained, response ignored.
    if let Some(prefetch) = &spec.prefetch {
        let warmup = async {
            let response = client.get(prefetch).send().await?;
            response.bytes().await.map(drop)
        };
        tokio::time::timeout(FETCH_IDLE_TIMEOUT, warmup)
            .await
            .map_err(|_| idle_timeout(prefetch))?
            .map_err(|e| transport_error(prefetch, e))?;
    }

    let response = tokio::time::timeout(FETCH_IDLE_TIMEOUT, client.get(url).send())
        .await
        .map_err(|_| idle_timeout(url))?
        .map_err(|e| transport_error(url, e))?;

    let status = response.status();
    if !status.is_success() {
        let category = if status.is_server_error() {
            ErrorCategory::Temporary
        } else {
            ErrorCategory::Permanent
        };
        return Err(EgdError::new(
            category,
            Component::Source,
            codes::FETCH_HTTP,
            format!("GET {url} returned {status}"),
        ));
    }

    let limit = spec.size.map(|s| s as usize);
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    loop {
        // Each await is armed with a fresh idle timer; any received chunk
        // resets the ceiling.
        let next = tokio::time::timeout(FETCH_IDLE_TIMEOUT, stream.next())
            .await
            .map_err(|_| idle_timeout(url))?;
        let chunk = match next {
            Some(chunk) => chunk.map_err(|e| transport_error(url, e))?,
            None => break,
        };
        body.extend_from_slice(&chunk);
        if let Some(limit) = limit {
            if body.len() >= limit {
                body.truncate(limit);
                break;
            }
        }
    }

    Ok(body)
}

fn idle_timeout(url: &str) -> EgdError {
    EgdError::temporary(
        Component::Source,
        codes::FETCH_TIMEOUT,
        format!(
            "GET {url} produced no data for {}s",
            FETCH_IDLE_TIMEOUT.as_secs()
        ),
    )
}

fn transport_error(url: &str, cause: reqwest::Error) -> EgdError {
    EgdError::temporary(
        Component::Source,
        codes::FETCH_HTTP,
        format!("GET {url} failed in transport"),
    )
    .with_cause(cause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// One-shot HTTP server on a loopback port serving a canned response.
    fn serve_once(response: &'static [u8]) -> (String, std::thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = vec![0u8; 4096];
            let n = stream.read(&mut request).unwrap();
            request.truncate(n);
            stream.write_all(response).unwrap();
            request
        });
        (format!("http://{addr}/"), handle)
    }

    fn spec() -> SourceSpec {
        crate::sources::testutil::blank_spec()
    }

    #[tokio::test]
    async fn test_fetch_reads_body_and_sends_user_agent() {
        let (url, handle) = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nnoise");
        let body = fetch(&spec(), &url).await.unwrap();
        assert_eq!(body, b"noise");

        let request = String::from_utf8(handle.join().unwrap()).unwrap();
        assert!(request.contains("user-agent"));
        assert!(request.contains("EGD-Rust/"));
    }

    #[tokio::test]
    async fn test_fetch_truncates_to_size() {
        let (url, _handle) =
            serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n0123456789");
        let mut spec = spec();
        spec.size = Some(4);
        let body = fetch(&spec, &url).await.unwrap();
        assert_eq!(body, b"0123");
    }

    #[tokio::test]
    async fn test_server_error_is_temporary() {
        let (url, _handle) = serve_once(b"HTTP/1.1 503 Unavailable\r\nContent-Length: 0\r\n\r\n");
        let err = fetch(&spec(), &url).await.unwrap_err();
        assert_eq!(err.code, codes::FETCH_HTTP);
        assert_eq!(err.category, ErrorCategory::Temporary);
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let (url, _handle) = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
        let err = fetch(&spec(), &url).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Permanent);
    }

    #[tokio::test]
    async fn test_refused_connection_is_temporary() {
        // Bind then drop to obtain a port that refuses connections.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = fetch(&spec(), &format!("http://127.0.0.1:{port}/"))
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Temporary);
    }
}
