//! Loopback control server.
//!
//! Connection lifecycle: accept, read one newline-terminated JSON request
//! of at most 1 KiB, dispatch, write one JSON response line, close. Reads
//! and writes are bounded by a 30-second timeout. The listener binds the
//! loopback interface only; an occupied port is fatal at startup.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::ReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use egd_core::clock;
use egd_core::error::{codes, Component, EgdError};
use egd_core::protocol::{commands, Request, Response, MAX_REQUEST_BYTES};

use crate::DaemonContext;

/// Ceiling on reading the request and writing the response.
pub const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Bind the control listener on the loopback interface.
pub async fn bind(port: u16) -> Result<TcpListener, EgdError> {
    TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| {
        EgdError::fatal(
            Component::Control,
            codes::CONTROL_PORT_IN_USE,
            format!("cannot bind loopback control port {port}"),
        )
        .with_cause(e)
    })
}

/// Accept loop; returns once shutdown begins, at which point no further
/// connections are accepted.
pub async fn serve(listener: TcpListener, ctx: Arc<DaemonContext>) {
    let mut shutdown = ctx.shutdown_signal();
    loop {
        tokio::select! {
            _ = shutdown.wait_for(|v| *v) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "control connection");
                    let ctx = ctx.clone();
                    tokio::spawn(handle_connection(stream, ctx));
                }
                Err(err) => warn!(error = %err, "control accept failed"),
            },
        }
    }
    debug!("control listener closed");
}

async fn handle_connection(mut stream: TcpStream, ctx: Arc<DaemonContext>) {
    let (read_half, mut write_half) = stream.split();

    let request = match timeout(IO_TIMEOUT, read_request(read_half)).await {
        Ok(request) => request,
        Err(_) => Err(Response::error(400, "request read timed out")),
    };

    let (response, initiate_shutdown) = match request {
        Ok(request) => dispatch(&request, &ctx).await,
        Err(response) => (response, false),
    };

    let line = response.to_line();
    if timeout(IO_TIMEOUT, write_half.write_all(line.as_bytes()))
        .await
        .map(|r| r.is_err())
        .unwrap_or(true)
    {
        warn!("control response write failed");
    }
    let _ = write_half.flush().await;

    // The quit reply goes out before shutdown flips, so the client always
    // sees its acknowledgement.
    if initiate_shutdown {
        ctx.begin_shutdown();
    }
}

/// Read and parse one request line. Protocol violations map straight to
/// the 400 response sent back to the client.
async fn read_request(read_half: ReadHalf<'_>) -> Result<Request, Response> {
    let mut reader = BufReader::new(read_half).take(MAX_REQUEST_BYTES as u64 + 1);
    let mut line = Vec::new();
    reader
        .read_until(b'\n', &mut line)
        .await
        .map_err(|_| Response::error(400, "unreadable request"))?;

    if line.is_empty() {
        return Err(Response::error(400, "empty request"));
    }
    if line.len() > MAX_REQUEST_BYTES {
        return Err(Response::error(
            400,
            format!("request exceeds {MAX_REQUEST_BYTES} bytes"),
        ));
    }
    serde_json::from_slice(&line).map_err(|_| Response::error(400, "malformed JSON request"))
}

async fn dispatch(request: &Request, ctx: &Arc<DaemonContext>) -> (Response, bool) {
    if ctx.is_shutting_down() {
        return (Response::error(503, "daemon is shutting down"), false);
    }

    match request.command.as_str() {
        commands::STATUS => (status_response(ctx).await, false),
        commands::PERSIST => match ctx.persist_now().await {
            Ok(receipt) => (
                Response::ok(json!({
                    "bytes_written": receipt.bytes_written,
                    "file_path": receipt.file_path.display().to_string(),
                    "persist_time": clock::format_iso8601(receipt.persist_time),
                })),
                false,
            ),
            Err(err) => (Response::error(500, err.to_string()), false),
        },
        commands::QUIT => (
            Response::ok(json!({
                "message": "shutting down",
                "uptime_seconds": ctx.uptime().as_secs(),
            })),
            true,
        ),
        commands::SOURCES => (sources_response(ctx), false),
        other => (Response::error(404, format!("unknown command '{other}'")), false),
    }
}

async fn status_response(ctx: &Arc<DaemonContext>) -> Response {
    let stats = ctx.pool.read().await.stats();
    Response::ok(json!({
        "entropy_bytes": stats.total_bytes,
        "max_entropy": stats.max_total_bytes,
        "chunk_count": stats.chunk_count,
        "is_full": stats.is_full,
        "last_persist": ctx.last_persist().map(clock::format_iso8601),
    }))
}

fn sources_response(ctx: &Arc<DaemonContext>) -> Response {
    let reports: Vec<_> = ctx
        .sources
        .iter()
        .map(|runner| runner.state.lock().unwrap().report())
        .collect();
    Response::ok(json!({
        "total": reports.len(),
        "sources": reports,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use egd_core::config::Config;
    use egd_core::pool::EntropyPool;

    async fn test_daemon(dir: &tempfile::TempDir) -> (Arc<DaemonContext>, std::net::SocketAddr) {
        let config = Config::from_str(&format!(
            r#"
            max_entropy = 1000
            persist_file = "{}"
            persist_interval = "1h"
            pool_chunk_max_entropy = 100
            tcp_port = 65535
            "#,
            dir.path().join("pool.egd").display()
        ))
        .unwrap();

        let mut pool = EntropyPool::new(1000, 100);
        pool.deposit(&[7u8; 150]);
        let ctx = DaemonContext::new(config, pool);

        // Ephemeral port; the configured one is not used by tests.
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, ctx.clone()));
        (ctx, addr)
    }

    async fn exchange(addr: std::net::SocketAddr, line: &str) -> Response {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        let mut reply = String::new();
        BufReader::new(stream).read_line(&mut reply).await.unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    #[tokio::test]
    async fn test_status_reports_pool_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let (_ctx, addr) = test_daemon(&dir).await;

        let response = exchange(addr, "{\"command\":\"status\"}\n").await;
        assert_eq!(response.status_code, 200);
        let data = response.data.unwrap();
        assert_eq!(data["entropy_bytes"], 150);
        assert_eq!(data["max_entropy"], 1000);
        assert_eq!(data["chunk_count"], 2);
        assert_eq!(data["is_full"], false);
        assert!(data["last_persist"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_command_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (_ctx, addr) = test_daemon(&dir).await;
        let response = exchange(addr, "{\"command\":\"reseed\"}\n").await;
        assert_eq!(response.status_code, 404);
    }

    #[tokio::test]
    async fn test_malformed_json_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let (_ctx, addr) = test_daemon(&dir).await;
        let response = exchange(addr, "{not json\n").await;
        assert_eq!(response.status_code, 400);
    }

    #[tokio::test]
    async fn test_oversized_request_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let (_ctx, addr) = test_daemon(&dir).await;
        let huge = format!("{{\"command\":\"{}\"}}\n", "x".repeat(2048));
        let response = exchange(addr, &huge).await;
        assert_eq!(response.status_code, 400);
    }

    #[tokio::test]
    async fn test_persist_writes_pool_file() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, addr) = test_daemon(&dir).await;

        let response = exchange(addr, "{\"command\":\"persist\"}\n").await;
        assert_eq!(response.status_code, 200);
        let data = response.data.unwrap();
        assert!(data["bytes_written"].as_u64().unwrap() > 64);
        assert!(ctx.config.persist_file.exists());
        assert!(ctx.last_persist().is_some());

        // Status now reports the persist instant.
        let status = exchange(addr, "{\"command\":\"status\"}\n").await;
        assert!(status.data.unwrap()["last_persist"].is_string());
    }

    #[tokio::test]
    async fn test_quit_acknowledges_then_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, addr) = test_daemon(&dir).await;

        let response = exchange(addr, "{\"command\":\"quit\"}\n").await;
        assert_eq!(response.status_code, 200);
        let data = response.data.unwrap();
        assert_eq!(data["message"], "shutting down");
        assert!(data["uptime_seconds"].is_u64());
        assert!(ctx.is_shutting_down());
    }

    #[tokio::test]
    async fn test_sources_command_lists_runtime_state() {
        let dir = tempfile::tempdir().unwrap();
        let (_ctx, addr) = {
            let config = Config::from_str(&format!(
                r#"
                max_entropy = 1000
                persist_file = "{}"
                persist_interval = "1h"
                pool_chunk_max_entropy = 100
                tcp_port = 65534

                [sources.urandom]
                file = "/dev/urandom"
                interval = "1m"
                scale = 0.1
                "#,
                dir.path().join("pool.egd").display()
            ))
            .unwrap();
            let ctx = DaemonContext::new(config, EntropyPool::new(1000, 100));
            let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(serve(listener, ctx.clone()));
            (ctx, addr)
        };

        let response = exchange(addr, "{\"command\":\"sources\"}\n").await;
        assert_eq!(response.status_code, 200);
        let data = response.data.unwrap();
        assert_eq!(data["total"], 1);
        assert_eq!(data["sources"][0]["name"], "urandom");
        assert_eq!(data["sources"][0]["method"], "file");
        assert_eq!(data["sources"][0]["disabled"], false);
    }
}
