//! Control client: one JSON exchange over loopback TCP.
//!
//! The whole exchange runs under a 30-second deadline. While waiting on a
//! slow daemon the remaining budget is echoed to stderr once per second so
//! the operator can see the countdown instead of a frozen terminal.
//! Connection failures keep their underlying cause (refused, unreachable,
//! timed out) in the message.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use egd_core::error::{codes, Component, EgdError};
use egd_core::protocol::{Request, Response};

/// Total budget for connect, write and read.
pub const TOTAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll granularity for the countdown display.
const POLL: Duration = Duration::from_secs(1);

/// Send one request to the daemon's loopback port and decode one reply.
pub fn exchange(port: u16, request: &Request) -> Result<Response, EgdError> {
    let deadline = Instant::now() + TOTAL_TIMEOUT;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let mut stream = TcpStream::connect_timeout(&addr, TOTAL_TIMEOUT).map_err(|e| {
        let detail = match e.kind() {
            std::io::ErrorKind::ConnectionRefused => "connection refused (is the daemon running?)",
            std::io::ErrorKind::TimedOut => "connection timed out",
            _ => "connection failed",
        };
        EgdError::temporary(
            Component::Client,
            codes::CLIENT_UNREACHABLE,
            format!("cannot reach daemon on 127.0.0.1:{port}: {detail}"),
        )
        .with_cause(e)
    })?;

    stream
        .set_write_timeout(Some(remaining(deadline)?))
        .and_then(|_| stream.set_read_timeout(Some(POLL)))
        .map_err(|e| client_io("cannot configure socket timeouts", e))?;

    let mut line = serde_json::to_string(request)
        .map_err(|e| client_io_other("cannot encode request", e))?;
    line.push('\n');
    stream
        .write_all(line.as_bytes())
        .map_err(|e| client_io("cannot send request", e))?;

    let reply = read_reply(&mut stream, deadline)?;
    serde_json::from_slice(&reply).map_err(|e| {
        EgdError::permanent(
            Component::Client,
            codes::CLIENT_PROTOCOL,
            "daemon reply is not a valid response line",
        )
        .with_cause(e)
    })
}

/// Read one newline-terminated reply, echoing the remaining budget to
/// stderr while the daemon keeps us waiting.
fn read_reply(stream: &mut TcpStream, deadline: Instant) -> Result<Vec<u8>, EgdError> {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    let mut showed_countdown = false;

    loop {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                finish_countdown(showed_countdown);
                return Err(EgdError::permanent(
                    Component::Client,
                    codes::CLIENT_PROTOCOL,
                    "daemon closed the connection without replying",
                ));
            }
            Ok(_) if line.ends_with(b"\n") => {
                finish_countdown(showed_countdown);
                return Ok(line);
            }
            Ok(_) => {}
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                finish_countdown(showed_countdown);
                return Err(client_io("reading daemon reply failed", e));
            }
        }

        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            finish_countdown(showed_countdown);
            return Err(EgdError::temporary(
                Component::Client,
                codes::CLIENT_TIMEOUT,
                format!("no reply within {}s", TOTAL_TIMEOUT.as_secs()),
            ));
        }
        eprint!("\rwaiting for daemon reply... {:>2}s remaining", left.as_secs());
        let _ = std::io::stderr().flush();
        showed_countdown = true;
    }
}

fn finish_countdown(showed: bool) {
    if showed {
        eprintln!();
    }
}

fn remaining(deadline: Instant) -> Result<Duration, EgdError> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(EgdError::temporary(
            Component::Client,
            codes::CLIENT_TIMEOUT,
            "deadline exhausted before the request was sent",
        ));
    }
    Ok(left)
}

fn client_io(msg: &str, cause: std::io::Error) -> EgdError {
    EgdError::temporary(Component::Client, codes::CLIENT_UNREACHABLE, msg).with_cause(cause)
}

fn client_io_other(msg: &str, cause: impl std::error::Error + Send + Sync + 'static) -> EgdError {
    EgdError::permanent(Component::Client, codes::CLIENT_PROTOCOL, msg).with_cause(cause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    /// Accept one connection and answer with a canned line.
    fn answer_once(reply: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            stream.write_all(reply.as_bytes()).unwrap();
        });
        port
    }

    #[test]
    fn test_exchange_roundtrip() {
        let port = answer_once("{\"status_code\":200,\"status_text\":\"OK\"}\n");
        let response = exchange(port, &Request::new("status")).unwrap();
        assert!(response.is_ok());
    }

    #[test]
    fn test_refused_connection_is_unreachable() {
        // Bind then drop to get a port that refuses.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = exchange(port, &Request::new("status")).unwrap_err();
        assert_eq!(err.code, codes::CLIENT_UNREACHABLE);
        assert!(err.message.contains("refused"));
    }

    #[test]
    fn test_garbage_reply_is_protocol_error() {
        let port = answer_once("this is not json\n");
        let err = exchange(port, &Request::new("status")).unwrap_err();
        assert_eq!(err.code, codes::CLIENT_PROTOCOL);
    }

    #[test]
    fn test_closed_without_reply_is_protocol_error() {
        let port = answer_once("");
        let err = exchange(port, &Request::new("status")).unwrap_err();
        assert_eq!(err.code, codes::CLIENT_PROTOCOL);
    }
}
