//! REST-console implementation of the `Console` trait.
//!
//! The host agent's control endpoint speaks a small form-encoded HTTP
//! protocol: `POST /StartSession/` authenticates and returns a session
//! id in the response body, `POST /SessionCommand/` carries one command
//! line for an open session, and `POST /CloseSession/` ends it. Every
//! request runs over its own HTTP/1 connection under a bounded timeout.

use std::time::Duration;

use async_trait::async_trait;
use http_body_util::BodyExt;
use tracing::debug;

use crate::error::{ConsoleError, ConsoleResult};
use crate::{Console, ConsoleCredentials, ConsoleSession};

/// Console client for host control endpoints.
pub struct RestConsole {
    timeout: Duration,
}

impl RestConsole {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Console for RestConsole {
    async fn open(
        &self,
        address: &str,
        port: u16,
        credentials: &ConsoleCredentials,
    ) -> ConsoleResult<Box<dyn ConsoleSession>> {
        let form = form_encode(&[
            ("USER", &credentials.username),
            ("PASS", &credentials.password),
        ]);
        let (status, body) = post(address, port, "/StartSession/", form, self.timeout).await?;

        if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN {
            return Err(ConsoleError::AuthFailed(format!(
                "{address}:{port} rejected console credentials"
            )));
        }
        if !status.is_success() {
            return Err(ConsoleError::Transport(format!(
                "unexpected status {status} opening session to {address}:{port}"
            )));
        }
        if body.is_empty() {
            return Err(ConsoleError::Transport(format!(
                "{address}:{port} returned no session id"
            )));
        }

        debug!(%address, port, "console session opened");
        Ok(Box::new(RestSession {
            address: address.to_string(),
            port,
            session_id: body,
            timeout: self.timeout,
        }))
    }
}

/// An open session against one host's control endpoint.
struct RestSession {
    address: String,
    port: u16,
    session_id: String,
    timeout: Duration,
}

#[async_trait]
impl ConsoleSession for RestSession {
    async fn write(&mut self, command: &str) -> ConsoleResult<()> {
        let form = form_encode(&[("ID", &self.session_id), ("COMMAND", command)]);
        let (status, _) = post(&self.address, self.port, "/SessionCommand/", form, self.timeout)
            .await?;
        if !status.is_success() {
            return Err(ConsoleError::Transport(format!(
                "unexpected status {status} writing command to {}:{}",
                self.address, self.port
            )));
        }
        debug!(address = %self.address, %command, "console command accepted");
        Ok(())
    }

    async fn close(self: Box<Self>) -> ConsoleResult<()> {
        let form = form_encode(&[("ID", &self.session_id)]);
        let (status, _) = post(&self.address, self.port, "/CloseSession/", form, self.timeout)
            .await?;
        if !status.is_success() {
            return Err(ConsoleError::Transport(format!(
                "unexpected status {status} closing session to {}:{}",
                self.address, self.port
            )));
        }
        debug!(address = %self.address, "console session closed");
        Ok(())
    }
}

/// One form-encoded POST over a fresh HTTP/1 connection.
///
/// Connect errors and the overall timeout map to `Unreachable`;
/// failures after the connection is up map to `Transport`.
async fn post(
    address: &str,
    port: u16,
    path: &str,
    form: String,
    timeout: Duration,
) -> ConsoleResult<(http::StatusCode, String)> {
    let target = format!("{address}:{port}");
    let uri = format!("http://{target}{path}");

    let exchange = async {
        let stream = tokio::net::TcpStream::connect(&target)
            .await
            .map_err(|e| ConsoleError::Unreachable(format!("connect {target}: {e}")))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ConsoleError::Unreachable(format!("handshake {target}: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(&uri)
            .header("host", &target)
            .header("content-type", "application/x-www-form-urlencoded")
            .header("user-agent", "gridmgr-console/0.1")
            .body(http_body_util::Full::new(bytes::Bytes::from(form)))
            .map_err(|e| ConsoleError::Transport(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ConsoleError::Transport(format!("request {uri}: {e}")))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ConsoleError::Transport(format!("response body {uri}: {e}")))?
            .to_bytes();

        Ok((status, String::from_utf8_lossy(&body).trim().to_string()))
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(ConsoleError::Unreachable(format!(
            "timed out after {timeout:?} contacting {target}"
        ))),
    }
}

/// Minimal application/x-www-form-urlencoded encoder.
fn form_encode(pairs: &[(&str, &str)]) -> String {
    fn escape(out: &mut String, s: &str) {
        for b in s.bytes() {
            match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    out.push(b as char)
                }
                b' ' => out.push('+'),
                _ => out.push_str(&format!("%{b:02X}")),
            }
        }
    }
    let mut out = String::new();
    for (i, (key, value)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        escape(&mut out, key);
        out.push('=');
        escape(&mut out, value);
    }
    out
}
