//! Minimal HTTP/1.x plumbing for the synchronous worker loop.
//!
//! One request per connection; every response carries `Connection: close`.
//! This is deliberately not a general HTTP implementation - just enough to
//! read a request head, hand it to a handler, and write the answer.

use anyhow::{bail, Context, Result};
use std::io::{BufRead, BufReader, Read, Write};
use std::time::Duration;

/// Upper bound on the request head we are willing to buffer.
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// How long the worker waits for a client to finish sending its head.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub path: String,
}

/// Read the request line and discard headers up to the blank separator.
pub fn read_request<R: Read>(reader: R) -> Result<Request> {
    let mut reader = BufReader::new(reader.take(MAX_HEAD_BYTES as u64));

    let mut line = String::new();
    reader
        .read_line(&mut line)
        .context("failed to read request line")?;
    if line.is_empty() {
        bail!("client closed the connection before sending a request");
    }

    let mut parts = line.split_whitespace();
    let method = parts.next().context("missing method")?.to_string();
    let path = parts.next().context("missing request path")?.to_string();

    loop {
        let mut header = String::new();
        let n = reader
            .read_line(&mut header)
            .context("failed to read header")?;
        if n == 0 {
            // Head hit the size cap without a blank line
            bail!("request head too large or truncated");
        }
        if header == "\r\n" || header == "\n" {
            break;
        }
    }

    Ok(Request { method, path })
}

pub struct Response {
    pub status: u16,
    pub reason: &'static str,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(status: u16, reason: &'static str, body: serde_json::Value) -> Self {
        Self {
            status,
            reason,
            content_type: "application/json",
            body: body.to_string().into_bytes(),
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            self.reason,
            self.content_type,
            self.body.len()
        );
        w.write_all(head.as_bytes())?;
        w.write_all(&self.body)?;
        w.flush()?;
        Ok(())
    }
}

/// Application seam: turns a parsed request into a response.
pub trait Handler: Send {
    fn handle(&self, req: &Request) -> Response;
}

// =============================================================================
// Unit Tests
// =============================================================================
