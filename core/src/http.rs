//! HTTP/1.1 wire types.
//!
//! # Design
//! `HttpRequest` and `HttpResponse` are plain data with owned fields.
//! `HttpRequest::to_bytes` produces the exact bytes written to the socket and
//! `HttpResponse::read_from` parses one response from any `BufRead`, so both
//! directions can be tested without a network. Bodies are framed with
//! `Content-Length` only; chunked responses are rejected.

use std::fmt;
use std::io::{self, BufRead, Read};

use crate::error::ClientError;

/// Upper bound on the size of a response's status line plus headers.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the request body is negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// The caller-supplied body is sent verbatim as JSON.
    Json,
    /// The form fields are sent as `multipart/form-data`.
    FormData,
    /// The form fields are sent as `application/x-www-form-urlencoded`.
    FormUrlencoded,
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, target: &str) -> Self {
        Self {
            method,
            target: target.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Set `name` to `value`, replacing any header with the same name
    /// (compared case-insensitively).
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, v)) => *v = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Serialize the request line, headers and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(self.method.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.target.as_bytes());
        out.extend_from_slice(b" HTTP/1.1\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Read exactly one response from `reader`.
    ///
    /// Interim `1xx` responses are skipped. The body is read according to
    /// `Content-Length`, or until EOF when the header is absent. A TLS peer
    /// that closes without `close_notify` ends an EOF-delimited body cleanly.
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Self, ClientError> {
        let mut consumed = 0;
        let (status, reason, headers) = loop {
            let head = read_head(reader, &mut consumed)?;
            if !(100..200).contains(&head.0) || head.0 == 101 {
                break head;
            }
        };

        let mut response = HttpResponse {
            status,
            reason,
            headers,
            body: Vec::new(),
        };

        if matches!(status, 100..=199 | 204 | 304) {
            return Ok(response);
        }

        if let Some(encoding) = response.header("Transfer-Encoding") {
            if !encoding.eq_ignore_ascii_case("identity") {
                return Err(ClientError::MalformedResponse(format!(
                    "unsupported transfer-encoding {encoding:?}"
                )));
            }
        }

        match response.header("Content-Length") {
            Some(value) => {
                let len: u64 = value.trim().parse().map_err(|_| {
                    ClientError::MalformedResponse(format!("invalid content-length {value:?}"))
                })?;
                // Grow with the bytes that actually arrive, not the declared length.
                reader
                    .by_ref()
                    .take(len)
                    .read_to_end(&mut response.body)
                    .map_err(ClientError::Read)?;
                if (response.body.len() as u64) < len {
                    return Err(ClientError::Read(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("body ended after {} of {len} bytes", response.body.len()),
                    )));
                }
            }
            None => match reader.read_to_end(&mut response.body) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                Err(e) => return Err(ClientError::Read(e)),
            },
        }

        Ok(response)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

type Head = (u16, String, Vec<(String, String)>);

/// Read a status line and header block, up to and including the blank line.
///
/// `consumed` is shared by every head of one response, interim ones included.
fn read_head<R: BufRead>(reader: &mut R, consumed: &mut usize) -> Result<Head, ClientError> {
    let status_line = read_line(reader, consumed)?;
    let (status, reason) = parse_status_line(&status_line)?;

    let mut headers = Vec::new();
    loop {
        let line = read_line(reader, consumed)?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ClientError::MalformedResponse(format!("invalid header line {line:?}")))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok((status, reason, headers))
}

/// Read one CRLF- (or bare LF-) terminated line without its terminator.
fn read_line<R: BufRead>(reader: &mut R, consumed: &mut usize) -> Result<String, ClientError> {
    let mut raw = Vec::new();
    let n = reader
        .by_ref()
        .take((MAX_HEAD_BYTES - *consumed) as u64 + 1)
        .read_until(b'\n', &mut raw)
        .map_err(ClientError::Read)?;
    *consumed += n;
    if *consumed > MAX_HEAD_BYTES {
        return Err(ClientError::MalformedResponse(
            "response head exceeds size limit".to_string(),
        ));
    }
    if raw.last() != Some(&b'\n') {
        return Err(ClientError::Read(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before the response head was complete",
        )));
    }
    raw.pop();
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    String::from_utf8(raw)
        .map_err(|_| ClientError::MalformedResponse("response head is not valid UTF-8".to_string()))
}

fn parse_status_line(line: &str) -> Result<(u16, String), ClientError> {
    let malformed = || ClientError::MalformedResponse(format!("invalid status line {line:?}"));
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().ok_or_else(malformed)?;
    if !version.starts_with("HTTP/1.") {
        return Err(malformed());
    }
    let code = parts.next().ok_or_else(malformed)?;
    if code.len() != 3 {
        return Err(malformed());
    }
    let status: u16 = code.parse().map_err(|_| malformed())?;
    let reason = parts.next().unwrap_or("").to_string();
    Ok((status, reason))
}
