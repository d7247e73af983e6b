//! One request over one connection.
//!
//! # Design
//! `RequestSession` owns its `Connection` and the most recent
//! `HttpResponse`. Form fields and query parameters are kept across
//! `request` calls; headers set with `set_header` apply to the next request
//! only. Response accessors return `ClientError::NoResponse` until a request
//! has succeeded, and again after a failed one.

use std::io::{BufReader, Write};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::codec;
use crate::config::ClientConfig;
use crate::cookie;
use crate::error::ClientError;
use crate::form::{self, FieldSet};
use crate::http::{ContentKind, HttpMethod, HttpRequest, HttpResponse};
use crate::transport::{Connection, Scheme, TlsContext};

const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";
const URLENCODED_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Blocking HTTP or HTTPS client for single-shot requests.
///
/// ```no_run
/// use oneshot_core::{ContentKind, HttpMethod, RequestSession};
///
/// let mut session = RequestSession::http();
/// session.connect("localhost", 3000)?;
/// session.set_form_data("user", "alice");
/// session.request("/login", HttpMethod::Post, ContentKind::FormUrlencoded, "")?;
/// println!("{} {}", session.status()?, session.body()?);
/// # Ok::<(), oneshot_core::ClientError>(())
/// ```
#[derive(Debug)]
pub struct RequestSession {
    scheme: Scheme,
    config: ClientConfig,
    connection: Option<Connection>,
    headers: Vec<(String, String)>,
    form: FieldSet,
    query: FieldSet,
    response: Option<HttpResponse>,
}

impl RequestSession {
    pub fn new(scheme: Scheme, config: ClientConfig) -> Self {
        Self {
            scheme,
            config,
            connection: None,
            headers: Vec::new(),
            form: FieldSet::new(),
            query: FieldSet::new(),
            response: None,
        }
    }

    /// Plain-TCP session with default timeouts.
    pub fn http() -> Self {
        Self::new(Scheme::Http, ClientConfig::default())
    }

    /// TLS session with default timeouts.
    pub fn https(tls: Arc<TlsContext>) -> Self {
        Self::new(Scheme::Https(tls), ClientConfig::default())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_connected)
    }

    /// Open a new connection to `host:port`, closing any previous one.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), ClientError> {
        self.connection = None;
        let mut connection = Connection::new(self.scheme.clone(), self.config.clone());
        connection.connect(host, port)?;
        self.connection = Some(connection);
        Ok(())
    }

    /// Close the connection. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            connection.close();
        }
    }

    /// Add a header to the next request. Content negotiation headers set by
    /// `request` take precedence.
    pub fn set_header(&mut self, key: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some((_, v)) => *v = value.to_string(),
            None => self.headers.push((key.to_string(), value.to_string())),
        }
    }

    /// Set a form field used by `FormData` and `FormUrlencoded` requests.
    /// An existing key is overwritten.
    ///
    /// Both encodings read this one set; there is no separate url-encoded
    /// field map, so fields set here go out with either content kind.
    pub fn set_form_data(&mut self, key: &str, value: &str) {
        self.form.set(key, value);
    }

    pub fn clear_form_data(&mut self) {
        self.form.clear();
    }

    /// Set a query parameter used by `build_url`. An existing key is
    /// overwritten.
    pub fn set_url_request_param(&mut self, key: &str, value: &str) {
        self.query.set(key, value);
    }

    pub fn clear_url_request_params(&mut self) {
        self.query.clear();
    }

    /// `base?k=v&...` from the query parameters, or an empty string when none
    /// are set. Parameters are not percent-encoded.
    pub fn build_url(&self, base: &str) -> String {
        self.query.decorate_url(base)
    }

    /// Send one request and read its response.
    ///
    /// `body` is only used for `ContentKind::Json`; the form kinds build the
    /// body from the form fields.
    pub fn request(
        &mut self,
        target: &str,
        method: HttpMethod,
        content: ContentKind,
        body: &str,
    ) -> Result<(), ClientError> {
        self.response = None;
        let extra_headers = std::mem::take(&mut self.headers);

        let connection = self
            .connection
            .as_mut()
            .filter(|c| c.is_connected())
            .ok_or(ClientError::NotConnected)?;

        let mut req = HttpRequest::new(method, target);
        req.set_header("Host", &connection.host_header());
        if let Some(user_agent) = &self.config.user_agent {
            req.set_header("User-Agent", user_agent);
        }
        for (key, value) in &extra_headers {
            req.set_header(key, value);
        }

        match content {
            ContentKind::Json => {
                req.set_header("Content-Type", JSON_CONTENT_TYPE);
                req.body = body.as_bytes().to_vec();
            }
            ContentKind::FormData => {
                let boundary = form::new_boundary();
                req.set_header(
                    "Content-Type",
                    &format!("multipart/form-data;boundary={boundary}"),
                );
                req.body = self.form.to_multipart(&boundary).into_bytes();
            }
            ContentKind::FormUrlencoded => {
                req.set_header("Content-Type", URLENCODED_CONTENT_TYPE);
                req.body = self.form.to_urlencoded().into_bytes();
            }
        }
        if method == HttpMethod::Post || !req.body.is_empty() {
            let len = req.body.len().to_string();
            req.set_header("Content-Length", &len);
        }

        let bytes = req.to_bytes();
        debug!(%method, path = target, bytes = bytes.len(), "sending request");

        let transport = connection.transport_mut()?;
        transport
            .write_all(&bytes)
            .and_then(|_| transport.flush())
            .map_err(ClientError::Write)?;

        let mut reader = BufReader::new(transport);
        let response = HttpResponse::read_from(&mut reader)?;
        debug!(
            status = response.status,
            bytes = response.body.len(),
            "received response"
        );
        self.response = Some(response);
        Ok(())
    }

    /// Serialize `payload` with serde_json and send it as a `Json` request.
    pub fn request_json<T: Serialize>(
        &mut self,
        target: &str,
        method: HttpMethod,
        payload: &T,
    ) -> Result<(), ClientError> {
        let body = serde_json::to_string(payload)
            .map_err(|e| ClientError::Serialization(e.to_string()))?;
        self.request(target, method, ContentKind::Json, &body)
    }

    pub fn response(&self) -> Result<&HttpResponse, ClientError> {
        self.response.as_ref().ok_or(ClientError::NoResponse)
    }

    pub fn status(&self) -> Result<u16, ClientError> {
        Ok(self.response()?.status)
    }

    pub fn reason(&self) -> Result<&str, ClientError> {
        Ok(&self.response()?.reason)
    }

    pub fn body_bytes(&self) -> Result<&[u8], ClientError> {
        Ok(&self.response()?.body)
    }

    /// The response body as text.
    ///
    /// When the response is `application/x-www-form-urlencoded` and the body
    /// contains `%` or `+`, the percent-decoded body is returned instead.
    /// This is a best-effort guess: a form body that happens to hold a literal
    /// `%` is decoded as well.
    pub fn body(&self) -> Result<String, ClientError> {
        let response = self.response()?;
        let raw = String::from_utf8_lossy(&response.body);
        let is_form = response.header("Content-Type").is_some_and(|ct| {
            ct.to_ascii_lowercase()
                .starts_with(URLENCODED_CONTENT_TYPE)
        });
        if is_form && (raw.contains('%') || raw.contains('+')) {
            Ok(codec::decode_to_string(&raw))
        } else {
            Ok(raw.into_owned())
        }
    }

    /// First response header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Result<Option<&str>, ClientError> {
        Ok(self.response()?.header(name))
    }

    /// Look up `attribute` inside the response header `header_key`
    /// (typically `Set-Cookie`). Returns an empty string when either is
    /// missing.
    pub fn get_cookie(&self, header_key: &str, attribute: &str) -> Result<String, ClientError> {
        Ok(self
            .header(header_key)?
            .map(|value| cookie::find_attribute(value, attribute))
            .unwrap_or_default())
    }
}
