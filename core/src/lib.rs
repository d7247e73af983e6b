//! Blocking, single-shot HTTP and HTTPS client.
//!
//! # Overview
//! A `RequestSession` connects to one endpoint over plain TCP or TLS, sends
//! one request whose body is JSON, `multipart/form-data` or
//! `application/x-www-form-urlencoded`, reads one response, and exposes its
//! status, reason phrase, body, headers and cookie attributes.
//!
//! # Design
//! - `Connection` owns the socket and is the only place that does I/O setup:
//!   resolve, timeout-bounded connect, timeout-bounded TLS handshake, close.
//! - `Transport` is a closed enum over the plain and TLS streams, picked by
//!   `Scheme` at construction.
//! - `http` holds the wire types and can be tested without a socket.
//! - Everything blocks the calling thread. There is no pooling, retry,
//!   redirect handling or chunked decoding.

pub mod codec;
pub mod config;
pub mod cookie;
pub mod error;
pub mod form;
pub mod http;
pub mod session;
pub mod transport;

pub use config::ClientConfig;
pub use error::{ClientError, ErrorKind};
pub use form::FieldSet;
pub use http::{ContentKind, HttpMethod, HttpRequest, HttpResponse};
pub use session::RequestSession;
pub use transport::{Connection, Scheme, TlsContext, Transport};
