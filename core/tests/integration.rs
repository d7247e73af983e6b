//! End-to-end tests against live servers on ephemeral ports.
//!
//! # Design
//! The axum mock server runs on a tokio current-thread runtime in a
//! background thread, while the blocking client is driven from the test
//! thread. Misbehaving peers (silent, garbage-speaking) are plain
//! `std::net::TcpListener`s so their timing is fully under test control.
//! HTTPS peers are rustls servers holding an rcgen certificate for
//! `localhost` that the client trusts through `TlsContext::with_roots`.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mock_server::Field;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{RootCertStore, ServerConnection, StreamOwned};
use oneshot_core::{
    ClientConfig, ClientError, ContentKind, ErrorKind, HttpMethod, RequestSession, Scheme,
    TlsContext,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start the mock server on a random port and return its address.
fn spawn_mock_server() -> SocketAddr {
    init_tracing();
    let std_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    addr
}

/// Accept one connection, read whatever arrives, optionally answer with
/// `reply`, then hold the socket open for `hold`.
fn spawn_raw_peer(reply: Option<&'static [u8]>, hold: Duration) -> SocketAddr {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        if let Some(reply) = reply {
            let mut buf = [0u8; 4096];
            let _ = sock.read(&mut buf);
            let _ = sock.write_all(reply);
        }
        thread::sleep(hold);
    });
    addr
}

type TlsServerStream = StreamOwned<ServerConnection, TcpStream>;

/// Issue a self-signed `localhost` certificate and return a server config
/// presenting it plus a client context trusting only it.
fn localhost_tls() -> (Arc<rustls::ServerConfig>, Arc<TlsContext>) {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .self_signed(&key_pair)
        .unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let server = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert.der().clone()], key)
    .unwrap();

    let mut roots = RootCertStore::empty();
    roots.add(cert.der().clone()).unwrap();
    let client = TlsContext::with_roots(roots).unwrap();
    (Arc::new(server), Arc::new(client))
}

/// Accept one TLS connection, finish the handshake, then hand the stream to
/// `serve`. The socket is dropped afterwards without `close_notify` unless
/// `serve` sends one.
fn spawn_tls_peer(config: Arc<rustls::ServerConfig>, serve: fn(&mut TlsServerStream)) -> u16 {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (sock, _) = listener.accept().unwrap();
        let conn = ServerConnection::new(config).unwrap();
        let mut stream = StreamOwned::new(conn, sock);
        while stream.conn.is_handshaking() {
            if stream.conn.complete_io(&mut stream.sock).is_err() {
                return;
            }
        }
        serve(&mut stream);
    });
    port
}

/// Read until the blank line ending a request head.
fn read_request_head(stream: &mut TlsServerStream) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
}

fn connected(addr: SocketAddr) -> RequestSession {
    let mut session = RequestSession::http();
    session.connect(&addr.ip().to_string(), addr.port()).unwrap();
    session
}

fn echoed(session: &RequestSession) -> Vec<(String, String)> {
    let fields: Vec<Field> = serde_json::from_slice(session.body_bytes().unwrap()).unwrap();
    fields.into_iter().map(|f| (f.name, f.value)).collect()
}

fn pair(name: &str, value: &str) -> (String, String) {
    (name.to_string(), value.to_string())
}

#[test]
fn get_hello() {
    let addr = spawn_mock_server();
    let mut session = connected(addr);

    session
        .request("/hello", HttpMethod::Get, ContentKind::Json, "")
        .unwrap();
    assert_eq!(session.status().unwrap(), 200);
    assert_eq!(session.reason().unwrap(), "OK");
    assert_eq!(session.body().unwrap(), "hello");

    session.close();
    session.close();
    assert!(!session.is_connected());
    assert_eq!(session.status().unwrap(), 200, "response outlives the connection");
}

#[test]
fn request_after_close_is_not_connected() {
    let addr = spawn_mock_server();
    let mut session = connected(addr);
    session.close();
    let err = session
        .request("/hello", HttpMethod::Get, ContentKind::Json, "")
        .unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}

#[test]
fn json_body_is_sent_verbatim() {
    let addr = spawn_mock_server();
    let mut session = connected(addr);

    session
        .request(
            "/json",
            HttpMethod::Post,
            ContentKind::Json,
            r#"{"user":"alice","tags":["a","b"]}"#,
        )
        .unwrap();
    assert_eq!(session.status().unwrap(), 200);
    let body: serde_json::Value = serde_json::from_str(&session.body().unwrap()).unwrap();
    assert_eq!(body["user"], "alice");
    assert_eq!(body["tags"][1], "b");
}

#[test]
fn request_json_serializes_payload() {
    #[derive(serde::Serialize)]
    struct Register<'a> {
        user: &'a str,
        age: u32,
    }

    let addr = spawn_mock_server();
    let mut session = connected(addr);
    session
        .request_json("/json", HttpMethod::Post, &Register { user: "bob", age: 41 })
        .unwrap();
    let body: serde_json::Value = serde_json::from_str(&session.body().unwrap()).unwrap();
    assert_eq!(body, serde_json::json!({"user": "bob", "age": 41}));
}

#[test]
fn urlencoded_fields_keep_their_delimiters() {
    let addr = spawn_mock_server();
    let mut session = connected(addr);
    session.set_form_data("user name", "a&b");
    session.set_form_data("pw", "x=y");
    session.set_form_data("note", "100% sure");

    session
        .request("/form", HttpMethod::Post, ContentKind::FormUrlencoded, "")
        .unwrap();
    assert_eq!(session.status().unwrap(), 200);
    assert_eq!(
        echoed(&session),
        [pair("user name", "a&b"), pair("pw", "x=y"), pair("note", "100% sure")]
    );
}

#[test]
fn multipart_fields_arrive_in_order() {
    let addr = spawn_mock_server();
    let mut session = connected(addr);
    session.set_form_data("a", "1");
    session.set_form_data("b", "two words");
    session.set_form_data("a", "3");

    session
        .request("/multipart", HttpMethod::Post, ContentKind::FormData, "")
        .unwrap();
    assert_eq!(session.status().unwrap(), 200);
    assert_eq!(echoed(&session), [pair("a", "3"), pair("b", "two words")]);
}

#[test]
fn form_fields_persist_across_requests() {
    let addr = spawn_mock_server();
    let mut session = connected(addr);
    session.set_form_data("k", "v");
    session
        .request("/form", HttpMethod::Post, ContentKind::FormUrlencoded, "")
        .unwrap();

    session.connect(&addr.ip().to_string(), addr.port()).unwrap();
    session
        .request("/multipart", HttpMethod::Post, ContentKind::FormData, "")
        .unwrap();
    assert_eq!(echoed(&session), [pair("k", "v")]);
}

#[test]
fn decorated_url_carries_query_params() {
    let addr = spawn_mock_server();
    let mut session = connected(addr);
    session.set_url_request_param("q", "rust");
    session.set_url_request_param("page", "2");

    let url = session.build_url("/search");
    assert_eq!(url, "/search?q=rust&page=2");
    session
        .request(&url, HttpMethod::Get, ContentKind::Json, "")
        .unwrap();
    assert_eq!(echoed(&session), [pair("q", "rust"), pair("page", "2")]);
}

#[test]
fn login_cookie_is_extracted() {
    let addr = spawn_mock_server();
    let mut session = connected(addr);
    session.set_form_data("user", "alice");
    session.set_form_data("password", "secret");

    session
        .request("/login", HttpMethod::Post, ContentKind::FormUrlencoded, "")
        .unwrap();
    assert_eq!(session.status().unwrap(), 200);
    let sid = session.get_cookie("Set-Cookie", "sid").unwrap();
    assert_eq!(sid.len(), 32);
    assert!(sid.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(session.get_cookie("Set-Cookie", "Path").unwrap(), "/");
    assert_eq!(session.get_cookie("Set-Cookie", "Expires").unwrap(), "");
}

#[test]
fn urlencoded_response_body_is_decoded() {
    let addr = spawn_mock_server();
    let mut session = connected(addr);
    session
        .request("/reply/urlencoded", HttpMethod::Get, ContentKind::Json, "")
        .unwrap();
    assert_eq!(session.body().unwrap(), "msg=hello world!&lang=en");
    assert_eq!(session.body_bytes().unwrap(), b"msg=hello+world%21&lang=en");
}

#[test]
fn headers_reach_the_server_once() {
    let addr = spawn_mock_server();
    let config = ClientConfig::default().with_user_agent("oneshot-test/1.0");
    let mut session = RequestSession::new(Scheme::Http, config);
    session.connect("127.0.0.1", addr.port()).unwrap();
    session.set_header("X-Trace", "abc");

    session
        .request("/headers", HttpMethod::Get, ContentKind::Json, "")
        .unwrap();
    let headers = echoed(&session);
    assert!(headers.contains(&pair("host", &format!("127.0.0.1:{}", addr.port()))));
    assert!(headers.contains(&pair("user-agent", "oneshot-test/1.0")));
    assert!(headers.contains(&pair("x-trace", "abc")));

    session.connect("127.0.0.1", addr.port()).unwrap();
    session
        .request("/headers", HttpMethod::Get, ContentKind::Json, "")
        .unwrap();
    assert!(!echoed(&session).iter().any(|(name, _)| name == "x-trace"));
}

#[test]
fn error_status_keeps_reason_phrase() {
    let addr = spawn_mock_server();
    let mut session = connected(addr);
    session
        .request("/status/404", HttpMethod::Get, ContentKind::Json, "")
        .unwrap();
    assert_eq!(session.status().unwrap(), 404);
    assert_eq!(session.reason().unwrap(), "Not Found");
    assert_eq!(session.body().unwrap(), "");
}

#[test]
fn connect_to_unroutable_address_times_out() {
    init_tracing();
    let mut session = RequestSession::http();
    let start = Instant::now();
    let err = session.connect("10.255.255.1", 81).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connect);
    assert!(start.elapsed() < Duration::from_secs(5), "took {:?}", start.elapsed());
}

#[test]
fn tls_against_plain_http_fails_handshake() {
    let addr = spawn_mock_server();
    let tls = Arc::new(TlsContext::with_webpki_roots().unwrap());
    let config = ClientConfig::default().with_handshake_timeout(Duration::from_secs(2));
    let mut session = RequestSession::new(Scheme::Https(tls), config);

    let err = session.connect("127.0.0.1", addr.port()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Handshake);
    assert!(!session.is_connected());
}

#[test]
fn silent_tls_peer_hits_handshake_timeout() {
    let addr = spawn_raw_peer(None, Duration::from_secs(5));
    let tls = Arc::new(TlsContext::with_webpki_roots().unwrap());
    let config = ClientConfig::default().with_handshake_timeout(Duration::from_millis(300));
    let mut session = RequestSession::new(Scheme::Https(tls), config);

    let start = Instant::now();
    let err = session.connect("127.0.0.1", addr.port()).unwrap_err();
    match err {
        ClientError::Handshake { source, .. } => {
            assert_eq!(source.kind(), std::io::ErrorKind::TimedOut)
        }
        other => panic!("expected handshake timeout, got {other}"),
    }
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[test]
fn silent_peer_hits_read_timeout() {
    let addr = spawn_raw_peer(None, Duration::from_secs(5));
    let config = ClientConfig::default().with_read_timeout(Duration::from_millis(200));
    let mut session = RequestSession::new(Scheme::Http, config);
    session.connect("127.0.0.1", addr.port()).unwrap();

    let err = session
        .request("/", HttpMethod::Get, ContentKind::Json, "")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Read);
    assert!(matches!(session.status(), Err(ClientError::NoResponse)));
}

#[test]
fn garbage_reply_is_malformed() {
    let addr = spawn_raw_peer(Some(b"SSH-2.0-OpenSSH_9.6\r\n\r\n"), Duration::from_secs(1));
    let mut session = connected(addr);
    let err = session
        .request("/", HttpMethod::Get, ContentKind::Json, "")
        .unwrap_err();
    assert!(matches!(err, ClientError::MalformedResponse(_)));
    assert_eq!(err.kind(), ErrorKind::Read);
}

#[test]
fn raw_response_without_content_length_reads_to_close() {
    let addr = spawn_raw_peer(
        Some(b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nstreamed until close"),
        Duration::ZERO,
    );
    let mut session = connected(addr);
    session
        .request("/", HttpMethod::Get, ContentKind::Json, "")
        .unwrap();
    assert_eq!(session.body().unwrap(), "streamed until close");
}

#[test]
fn https_get_round_trip() {
    let (server, client) = localhost_tls();
    let port = spawn_tls_peer(server, |stream| {
        read_request_head(stream);
        let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
        stream.conn.send_close_notify();
        let _ = stream.flush();
    });

    let mut session = RequestSession::https(client);
    session.connect("localhost", port).unwrap();
    session
        .request("/hello", HttpMethod::Get, ContentKind::Json, "")
        .unwrap();
    assert_eq!(session.status().unwrap(), 200);
    assert_eq!(session.body().unwrap(), "hello");

    session.close();
    session.close();
    assert!(!session.is_connected());
}

#[test]
fn https_body_ends_when_peer_closes_without_close_notify() {
    let (server, client) = localhost_tls();
    let port = spawn_tls_peer(server, |stream| {
        read_request_head(stream);
        let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nuntil close");
        let _ = stream.flush();
    });

    let mut session = RequestSession::https(client);
    session.connect("localhost", port).unwrap();
    session
        .request("/", HttpMethod::Get, ContentKind::Json, "")
        .unwrap();
    assert_eq!(session.body().unwrap(), "until close");
    session.close();
}

#[test]
fn https_close_returns_when_peer_stops_reading() {
    let (server, client) = localhost_tls();
    let port = spawn_tls_peer(server, |_| thread::sleep(Duration::from_secs(10)));

    let config = ClientConfig::default().with_read_timeout(Duration::from_millis(200));
    let mut session = RequestSession::new(Scheme::Https(client), config);
    session.connect("localhost", port).unwrap();

    // Enough to fill both socket buffers while the peer is not reading.
    let body = "x".repeat(32 << 20);
    let err = session
        .request("/upload", HttpMethod::Post, ContentKind::Json, &body)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Write);

    let start = Instant::now();
    session.close();
    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(!session.is_connected());
}
