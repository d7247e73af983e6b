//! HTTP fixture for exercising the blocking client end to end.
//!
//! Every route reflects what it received back as JSON so tests can assert on
//! exactly what went over the wire.

use axum::{
    extract::{Multipart, Path, Query},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use uuid::Uuid;

/// One name/value pair as echoed by the form, multipart, query and header
/// routes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
}

pub fn app() -> Router {
    Router::new()
        .route("/hello", get(hello))
        .route("/headers", get(echo_headers).post(echo_headers))
        .route("/json", post(echo_json))
        .route("/form", post(echo_form))
        .route("/multipart", post(echo_multipart))
        .route("/search", get(echo_query))
        .route("/login", post(login))
        .route("/reply/urlencoded", get(urlencoded_reply))
        .route("/status/{code}", get(status))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn fields(pairs: Vec<(String, String)>) -> Json<Vec<Field>> {
    Json(
        pairs
            .into_iter()
            .map(|(name, value)| Field { name, value })
            .collect(),
    )
}

async fn hello() -> &'static str {
    "hello"
}

async fn echo_headers(headers: HeaderMap) -> Json<Vec<Field>> {
    fields(
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect(),
    )
}

async fn echo_json(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    Json(body)
}

async fn echo_form(Form(pairs): Form<Vec<(String, String)>>) -> Json<Vec<Field>> {
    fields(pairs)
}

async fn echo_multipart(mut multipart: Multipart) -> Result<Json<Vec<Field>>, StatusCode> {
    let mut pairs = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        let name = field.name().unwrap_or_default().to_string();
        let value = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
        pairs.push((name, value));
    }
    Ok(fields(pairs))
}

async fn echo_query(Query(pairs): Query<Vec<(String, String)>>) -> Json<Vec<Field>> {
    fields(pairs)
}

#[derive(Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// Accepts `user=alice&password=secret` and answers with a session cookie.
async fn login(Form(input): Form<Credentials>) -> impl IntoResponse {
    if input.user != "alice" || input.password != "secret" {
        return (StatusCode::UNAUTHORIZED, HeaderMap::new(), "bad credentials").into_response();
    }
    let mut headers = HeaderMap::new();
    let cookie = format!("sid={}; Path=/; HttpOnly", Uuid::new_v4().simple());
    if let Ok(value) = cookie.parse() {
        headers.insert(header::SET_COOKIE, value);
    }
    (StatusCode::OK, headers, "welcome").into_response()
}

async fn urlencoded_reply() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/x-www-form-urlencoded")],
        "msg=hello+world%21&lang=en",
    )
}

async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}
