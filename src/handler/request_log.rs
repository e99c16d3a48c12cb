use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header::CONTENT_LENGTH, Request},
    middleware::Next,
    response::Response,
};
use std::{net::SocketAddr, time::Instant};
use tracing::info;

const SKIP_PATHS: &[&str] = &["/health"];

pub async fn log_requests(req: Request<Body>, next: Next) -> Response {
    let started_at = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().to_string();
    let path = req.uri().path().to_string();
    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "-".to_string());

    let response = next.run(req).await;

    if SKIP_PATHS.contains(&path.as_str()) {
        return response;
    }
    let body_len = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string();
    info!(
        target: "http.access",
        method = method.as_str(),
        status = response.status().as_u16(),
        body_len = body_len.as_str(),
        cost_ms = started_at.elapsed().as_secs_f64() * 1_000.0,
        uri = uri.as_str(),
        client_ip = client_ip.as_str(),
    );
    response
}
