use crate::forward_auth::{ForwardAuthEngine, ForwardedRequest};
use axum::{
    extract::{ConnectInfo, Extension, Request},
    response::IntoResponse,
};
use std::net::SocketAddr;

#[utoipa::path(
    method(get, post, put, patch, delete, head, options),
    path = "/forward-auth",
    params(
        ("X-Forwarded-Method" = Option<String>, Header, description = "Original request method"),
        ("X-Forwarded-Proto" = Option<String>, Header, description = "Original request scheme"),
        ("X-Forwarded-Host" = Option<String>, Header, description = "Original request host"),
        ("X-Forwarded-Uri" = Option<String>, Header, description = "Original path and query"),
        ("X-Forwarded-For" = Option<String>, Header, description = "Client address chain, honoured from trusted proxies only")
    ),
    responses(
        (status = 200, description = "Allowed; identity is carried in remote-* headers"),
        (status = 302, description = "Login or refresh required (HTML clients)"),
        (status = 403, description = "Denied, or redirect location for non-HTML clients"),
        (status = 500, description = "Decision could not be made")
    ),
    tag = "forward-auth"
)]
pub async fn forward_auth(
    engine: Extension<ForwardAuthEngine>,
    request: Request,
) -> impl IntoResponse {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let (parts, _body) = request.into_parts();
    let forwarded = ForwardedRequest::from_headers(parts.headers, peer, engine.trusted_networks());
    engine.decide(&forwarded).await
}
