//! HTTP listener setup and request forwarding.
//!
//! # Responsibilities
//! - Create the Axum Router served on every HTTP listener
//! - Wire up middleware (request ID, tracing)
//! - Match the `Host` header against the current route table
//! - Forward requests to the upstream over plain HTTP/1.1

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Uri, Version},
    response::{IntoResponse, Response},
    Router,
};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::engine::routes::RouteTable;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Headers meaningful only for a single hop.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// State injected into the proxy handler.
#[derive(Clone)]
pub struct ProxyState {
    pub routes: Arc<ArcSwap<RouteTable>>,
    pub client: Client<HttpConnector, Body>,
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: ProxyState) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .with_state(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Main proxy handler.
/// Looks up the route by Host and forwards the request.
async fn proxy_handler(State(state): State<ProxyState>, request: Request<Body>) -> Response {
    let table = state.routes.load_full();

    let Some(host) = request_host(&request) else {
        return (StatusCode::BAD_REQUEST, "missing Host header").into_response();
    };
    let Some(route) = table.get(&host) else {
        tracing::debug!(host = %host, "No route matched");
        return (StatusCode::NOT_FOUND, format!("no route for host {host}\n")).into_response();
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (mut parts, body) = request.into_parts();
    let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let uri = match format!("http://{}{}", route.upstream.dial(), path_and_query).parse::<Uri>() {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(host = %host, error = %e, "Failed to build upstream URI");
            return (StatusCode::BAD_GATEWAY, "invalid upstream URI").into_response();
        }
    };

    tracing::debug!(host = %host, upstream = %route.upstream, uri = %uri, "Proxying request");

    parts.uri = uri;
    parts.version = Version::HTTP_11;
    strip_hop_by_hop(&mut parts.headers);
    add_forwarded_headers(&mut parts.headers, peer, &host);

    let forwarded = Request::from_parts(parts, body);
    match tokio::time::timeout(table.request_timeout(), state.client.request(forwarded)).await {
        Ok(Ok(response)) => upstream_response(response),
        Ok(Err(e)) => {
            tracing::warn!(host = %host, upstream = %route.upstream, error = %e, "Upstream error");
            (StatusCode::BAD_GATEWAY, "upstream request failed\n").into_response()
        }
        Err(_) => {
            tracing::warn!(host = %host, upstream = %route.upstream, "Upstream timed out");
            (StatusCode::GATEWAY_TIMEOUT, "upstream timed out\n").into_response()
        }
    }
}

fn upstream_response(response: hyper::Response<hyper::body::Incoming>) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}

/// Host from the `Host` header, falling back to an absolute-form URI.
fn request_host(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().host())
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers listed in Connection are hop-by-hop too.
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

fn add_forwarded_headers(headers: &mut HeaderMap, peer: Option<SocketAddr>, host: &str) {
    if let Some(peer) = peer {
        let ip = peer.ip().to_string();
        let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{prior}, {ip}"),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(host) {
        headers.insert(X_FORWARDED_HOST, value);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
}
