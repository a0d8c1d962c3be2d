//! Responses generated by the ingress itself.
//!
//! # Design Decisions
//! - Denied requests look like a plain "not found", revealing no rules
//! - Forwarding failures never leak internal error detail to the caller

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};

/// Body of a denied request.
pub const NOT_FOUND_BODY: &str = "404 page not found\n";

pub fn not_found() -> Response<Body> {
    let mut response = Response::new(Body::from(NOT_FOUND_BODY));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

pub fn bad_gateway() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
}
