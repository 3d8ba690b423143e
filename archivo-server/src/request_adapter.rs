//! Converts a parsed `hyper` request into the core's `OwnedRequest` view, and a
//! `RenderedResponse` back into a `hyper` response. This is the one place the host
//! runtime's concrete request/response types meet the `RequestView` capability seam
//! (archivo-core/src/request.rs).

use archivo_core::request::{Method as CoreMethod, OwnedRequest};
use archivo_plugin::RenderedResponse;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};

pub type BoxedBody = BoxBody<Bytes, hyper::Error>;

pub fn empty_body() -> BoxedBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

pub fn full_body(data: Vec<u8>) -> BoxedBody {
    Full::new(Bytes::from(data))
        .map_err(|never| match never {})
        .boxed()
}

/// Build an `OwnedRequest` from an incoming request, forwarding every header. `scheme`
/// is supplied by the caller since it's a property of the connection (plain vs.
/// MITM-terminated), not of the request line itself.
pub fn owned_request_from(req: &Request<Incoming>, scheme: &str, host: &str) -> OwnedRequest {
    let method = CoreMethod::from_str(req.method().as_str());
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut owned = OwnedRequest::new(method, scheme, host, path);
    for (name, value) in req.headers() {
        if let Ok(v) = value.to_str() {
            owned.header_set(name.as_str(), v.to_string());
        }
    }
    owned
}

/// Resolve the target host for `req`: the request-target's authority when present
/// (absolute-form, used by plain forward-proxy requests), falling back to the `Host`
/// header (origin-form, used for requests decrypted inside a MITM tunnel).
pub fn target_host(req: &Request<Incoming>) -> Option<String> {
    if let Some(authority) = req.uri().authority() {
        return Some(strip_default_port(authority.as_str()));
    }
    req.headers()
        .get(hyper::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(strip_default_port)
}

fn strip_default_port(authority: &str) -> String {
    authority.to_string()
}

pub fn response_from_rendered(rendered: RenderedResponse) -> Response<BoxedBody> {
    let mut builder = Response::builder().status(rendered.status);
    for (name, value) in &rendered.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(full_body(rendered.body))
        .unwrap_or_else(|_| Response::new(empty_body()))
}
