//! HTTP ⇄ NATS message mapping for the bus tunnel.
//!
//! HTTP metadata travels in NATS headers; the body is the raw payload.
//!
//! ```text
//! request:  Nats-Http-Method, Nats-Http-Path, <http request headers>  | body
//! response: Nats-Http-Status, <http response headers>                  | body
//! ```

use async_nats::HeaderMap as BusHeaders;
use axum::body::Body;
use axum::http::{
    header::{HeaderMap, HeaderName, HeaderValue},
    request, response, Method, Request, Response, StatusCode, Uri,
};
use bytes::Bytes;

use super::TransportError;

pub const METHOD_HEADER: &str = "Nats-Http-Method";
pub const PATH_HEADER: &str = "Nats-Http-Path";
pub const STATUS_HEADER: &str = "Nats-Http-Status";

/// Subject a request for `uri` is published on: `<prefix>.<host token>`.
pub fn subject_for(prefix: &str, uri: &Uri) -> Result<String, TransportError> {
    let authority = uri
        .authority()
        .ok_or_else(|| TransportError::Encode(format!("request uri {uri} has no host")))?;
    let token: String = authority
        .as_str()
        .chars()
        .map(|c| match c {
            '.' | ':' => '_',
            c => c,
        })
        .collect();
    Ok(format!("{prefix}.{token}"))
}

/// Subject pattern covering every host under `prefix`.
pub fn wildcard_subject(prefix: &str) -> String {
    format!("{prefix}.>")
}

pub fn encode_request(parts: &request::Parts) -> Result<BusHeaders, TransportError> {
    let path = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str());

    let mut headers = copy_to_bus(&parts.headers).map_err(TransportError::Encode)?;
    headers.insert(METHOD_HEADER, parts.method.as_str());
    headers.insert(PATH_HEADER, path);
    Ok(headers)
}

/// Rebuild a tunnelled request. The URI is origin-form (path and query only).
pub fn decode_request(headers: Option<&BusHeaders>, payload: Bytes) -> Result<Request<Body>, TransportError> {
    let headers = headers.ok_or_else(|| TransportError::Decode("request carries no headers".into()))?;

    let method = required(headers, METHOD_HEADER)?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|e| TransportError::Decode(format!("bad method {method:?}: {e}")))?;

    let path = required(headers, PATH_HEADER)?;
    if !path.starts_with('/') {
        return Err(TransportError::Decode(format!("path {path:?} is not origin-form")));
    }
    let uri: Uri = path
        .parse()
        .map_err(|e| TransportError::Decode(format!("bad path {path:?}: {e}")))?;

    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(payload))
        .map_err(|e| TransportError::Decode(e.to_string()))?;
    *request.headers_mut() = copy_from_bus(headers)?;
    Ok(request)
}

pub fn encode_response(parts: &response::Parts) -> Result<BusHeaders, TransportError> {
    let mut headers = copy_to_bus(&parts.headers).map_err(TransportError::Encode)?;
    headers.insert(STATUS_HEADER, parts.status.as_str());
    Ok(headers)
}

pub fn decode_response(headers: Option<&BusHeaders>, payload: Bytes) -> Result<Response<Body>, TransportError> {
    let headers = headers.ok_or_else(|| TransportError::Decode("reply carries no headers".into()))?;

    let status = required(headers, STATUS_HEADER)?;
    let status = status
        .parse::<u16>()
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| TransportError::Decode(format!("bad status {status:?}")))?;

    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = status;
    *response.headers_mut() = copy_from_bus(headers)?;
    Ok(response)
}

/// Bytes `headers` occupy on the wire, including the `NATS/1.0` line and
/// the terminating blank line.
pub fn encoded_header_len(headers: &BusHeaders) -> usize {
    let mut len = "NATS/1.0\r\n".len() + "\r\n".len();
    for (name, values) in headers.iter() {
        let name: &str = name.as_ref();
        for value in values {
            len += name.len() + ": ".len() + value.as_str().len() + "\r\n".len();
        }
    }
    len
}

/// Buffer `body` so that it fits in one message next to `headers`.
///
/// The server counts headers and payload together against `max_payload`.
pub async fn buffer_body(body: Body, headers: &BusHeaders, max_payload: usize) -> Result<Bytes, TransportError> {
    let header_len = encoded_header_len(headers);
    let budget = max_payload.checked_sub(header_len).ok_or_else(|| {
        TransportError::Encode(format!(
            "headers take {header_len} bytes, over the {max_payload} byte message limit"
        ))
    })?;

    axum::body::to_bytes(body, budget).await.map_err(|e| {
        TransportError::Encode(format!(
            "body exceeds the {budget} bytes left in a {max_payload} byte message: {e}"
        ))
    })
}

fn required<'a>(headers: &'a BusHeaders, name: &str) -> Result<&'a str, TransportError> {
    headers
        .get(name)
        .map(|v| v.as_str())
        .ok_or_else(|| TransportError::Decode(format!("missing {name} header")))
}

fn is_tunnel_header(name: &str) -> bool {
    [METHOD_HEADER, PATH_HEADER, STATUS_HEADER]
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn copy_to_bus(headers: &HeaderMap) -> Result<BusHeaders, String> {
    let mut out = BusHeaders::new();
    for (name, value) in headers {
        let value = value
            .to_str()
            .map_err(|_| format!("header {name} is not valid text"))?;
        out.append(name.as_str(), value);
    }
    Ok(out)
}

fn copy_from_bus(headers: &BusHeaders) -> Result<HeaderMap, TransportError> {
    let mut out = HeaderMap::new();
    for (name, values) in headers.iter() {
        let name = name.to_string();
        if is_tunnel_header(&name) {
            continue;
        }
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransportError::Decode(format!("bad header name {name:?}")))?;
        for value in values {
            let value = HeaderValue::from_str(value.as_str())
                .map_err(|_| TransportError::Decode(format!("bad value for header {name}")))?;
            out.append(header.clone(), value);
        }
    }
    Ok(out)
}
