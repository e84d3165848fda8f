//! Body and message types shared by every proxy path.

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::{Request, Response, StatusCode};

/// Body type flowing through the proxy in both directions.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Request handed to hooks and the outbound client.
pub type ProxyRequest = Request<ProxyBody>;

/// Response produced by the outbound client and handed to hooks.
pub type ProxyResponse = Response<ProxyBody>;

/// Create an empty body.
pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Create a body with fixed content.
pub fn full_body(content: impl Into<Bytes>) -> ProxyBody {
    Full::new(content.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Create a plain text error response.
///
/// The connection is marked for closing since the client's request body
/// may not have been consumed.
pub fn error_response(status: StatusCode, message: &str) -> ProxyResponse {
    let mut resp = Response::new(full_body(format!("{}\n", message)));
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    headers.insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        hyper::header::CONNECTION,
        hyper::header::HeaderValue::from_static("close"),
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_response() {
        let resp = error_response(StatusCode::BAD_REQUEST, "Non-proxy request is not supported");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.headers()["connection"], "close");

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Non-proxy request is not supported\n");
    }

    #[tokio::test]
    async fn test_empty_body_is_empty() {
        let body = empty_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }
}
