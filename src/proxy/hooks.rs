//! Extension points around every proxied exchange.
//!
//! Each exchange runs, in order and at most once each:
//!
//! 1. request rewrite: after proxy headers are stripped
//! 2. send: the override if present, else the server's outbound client
//! 3. response rewrite: before the response is written to the client
//!
//! Plain closures implement the hook traits, so embedding code can write
//! `builder.on_request(|req: ProxyRequest| req)`.

use super::body::{ProxyRequest, ProxyResponse};
use super::error::ProxyResult;
use hyper::header::{HeaderName, HeaderValue};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by [`Outbound::send`].
pub type OutboundFuture = Pin<Box<dyn Future<Output = ProxyResult<ProxyResponse>> + Send>>;

/// Capability to send a request to its origin and return the response.
pub trait Outbound: Send + Sync {
    /// Send `request`, resolving to the origin's response.
    fn send(&self, request: ProxyRequest) -> OutboundFuture;
}

impl<F, Fut> Outbound for F
where
    F: Fn(ProxyRequest) -> Fut + Send + Sync,
    Fut: Future<Output = ProxyResult<ProxyResponse>> + Send + 'static,
{
    fn send(&self, request: ProxyRequest) -> OutboundFuture {
        Box::pin(self(request))
    }
}

/// Rewrites an outbound request before it is sent.
pub trait RequestHook: Send + Sync {
    /// Return the request to send in place of `request`.
    fn rewrite(&self, request: ProxyRequest) -> ProxyRequest;
}

impl<F> RequestHook for F
where
    F: Fn(ProxyRequest) -> ProxyRequest + Send + Sync,
{
    fn rewrite(&self, request: ProxyRequest) -> ProxyRequest {
        self(request)
    }
}

/// Rewrites an origin response before it reaches the client.
pub trait ResponseHook: Send + Sync {
    /// Return the response to deliver in place of `response`.
    fn rewrite(&self, response: ProxyResponse) -> ProxyResponse;
}

impl<F> ResponseHook for F
where
    F: Fn(ProxyResponse) -> ProxyResponse + Send + Sync,
{
    fn rewrite(&self, response: ProxyResponse) -> ProxyResponse {
        self(response)
    }
}

/// Header set on outbound requests by [`Hooks::tagging`].
pub const REQUEST_TAG_HEADER: HeaderName = HeaderName::from_static("x-kproxy-request");

/// Header set on client responses by [`Hooks::tagging`].
pub const RESPONSE_TAG_HEADER: HeaderName = HeaderName::from_static("x-kproxy-response");

/// The optional hooks of a proxy server.
#[derive(Clone, Default)]
pub struct Hooks {
    rewrite_request: Option<Arc<dyn RequestHook>>,
    send_override: Option<Arc<dyn Outbound>>,
    rewrite_response: Option<Arc<dyn ResponseHook>>,
}

impl Hooks {
    /// No hooks: requests go straight to the outbound client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hooks that mark traffic passing through the proxy.
    ///
    /// Outbound requests get `X-KPROXY-REQUEST: ABC`, responses get
    /// `X-KPROXY-RESPONSE: XYZ`. Handy for checking interception end to end.
    pub fn tagging() -> Self {
        Self::new()
            .with_request_rewrite(|mut req: ProxyRequest| {
                req.headers_mut()
                    .insert(REQUEST_TAG_HEADER, HeaderValue::from_static("ABC"));
                req
            })
            .with_response_rewrite(|mut resp: ProxyResponse| {
                resp.headers_mut()
                    .insert(RESPONSE_TAG_HEADER, HeaderValue::from_static("XYZ"));
                resp
            })
    }

    /// Set the request rewrite hook.
    pub fn with_request_rewrite(mut self, hook: impl RequestHook + 'static) -> Self {
        self.rewrite_request = Some(Arc::new(hook));
        self
    }

    /// Replace the outbound send operation.
    pub fn with_send_override(mut self, send: impl Outbound + 'static) -> Self {
        self.send_override = Some(Arc::new(send));
        self
    }

    /// Set the response rewrite hook.
    pub fn with_response_rewrite(mut self, hook: impl ResponseHook + 'static) -> Self {
        self.rewrite_response = Some(Arc::new(hook));
        self
    }

    /// Whether the send operation is overridden.
    pub fn overrides_send(&self) -> bool {
        self.send_override.is_some()
    }

    pub(crate) fn rewrite_request(&self, request: ProxyRequest) -> ProxyRequest {
        match &self.rewrite_request {
            Some(hook) => hook.rewrite(request),
            None => request,
        }
    }

    pub(crate) async fn send(
        &self,
        client: &dyn Outbound,
        request: ProxyRequest,
    ) -> ProxyResult<ProxyResponse> {
        match &self.send_override {
            Some(send) => send.send(request).await,
            None => client.send(request).await,
        }
    }

    pub(crate) fn rewrite_response(&self, response: ProxyResponse) -> ProxyResponse {
        match &self.rewrite_response {
            Some(hook) => hook.rewrite(response),
            None => response,
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("rewrite_request", &self.rewrite_request.is_some())
            .field("send_override", &self.send_override.is_some())
            .field("rewrite_response", &self.rewrite_response.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::body::{empty_body, full_body};
    use crate::proxy::error::ProxyError;
    use hyper::{Request, Response};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> ProxyRequest {
        Request::builder()
            .uri("http://example.com/")
            .body(empty_body())
            .unwrap()
    }

    fn ok_client() -> impl Outbound {
        |_req: ProxyRequest| async { Ok::<_, ProxyError>(Response::new(full_body("origin"))) }
    }

    #[tokio::test]
    async fn test_empty_hooks_pass_through() {
        let hooks = Hooks::new();
        let req = hooks.rewrite_request(request());
        let resp = hooks.send(&ok_client(), req).await.unwrap();
        let resp = hooks.rewrite_response(resp);
        assert_eq!(resp.status(), 200);
        assert!(!hooks.overrides_send());
    }

    #[tokio::test]
    async fn test_send_override_replaces_client() {
        let client_calls = Arc::new(AtomicUsize::new(0));
        let counter = client_calls.clone();
        let client = move |_req: ProxyRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<ProxyResponse, _>(ProxyError::Upstream("unreachable".into())) }
        };

        let hooks = Hooks::new().with_send_override(|_req: ProxyRequest| async {
            let mut resp = Response::new(empty_body());
            *resp.status_mut() = hyper::StatusCode::IM_A_TEAPOT;
            Ok::<_, ProxyError>(resp)
        });

        let resp = hooks.send(&client, request()).await.unwrap();
        assert_eq!(resp.status(), 418);
        assert_eq!(client_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tagging_hooks() {
        let hooks = Hooks::tagging();

        let req = hooks.rewrite_request(request());
        assert_eq!(req.headers()[REQUEST_TAG_HEADER], "ABC");

        let resp = hooks.send(&ok_client(), req).await.unwrap();
        let resp = hooks.rewrite_response(resp);
        assert_eq!(resp.headers()[RESPONSE_TAG_HEADER], "XYZ");
    }
}
