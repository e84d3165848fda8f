//! Header utilities for forwarding requests.
//!
//! A forward proxy must not pass hop-by-hop headers, or headers that only
//! make sense between the client and the proxy, on to the origin.

use hyper::header::{self, HeaderMap, HeaderName};

/// Headers stripped from every outbound request.
///
/// `Accept-Encoding` is included so origins answer with identity encoding
/// and hooks see bodies they can read.
pub static PROXY_HEADERS: [HeaderName; 5] = [
    header::ACCEPT_ENCODING,
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::CONNECTION,
];

/// Append every header of `src` to `dst`, keeping repeated values.
pub fn copy_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        dst.append(name.clone(), value.clone());
    }
}

/// Copy headers for forwarding and strip the proxy-only ones.
pub fn copy_headers_for_proxy(dst: &mut HeaderMap, src: &HeaderMap) {
    copy_headers(dst, src);
    remove_proxy_headers(dst);
}

/// Remove all proxy-only headers.
pub fn remove_proxy_headers(headers: &mut HeaderMap) {
    for name in PROXY_HEADERS.iter() {
        headers.remove(name);
    }
}

/// Strip the port from a `host[:port]` string.
///
/// Bracketed IPv6 literals lose their brackets; a bare IPv6 literal
/// (more than one colon, no brackets) is returned unchanged.
pub fn parse_hostname(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split_once(']').map_or(rest, |(addr, _)| addr);
    }

    match host.split_once(':') {
        Some((name, port)) if !port.contains(':') => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    #[test]
    fn test_parse_hostname() {
        let cases = [
            ("example.com", "example.com"),
            ("example.com:8080", "example.com"),
            ("www.example.com:8080", "www.example.com"),
            ("127.0.0.1:443", "127.0.0.1"),
            ("[::1]:443", "::1"),
            ("[::1]", "::1"),
            ("::1", "::1"),
        ];

        for (host, expected) in cases {
            assert_eq!(parse_hostname(host), expected, "parsing {host}");
        }
    }

    #[test]
    fn test_remove_proxy_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("Accept-Encoding", HeaderValue::from_static("gzip"));
        headers.insert("Proxy-Connection", HeaderValue::from_static("keep-alive"));
        headers.insert("Proxy-Authenticate", HeaderValue::from_static("Basic"));
        headers.insert("Proxy-Authorization", HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        headers.insert("Connection", HeaderValue::from_static("keep-alive"));
        headers.insert("User-Agent", HeaderValue::from_static("curl/8.0"));

        remove_proxy_headers(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers["user-agent"], "curl/8.0");
    }

    #[test]
    fn test_copy_headers_keeps_repeated_values() {
        let mut src = HeaderMap::new();
        src.append("Set-Cookie", HeaderValue::from_static("a=1"));
        src.append("Set-Cookie", HeaderValue::from_static("b=2"));

        let mut dst = HeaderMap::new();
        dst.insert("Set-Cookie", HeaderValue::from_static("z=0"));
        copy_headers(&mut dst, &src);

        let cookies: Vec<_> = dst.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, ["z=0", "a=1", "b=2"]);
    }

    #[test]
    fn test_copy_headers_for_proxy() {
        let mut src = HeaderMap::new();
        src.insert("Connection", HeaderValue::from_static("close"));
        src.insert("Accept", HeaderValue::from_static("*/*"));

        let mut dst = HeaderMap::new();
        copy_headers_for_proxy(&mut dst, &src);

        assert!(dst.get("connection").is_none());
        assert_eq!(dst["accept"], "*/*");
    }
}
