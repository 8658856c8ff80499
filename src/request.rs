//! GET request serialization.
//!
//! Two shapes: the origin form (`GET /path`) for direct, SOCKS5 and tunneled
//! connections, and the absolute form (`GET http://host/path`) when a plain
//! HTTP proxy relays the request. In the latter case the connect target is
//! switched to the proxy, which is reflected in the returned target tuple.

use crate::proxy::{ProxyKind, ProxySettings};
use crate::url::{base64_encode, ParsedUrl};

/// A serialized request plus the host/port to actually connect to.
#[derive(Debug)]
pub(crate) struct BuiltRequest {
    pub text: String,
    pub host: String,
    pub port: u16,
    pub ssl: bool,
}

pub(crate) fn build_get_request(
    url: &str,
    parsed: &ParsedUrl,
    proxy: Option<&ProxySettings>,
    user_agent: &str,
    auth: &str,
    bottled: bool,
) -> BuiltRequest {
    let ssl = parsed.scheme == "https";
    let default_port = if ssl { 443 } else { 80 };
    let port = parsed.port.unwrap_or(default_port);

    let mut request = String::with_capacity(256);
    let mut host = parsed.host.clone();
    let mut connect_port = port;

    // TLS requests through an HTTP proxy tunnel at the stream layer instead.
    let http_proxy = if ssl { None } else { proxy.filter(|p| p.is_http()) };
    if let Some(p) = http_proxy {
        request.push_str("GET ");
        request.push_str(url);
        request.push_str(" HTTP/1.1\r\n");
        if p.kind == ProxyKind::HttpPw {
            request.push_str("Proxy-Authorization: Basic ");
            request.push_str(&base64_encode(&p.credentials()));
            request.push_str("\r\n");
        }
        host = p.host.clone();
        connect_port = p.port;
    } else {
        request.push_str("GET ");
        request.push_str(&parsed.path);
        request.push_str(" HTTP/1.1\r\n");
    }

    request.push_str("Host: ");
    request.push_str(&parsed.host);
    if port != default_port {
        request.push_str(&format!(":{port}"));
    }
    request.push_str("\r\n");

    if !user_agent.is_empty() {
        request.push_str("User-Agent: ");
        request.push_str(user_agent);
        request.push_str("\r\n");
    }

    if bottled {
        request.push_str("Accept-Encoding: gzip\r\n");
    }

    if !auth.is_empty() {
        request.push_str("Authorization: Basic ");
        request.push_str(&base64_encode(auth));
        request.push_str("\r\n");
    }

    request.push_str("Connection: close\r\n\r\n");

    BuiltRequest {
        text: request,
        host,
        port: connect_port,
        ssl,
    }
}
