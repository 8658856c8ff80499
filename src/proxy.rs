//! Proxy settings carried by one request.

/// Proxy protocol selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyKind {
    /// Direct connection.
    #[default]
    None,
    /// SOCKS5 without authentication.
    Socks5,
    /// SOCKS5 with username/password authentication.
    Socks5Pw,
    /// HTTP proxy.
    Http,
    /// HTTP proxy with Basic authentication.
    HttpPw,
}

/// Snapshot of the proxy configuration for one request. Copied when the
/// request starts and carried across redirects unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProxySettings {
    /// Proxy protocol.
    pub kind: ProxyKind,
    /// Proxy host (name or IP literal).
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Username for authenticating proxy kinds.
    pub username: String,
    /// Password for authenticating proxy kinds.
    pub password: String,
    /// Ask a SOCKS5 proxy to resolve destination names itself.
    pub proxy_hostnames: bool,
}

impl ProxySettings {
    /// Whether the request is routed through a SOCKS5 proxy.
    pub fn is_socks5(&self) -> bool {
        matches!(self.kind, ProxyKind::Socks5 | ProxyKind::Socks5Pw)
    }

    /// Whether the request is routed through an HTTP proxy.
    pub fn is_http(&self) -> bool {
        matches!(self.kind, ProxyKind::Http | ProxyKind::HttpPw)
    }

    /// Whether the proxy expects credentials.
    pub fn authenticated(&self) -> bool {
        matches!(self.kind, ProxyKind::Socks5Pw | ProxyKind::HttpPw)
    }

    pub(crate) fn credentials(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }
}
