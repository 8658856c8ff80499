//! URL splitting and redirect target resolution.
//!
//! Only the pieces a GET request needs: `scheme://[user:pass@]host[:port]/path`.
//! No percent-decoding, no query parsing — the path (with query) is passed
//! through verbatim.

use base64::engine::general_purpose;
use base64::Engine as _;

use crate::error::HttpError;

/// A URL split into the five pieces the request machinery consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    /// Lower-cased scheme, e.g. `http`.
    pub scheme: String,
    /// Userinfo (`user:pass`), empty when absent.
    pub auth: String,
    /// Lower-cased host. IPv6 literals are returned without brackets.
    pub host: String,
    /// Explicit port, or `None` when the URL leaves it to the scheme default.
    pub port: Option<u16>,
    /// Path plus query, `/` when absent.
    pub path: String,
}

/// Split a URL into scheme, userinfo, host, port and path.
pub fn parse_url(url: &str) -> Result<ParsedUrl, HttpError> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| HttpError::InvalidUrl(url.to_string()))?;
    if scheme.is_empty() || !scheme.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.') {
        return Err(HttpError::InvalidUrl(url.to_string()));
    }

    let (authority, path) = match rest.find(['/', '?']) {
        Some(i) if rest.as_bytes()[i] == b'/' => (&rest[..i], rest[i..].to_string()),
        Some(i) => (&rest[..i], format!("/{}", &rest[i..])),
        None => (rest, "/".to_string()),
    };

    let (auth, host_port) = match authority.rsplit_once('@') {
        Some((userinfo, hp)) => (userinfo.to_string(), hp),
        None => (String::new(), authority),
    };

    let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
        // IPv6 literal: [::1] or [::1]:8080
        let (inner, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| HttpError::InvalidUrl(url.to_string()))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(parse_port(p, url)?),
            None if tail.is_empty() => None,
            None => return Err(HttpError::InvalidUrl(url.to_string())),
        };
        (inner.to_string(), port)
    } else {
        match host_port.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), Some(parse_port(p, url)?)),
            None => (host_port.to_string(), None),
        }
    };

    if host.is_empty() {
        return Err(HttpError::InvalidUrl(url.to_string()));
    }

    Ok(ParsedUrl {
        scheme: scheme.to_ascii_lowercase(),
        auth,
        host: host.to_ascii_lowercase(),
        port,
        path,
    })
}

fn parse_port(p: &str, url: &str) -> Result<u16, HttpError> {
    p.parse::<u16>()
        .map_err(|_| HttpError::InvalidUrl(url.to_string()))
}

/// Resolve a redirect `Location` against the URL that produced it.
///
/// Absolute locations are returned as-is; root-relative locations replace the
/// base path; anything else is joined to the base URL's directory.
pub fn resolve_redirect_location(base: &str, location: &str) -> String {
    if location.is_empty() {
        return base.to_string();
    }
    if location.contains("://") {
        return location.to_string();
    }

    // scheme://authority | path
    let (prefix, base_path) = match base.find("://") {
        Some(scheme_end) => {
            let after = scheme_end + 3;
            match base[after..].find('/') {
                Some(i) => (&base[..after + i], &base[after + i..]),
                None => (base, "/"),
            }
        }
        None => (base, "/"),
    };

    if location.starts_with('/') {
        return format!("{prefix}{location}");
    }

    let dir = match base_path.rfind('/') {
        Some(i) => &base_path[..i + 1],
        None => "/",
    };
    format!("{prefix}{dir}{location}")
}

/// Whether a status code requests a redirect.
pub fn is_redirect(status_code: u16) -> bool {
    (300..400).contains(&status_code)
}

/// Base64 with the standard alphabet, no line breaks.
pub fn base64_encode(input: &str) -> String {
    general_purpose::STANDARD.encode(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain() {
        let u = parse_url("http://example.com/index.html").unwrap();
        assert_eq!(u.scheme, "http");
        assert_eq!(u.auth, "");
        assert_eq!(u.host, "example.com");
        assert_eq!(u.port, None);
        assert_eq!(u.path, "/index.html");
    }

    #[test]
    fn parse_full() {
        let u = parse_url("https://user:pw@Example.COM:8443/a/b?q=1").unwrap();
        assert_eq!(u.scheme, "https");
        assert_eq!(u.auth, "user:pw");
        assert_eq!(u.host, "example.com");
        assert_eq!(u.port, Some(8443));
        assert_eq!(u.path, "/a/b?q=1");
    }

    #[test]
    fn parse_no_path() {
        let u = parse_url("http://example.com").unwrap();
        assert_eq!(u.path, "/");
        let u = parse_url("http://example.com:81").unwrap();
        assert_eq!(u.port, Some(81));
        assert_eq!(u.path, "/");
    }

    #[test]
    fn parse_query_without_path() {
        let u = parse_url("http://example.com?q=1").unwrap();
        assert_eq!(u.host, "example.com");
        assert_eq!(u.path, "/?q=1");
    }

    #[test]
    fn parse_ipv6() {
        let u = parse_url("http://[::1]:8080/x").unwrap();
        assert_eq!(u.host, "::1");
        assert_eq!(u.port, Some(8080));

        let u = parse_url("http://[2001:db8::2]/").unwrap();
        assert_eq!(u.host, "2001:db8::2");
        assert_eq!(u.port, None);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_url("example.com/x").is_err());
        assert!(parse_url("http://").is_err());
        assert!(parse_url("http://host:notaport/").is_err());
        assert!(parse_url("http://[::1/").is_err());
    }

    #[test]
    fn redirect_absolute_is_verbatim() {
        assert_eq!(
            resolve_redirect_location("http://a/b", "http://x/y"),
            "http://x/y"
        );
    }

    #[test]
    fn redirect_root_relative() {
        assert_eq!(
            resolve_redirect_location("http://a:8080/b/c", "/d"),
            "http://a:8080/d"
        );
    }

    #[test]
    fn redirect_directory_relative() {
        assert_eq!(
            resolve_redirect_location("http://a/b/c.html", "d.html"),
            "http://a/b/d.html"
        );
        assert_eq!(resolve_redirect_location("http://a", "d"), "http://a/d");
    }

    #[test]
    fn redirect_codes() {
        assert!(is_redirect(301));
        assert!(is_redirect(302));
        assert!(is_redirect(308));
        assert!(!is_redirect(200));
        assert!(!is_redirect(404));
    }

    #[test]
    fn base64_roundtrip() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;
        let encoded = base64_encode("user:secret/+=");
        assert!(!encoded.contains('\n'));
        assert_eq!(STANDARD.decode(&encoded).unwrap(), b"user:secret/+=");
    }
}
