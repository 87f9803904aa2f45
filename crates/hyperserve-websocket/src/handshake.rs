//! # Upgrade handshake
//!
//! Validation of the client's upgrade request, the accept-key computation
//! from RFC 6455 section 4.2.2, origin policy, and subprotocol negotiation.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};

use crate::error::{WsError, WsResult};

/// The GUID appended to the client key before hashing, per RFC 6455.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute `Sec-WebSocket-Accept` for a client's `Sec-WebSocket-Key`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Origin admission policy for upgrade requests.
#[derive(Clone)]
pub enum OriginPolicy {
    /// `Origin` host+port must equal the request `Host` (case-insensitive).
    /// Requests without an `Origin` header (non-browser clients) pass.
    SameOrigin,
    /// Allowed origins, matched exactly or with a leading `*.` wildcard
    /// covering one or more labels from the right.
    AllowList(Vec<String>),
    /// Caller-supplied predicate over `(origin, host)`.
    Predicate(Arc<dyn Fn(&str, &str) -> bool + Send + Sync>),
}

impl std::fmt::Debug for OriginPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SameOrigin => f.write_str("OriginPolicy::SameOrigin"),
            Self::AllowList(list) => f.debug_tuple("OriginPolicy::AllowList").field(list).finish(),
            Self::Predicate(_) => f.write_str("OriginPolicy::Predicate(..)"),
        }
    }
}

impl Default for OriginPolicy {
    fn default() -> Self {
        Self::SameOrigin
    }
}

impl OriginPolicy {
    /// Check an `Origin` header value against the request `Host`.
    pub fn allows(&self, origin: Option<&str>, host: &str) -> bool {
        match self {
            Self::SameOrigin => match origin {
                None => true,
                Some(origin) => origin_host(origin)
                    .is_some_and(|origin_host| origin_host.eq_ignore_ascii_case(host)),
            },
            Self::AllowList(allowed) => {
                let Some(origin) = origin else { return false };
                allowed.iter().any(|pattern| origin_matches(origin, pattern))
            }
            Self::Predicate(check) => check(origin.unwrap_or(""), host),
        }
    }
}

/// Extract `host[:port]` from an origin like `https://example.com:8443`.
fn origin_host(origin: &str) -> Option<&str> {
    let rest = origin.split_once("://").map_or(origin, |(_, rest)| rest);
    let rest = rest.split('/').next()?;
    if rest.is_empty() { None } else { Some(rest) }
}

/// Match an origin against an allow-list pattern. `*.example.com` matches
/// `a.example.com` and `a.b.example.com` but not `example.com` itself.
fn origin_matches(origin: &str, pattern: &str) -> bool {
    let Some(host) = origin_host(origin) else {
        return false;
    };
    let host = host.split(':').next().unwrap_or(host);
    if let Some(suffix) = pattern.strip_prefix("*.") {
        host.len() > suffix.len() + 1
            && host.to_ascii_lowercase().ends_with(&format!(".{}", suffix.to_ascii_lowercase()))
    } else {
        let pattern_host = origin_host(pattern).unwrap_or(pattern);
        host.eq_ignore_ascii_case(pattern_host.split(':').next().unwrap_or(pattern_host))
            || origin.eq_ignore_ascii_case(pattern)
    }
}

/// A validated upgrade request: the client key and its subprotocol offer.
#[derive(Debug, Clone)]
pub struct UpgradeOffer {
    /// Value of `Sec-WebSocket-Key`
    pub key: String,
    /// Subprotocols offered by the client, in client order
    pub protocols: Vec<String>,
}

/// Validate the upgrade preconditions of an HTTP request and apply the
/// origin policy.
///
/// # Errors
///
/// `WsError::Handshake` when a required header or value is missing or
/// wrong; `WsError::OriginDenied` when the origin policy refuses.
pub fn validate_upgrade<B>(req: &http::Request<B>, policy: &OriginPolicy) -> WsResult<UpgradeOffer> {
    if req.method() != http::Method::GET {
        return Err(WsError::Handshake("upgrade requires GET".into()));
    }

    let header = |name: &str| -> Option<&str> {
        req.headers().get(name).and_then(|v| v.to_str().ok())
    };

    let upgrade_ok = header("upgrade")
        .is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("websocket")));
    if !upgrade_ok {
        return Err(WsError::Handshake("missing Upgrade: websocket".into()));
    }

    let connection_ok = header("connection")
        .is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")));
    if !connection_ok {
        return Err(WsError::Handshake("missing Connection: Upgrade".into()));
    }

    match header("sec-websocket-version") {
        Some("13") => {}
        _ => return Err(WsError::Handshake("unsupported Sec-WebSocket-Version".into())),
    }

    let key = header("sec-websocket-key")
        .ok_or_else(|| WsError::Handshake("missing Sec-WebSocket-Key".into()))?
        .to_string();

    let host = header("host").unwrap_or_default().to_string();
    let origin = header("origin");
    if !policy.allows(origin, &host) {
        return Err(WsError::OriginDenied(origin.unwrap_or("<none>").to_string()));
    }

    let protocols = header("sec-websocket-protocol")
        .map(|v| v.split(',').map(|p| p.trim().to_string()).collect())
        .unwrap_or_default();

    Ok(UpgradeOffer { key, protocols })
}

/// Pick the subprotocol: the first of the server's registered protocols
/// (server preference order) that the client offered, or `None`.
pub fn negotiate_subprotocol(offered: &[String], registered: &[String]) -> Option<String> {
    registered
        .iter()
        .find(|candidate| offered.iter().any(|p| p == *candidate))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request(headers: &[(&str, &str)]) -> http::Request<()> {
        let mut builder = http::Request::builder().method("GET").uri("/ws");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap()
    }

    fn standard_headers<'a>() -> Vec<(&'a str, &'a str)> {
        vec![
            ("host", "example.com:8080"),
            ("upgrade", "websocket"),
            ("connection", "keep-alive, Upgrade"),
            ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("sec-websocket-version", "13"),
        ]
    }

    #[test]
    fn rfc_accept_key_vector() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn valid_upgrade_passes() {
        let req = upgrade_request(&standard_headers());
        let offer = validate_upgrade(&req, &OriginPolicy::SameOrigin).unwrap();
        assert_eq!(offer.key, "dGhlIHNhbXBsZSBub25jZQ==");
        assert!(offer.protocols.is_empty());
    }

    #[test]
    fn missing_key_rejected() {
        let headers: Vec<_> = standard_headers()
            .into_iter()
            .filter(|(name, _)| *name != "sec-websocket-key")
            .collect();
        let req = upgrade_request(&headers);
        assert!(matches!(
            validate_upgrade(&req, &OriginPolicy::SameOrigin),
            Err(WsError::Handshake(_))
        ));
    }

    #[test]
    fn wrong_version_rejected() {
        let mut headers = standard_headers();
        for header in &mut headers {
            if header.0 == "sec-websocket-version" {
                header.1 = "8";
            }
        }
        let req = upgrade_request(&headers);
        assert!(validate_upgrade(&req, &OriginPolicy::SameOrigin).is_err());
    }

    #[test]
    fn same_origin_policy() {
        let policy = OriginPolicy::SameOrigin;
        assert!(policy.allows(Some("http://example.com:8080"), "example.com:8080"));
        assert!(policy.allows(None, "example.com:8080"));
        assert!(!policy.allows(Some("http://evil.com"), "example.com:8080"));
    }

    #[test]
    fn cross_origin_rejected_by_handshake() {
        let mut headers = standard_headers();
        headers.push(("origin", "https://evil.test"));
        let req = upgrade_request(&headers);
        assert!(matches!(
            validate_upgrade(&req, &OriginPolicy::SameOrigin),
            Err(WsError::OriginDenied(_))
        ));
    }

    #[test]
    fn allow_list_wildcards() {
        let policy = OriginPolicy::AllowList(vec![
            "https://app.example.com".into(),
            "*.trusted.io".into(),
        ]);
        assert!(policy.allows(Some("https://app.example.com"), "whatever"));
        assert!(policy.allows(Some("https://a.trusted.io"), "whatever"));
        assert!(policy.allows(Some("https://a.b.trusted.io"), "whatever"));
        assert!(!policy.allows(Some("https://trusted.io"), "whatever"));
        assert!(!policy.allows(Some("https://evil.io"), "whatever"));
        assert!(!policy.allows(None, "whatever"));
    }

    #[test]
    fn subprotocol_server_preference() {
        let offered = vec!["b".to_string(), "a".to_string()];
        let registered = vec!["a".to_string(), "b".to_string()];
        // Server preference order wins over client order.
        assert_eq!(negotiate_subprotocol(&offered, &registered), Some("a".to_string()));
        assert_eq!(negotiate_subprotocol(&offered, &[]), None);
        assert_eq!(
            negotiate_subprotocol(&[], &registered),
            None
        );
    }
}
