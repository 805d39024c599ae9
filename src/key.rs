//! Pool partition keys derived from requests

use http::header::HOST;
use http::uri::Authority;
use http::Request;
use std::fmt;
use std::sync::Arc;

/// Origin (scheme + authority) identifying which pool partition a request borrows from.
///
/// Derivation is deterministic: scheme and host are lower-cased, a missing scheme means `http`,
/// and an explicit default port is dropped, so `HTTP://Example.com:80/a` and
/// `http://example.com/b` share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    scheme: Arc<str>,
    authority: Arc<str>,
}

impl RequestKey {
    /// Build a key from already-normalized parts.
    pub fn new(scheme: impl AsRef<str>, authority: impl AsRef<str>) -> Self {
        Self { scheme: Arc::from(scheme.as_ref()), authority: Arc::from(authority.as_ref()) }
    }

    /// Derive the key for `request`, falling back to the `Host` header for origin-form targets.
    ///
    /// Returns `None` when neither the URI nor the headers name an authority.
    pub fn from_request<B>(request: &Request<B>) -> Option<Self> {
        let uri = request.uri();
        let scheme = uri.scheme_str().unwrap_or("http").to_ascii_lowercase();

        let authority = match uri.authority() {
            Some(authority) => authority.clone(),
            None => request
                .headers()
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .and_then(|host| host.parse::<Authority>().ok())?,
        };

        Some(Self::new(&scheme, normalize_authority(&scheme, &authority)))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }
}

fn normalize_authority(scheme: &str, authority: &Authority) -> String {
    let host = authority.host().to_ascii_lowercase();
    let default_port = match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        _ => None,
    };
    match authority.port_u16() {
        Some(port) if Some(port) != default_port => format!("{host}:{port}"),
        _ => host,
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}
