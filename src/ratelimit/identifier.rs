//! Identifier derivation for rate-limited principals.

use axum::http::HeaderMap;

/// Header carrying the authenticated principal, set by the auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the client address chain from upstream proxies.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Address used when a request carries no forwarding information.
const UNKNOWN_ADDRESS: &str = "unknown";

/// The principal a request is accounted against.
///
/// Renders as `user:<id>` or `ip:<address>`, which is the key used in
/// the window store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// An authenticated user
    User(String),
    /// A network origin
    Ip(String),
}

impl Identifier {
    /// Derive the identifier for a request from its headers.
    ///
    /// An authenticated user id wins; otherwise the first address in the
    /// forwarding chain is used, or `unknown` when there is none. A blank
    /// first entry in the chain (e.g. `" , 10.0.0.1"`) also yields `unknown`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        if let Some(user_id) = header_str(headers, USER_ID_HEADER) {
            return Identifier::User(user_id.to_string());
        }

        let address = header_str(headers, FORWARDED_FOR_HEADER)
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .unwrap_or(UNKNOWN_ADDRESS);

        Identifier::Ip(address.to_string())
    }

    /// Convert the identifier to its store key.
    pub fn to_key(&self) -> String {
        match self {
            Identifier::User(id) => format!("user:{}", id),
            Identifier::Ip(address) => format!("ip:{}", address),
        }
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

/// Non-empty, valid UTF-8 header value.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}
