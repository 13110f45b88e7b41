//! Upstream URL derivation.
//!
//! The upstream URL is obtained from the inbound request target by a scheme
//! prefix substitution only: `http://` becomes `https://`, `https://` is kept,
//! and anything else gets `https://` prepended. The remainder is never parsed
//! or normalized, so what the caller sent after the scheme is what goes out.

use std::fmt;

use hyper::Uri;

const HTTPS_PREFIX: &str = "https://";
const HTTP_PREFIX: &str = "http://";

/// Scheme of one upstream attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamScheme {
    Https,
    Http,
}

impl UpstreamScheme {
    pub fn prefix(self) -> &'static str {
        match self {
            UpstreamScheme::Https => HTTPS_PREFIX,
            UpstreamScheme::Http => HTTP_PREFIX,
        }
    }

    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            UpstreamScheme::Https => "https",
            UpstreamScheme::Http => "http",
        }
    }
}

/// Where one attempt is sent: a scheme plus everything after `scheme://`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    scheme: UpstreamScheme,
    rest: String,
}

impl UpstreamTarget {
    /// Derive the HTTPS target for an inbound request target.
    ///
    /// Surrounding whitespace is trimmed first. Prefix matching is case-sensitive.
    pub fn derive(raw: &str) -> Self {
        let trimmed = raw.trim();
        let rest = trimmed
            .strip_prefix(HTTP_PREFIX)
            .or_else(|| trimmed.strip_prefix(HTTPS_PREFIX))
            .unwrap_or(trimmed);

        Self {
            scheme: UpstreamScheme::Https,
            rest: rest.to_string(),
        }
    }

    /// The same target over plaintext HTTP, for the fallback attempt.
    pub fn to_plaintext(&self) -> Self {
        Self {
            scheme: UpstreamScheme::Http,
            rest: self.rest.clone(),
        }
    }

    pub fn scheme(&self) -> UpstreamScheme {
        self.scheme
    }

    /// The full URL string.
    pub fn url(&self) -> String {
        format!("{}{}", self.scheme.prefix(), self.rest)
    }

    /// Parse the URL for the HTTP client.
    pub fn to_uri(&self) -> Result<Uri, hyper::http::uri::InvalidUri> {
        self.url().parse()
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.scheme.prefix(), self.rest)
    }
}
