//! Provider detection — a pure function over a request's URL host.
//!
//! Used by the proxy's capture policy (§4.1: always capture known-provider
//! traffic; capture everything else only under `--include-all`) and stamped
//! onto `https_connect_*`/`http_request_*` events for downstream filtering.

use serde::{Deserialize, Serialize};

/// The fixed provider enumeration. `Null` means "host did not match any
/// known provider" — it is a valid, expected outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    Openai,
    Google,
    Cohere,
    Replicate,
    Null,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::Openai => "openai",
            Provider::Google => "google",
            Provider::Cohere => "cohere",
            Provider::Replicate => "replicate",
            Provider::Null => "null",
        }
    }

    /// Whether this is a recognized provider (i.e. not `Null`).
    pub fn is_known(&self) -> bool {
        !matches!(self, Provider::Null)
    }
}

/// Detect the provider for a given request host.
///
/// Matching is suffix-based against a fixed host table so subdomains (e.g.
/// `eu.api.anthropic.com`) still resolve. Unknown hosts return
/// `Provider::Null`.
pub fn detect(host: &str) -> Provider {
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    const TABLE: &[(&str, Provider)] = &[
        ("anthropic.com", Provider::Anthropic),
        ("openai.com", Provider::Openai),
        ("googleapis.com", Provider::Google),
        ("generativelanguage.googleapis.com", Provider::Google),
        ("cohere.ai", Provider::Cohere),
        ("cohere.com", Provider::Cohere),
        ("replicate.com", Provider::Replicate),
    ];

    for (suffix, provider) in TABLE {
        if host == *suffix || host.ends_with(&format!(".{suffix}")) {
            return *provider;
        }
    }
    Provider::Null
}
