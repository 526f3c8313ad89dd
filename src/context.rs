//! Per-request relying-party context
//!
//! `(rp_id, origin)` are derived from the Host header of each request:
//! rpId is the effective registrable domain, origin the exact
//! scheme+host(+port) the browser reports. They are compared byte-exact
//! downstream, never normalized after derivation.

use serde::{Deserialize, Serialize};

/// The relying-party context of one request
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub rp_id: String,
    pub origin: String,
}

impl RequestContext {
    #[must_use]
    pub fn new(rp_id: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            rp_id: rp_id.into(),
            origin: origin.into(),
        }
    }

    /// Derive the context from a Host header value.
    ///
    /// A leading `www.` is stripped from the rpId. Localhost keeps its
    /// port in the origin and uses plain http; everything else is
    /// assumed to be served over https on the default port.
    #[must_use]
    pub fn from_host(host: &str) -> Self {
        let hostname = host.strip_prefix("www.").unwrap_or(host);

        if hostname == "localhost" || hostname.starts_with("localhost:") {
            return Self {
                rp_id: "localhost".to_string(),
                origin: format!("http://{hostname}"),
            };
        }

        let rp_id = hostname
            .split_once(':')
            .map_or(hostname, |(name, _)| name)
            .to_string();
        Self {
            origin: format!("https://{rp_id}"),
            rp_id,
        }
    }
}
