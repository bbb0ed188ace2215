//! Opaque identifiers for gateway records.
//!
//! All ids are URL-safe and render with a short kind prefix so that a bare
//! id in a log line or chat message is self-describing.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an approval request record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    /// Create a new random request id.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("req-{}", Uuid::new_v4().simple()))
    }

    /// View the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Unique identifier for a trust session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrustId(pub String);

impl TrustId {
    /// Create a new random trust session id.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("trust-{}", Uuid::new_v4().simple()))
    }

    /// View the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TrustId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrustId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrustId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Unique, high-entropy identifier for a grant session.
///
/// Grant ids double as bearer handles for `GrantExecute`, so they carry the
/// full 128 bits of a v4 UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantId(pub String);

impl GrantId {
    /// Create a new random grant id.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("grant-{}", Uuid::new_v4().simple()))
    }

    /// View the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for GrantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GrantId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque handle to a posted chat message, issued by the notifier.
///
/// The gateway never inspects the contents; it only hands the id back for
/// later edits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// View the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Addressable page of a long command result: `{request_id}:page:{k}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub String);

impl PageId {
    /// Build the page id for page `k` of a request's output.
    #[must_use]
    pub fn for_page(request_id: &RequestId, k: u32) -> Self {
        Self(format!("{request_id}:page:{k}"))
    }

    /// Split the id back into its request id and page number, if well-formed.
    #[must_use]
    pub fn parse(&self) -> Option<(RequestId, u32)> {
        let (request, page) = self.0.rsplit_once(":page:")?;
        let k = page.parse().ok()?;
        Some((RequestId(request.to_owned()), k))
    }

    /// View the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_unique_and_prefixed() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("req-"));
    }

    #[test]
    fn test_grant_id_entropy() {
        let id = GrantId::new();
        // "grant-" + 32 hex chars
        assert_eq!(id.as_str().len(), 6 + 32);
    }

    #[test]
    fn test_page_id_roundtrip() {
        let req = RequestId::from("req-abc");
        let page = PageId::for_page(&req, 3);
        assert_eq!(page.as_str(), "req-abc:page:3");
        let (parsed_req, k) = page.parse().unwrap();
        assert_eq!(parsed_req, req);
        assert_eq!(k, 3);
    }

    #[test]
    fn test_page_id_parse_rejects_garbage() {
        assert!(PageId::from("no-page-marker").parse().is_none());
        assert!(PageId::from("req-abc:page:notanumber").parse().is_none());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = RequestId::from("req-xyz");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"req-xyz\"");
    }
}
