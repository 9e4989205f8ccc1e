//! Request identifiers
//!
//! Every dispatched request carries a [`RequestId`]. A client may propagate
//! its own id through a header; anything that is not a valid ULID is ignored
//! and a fresh id is minted, so ids in logs are always sortable by creation
//! time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

use crate::context::Context;

/// ULID-backed request identifier
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RequestId(Ulid);

impl RequestId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Milliseconds since the Unix epoch at which the id was minted
    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }

    /// Use the header value when it parses, otherwise mint a new id
    pub fn from_header_or_new(header_value: Option<&str>) -> Self {
        header_value
            .and_then(|s| s.trim().parse::<RequestId>().ok())
            .unwrap_or_default()
    }

    /// Read the id from `header` on the request, if a header is configured
    pub fn from_context(ctx: &dyn Context, header: Option<&str>) -> Self {
        let value = header.and_then(|name| ctx.header(name));
        Self::from_header_or_new(value.as_deref())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Ulid> for RequestId {
    fn from(id: Ulid) -> Self {
        Self(id)
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for RequestId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid request id `{s}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryContext;
    use http::Method;

    const KNOWN: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn test_valid_header_is_propagated() {
        let id = RequestId::from_header_or_new(Some(KNOWN));
        assert_eq!(id.to_string(), KNOWN);
    }

    #[test]
    fn test_invalid_header_mints_new_id() {
        let id = RequestId::from_header_or_new(Some("not-a-ulid"));
        assert_ne!(id.to_string(), "not-a-ulid");
        assert_eq!(id.to_string().len(), 26);
    }

    #[test]
    fn test_from_context_reads_configured_header() {
        let ctx = MemoryContext::new(Method::GET, "/").with_header("X-Request-Id", KNOWN);
        assert_eq!(
            RequestId::from_context(&ctx, Some("x-request-id")).to_string(),
            KNOWN
        );
        assert_ne!(RequestId::from_context(&ctx, None).to_string(), KNOWN);
    }

    #[test]
    fn test_serde_as_string() {
        let id: RequestId = KNOWN.parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{KNOWN}\""));
        let back: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<RequestId>("\"nope\"").is_err());
    }
}
