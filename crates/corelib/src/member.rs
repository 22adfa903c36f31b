//! Member identity and reachability.
//!
//! A member is one running node of the session. It is identified by a short,
//! human-chosen `MemberId` and reached through a `MemberAddress`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identifier of a member, chosen by the player when the node starts.
///
/// Cheap to clone and compare; used as the key of every per-member map in the
/// replicated state.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct MemberId(pub String);

impl MemberId {
    /// Construct an id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identity plus network endpoint of one member.
///
/// Immutable once created. Ordering compares the member id first, so sets of
/// addresses iterate in id order regardless of where the members run.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct MemberAddress {
    /// DNS name or IP address of the machine hosting the member.
    pub host: String,
    /// TCP port the member serves RPCs on.
    pub port: u16,
    pub id: MemberId,
}

impl MemberAddress {
    pub fn new(host: impl Into<String>, port: u16, id: impl Into<MemberId>) -> Self {
        Self {
            host: host.into(),
            port,
            id: id.into(),
        }
    }

    /// `host:port` form, suitable for address resolution.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Ord for MemberAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.host.cmp(&other.host))
            .then_with(|| self.port.cmp(&other.port))
    }
}

impl PartialOrd for MemberAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MemberAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_uses_id_first() {
        let a = MemberAddress::new("10.0.0.9", 9000, "aa");
        let b = MemberAddress::new("10.0.0.1", 1000, "bb");
        assert!(a < b);
    }

    #[test]
    fn test_endpoint_and_display() {
        let addr = MemberAddress::new("localhost", 4000, "zz");
        assert_eq!(addr.endpoint(), "localhost:4000");
        assert_eq!(addr.to_string(), "zz@localhost:4000");
    }
}
