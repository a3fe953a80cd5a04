//! Identifiers used to correlate client queries and sub-queries across the
//! orchestrator, the event bus, and the server ranking list.

use std::fmt;

/// A caller-visible handle for one logical client query.
///
/// Either supplied by the caller or generated by [`crate::resolver::Resolver::send_async`]
/// as `now + small_random_int`, per the public API contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

impl From<u64> for ClientId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A handle into the server ranking list.
///
/// Stable across reorderings: the list is indexed by position for ranking
/// purposes, but sub-queries and outstanding sets key on `TransportId` so a
/// promote/demote never invalidates an in-flight correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransportId(pub u32);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport-{}", self.0)
    }
}

/// Identity of one packet sent to one server for one client query at one
/// attempt. Compared structurally, used both as the transport-level
/// correlation token and as the outstanding-set key (spec §3, `SubQuery`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubQueryId {
    pub transport: TransportId,
    pub client: ClientId,
    pub attempt: u32,
}

impl fmt::Display for SubQueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sub({}, {}, attempt {})",
            self.transport, self.client, self.attempt
        )
    }
}
