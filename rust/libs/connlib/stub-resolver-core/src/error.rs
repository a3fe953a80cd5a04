//! Error taxonomy (spec §7).
//!
//! `ResolveError` is what callers see on their sink. `PlannerError` and
//! `InternalError` never reach a caller under normal operation -- they
//! signal a bug in the orchestrator itself (spec §9, "Duplicate-timestamp
//! assertion in the planner").

use std::time::Duration;

use crate::ids::SubQueryId;

/// Terminal or transient error surfaced to a client query's sink.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ResolveError {
    /// Per-packet timeout from a single transport. Only terminal if no
    /// other sub-query or scheduled fire remains for the client.
    #[error("query to {server} timed out after {timeout:?}")]
    Timeout { server: String, timeout: Duration },

    /// The client's `hard_deadline` elapsed (spec §3, `ClientQuery::hard_deadline`).
    #[error("query exceeded its overall deadline of {query_timeout:?}")]
    ClientTimeout { query_timeout: Duration },

    /// Authoritative denial. Propagated without retry.
    #[error("name does not exist")]
    NxDomain,

    /// Transient local resource exhaustion (e.g. file descriptors). The
    /// orchestrator retains the transport in the schedule and keeps waiting.
    #[error("local resource exhausted while querying {server}: {reason}")]
    ResourceExhausted { server: String, reason: String },

    /// Any other transport-level failure. The transport is demoted to the
    /// bottom of the ranking and dropped from the remaining schedule.
    #[error("transport error from {server}: {reason}")]
    Transport { server: String, reason: String },

    /// The DNSSEC validator rejected or failed to process the message.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Bad configuration or a type mismatch passed to `send_async`.
    /// Reported synchronously on the sink without consulting any transport.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// `Resolver::close` was called; every outstanding client query fails
    /// with this single error.
    #[error("resolver was closed")]
    ResolverClosed,
}

/// Errors from the pure [`crate::plan::plan`] function (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlannerError {
    /// Two schedule entries would land on the same absolute fire time.
    /// The source treats this as fatal misconfiguration (`retry_delay`
    /// much smaller than the per-server stagger) and refuses to silently
    /// overwrite one of the two entries.
    #[error(
        "planner produced duplicate fire time for {first:?} and {second:?}; retry_delay is too small for {server_count} servers"
    )]
    DuplicateFireTime {
        first: (crate::ids::TransportId, u32),
        second: (crate::ids::TransportId, u32),
        server_count: usize,
    },

    /// `plan` was called with an empty server list.
    #[error("cannot schedule a query with no servers")]
    NoServers,
}

/// Invariant violations inside the orchestrator. These indicate a bug, not
/// a transient condition, and are never surfaced to a client under normal
/// operation (spec §7).
#[derive(Debug, Clone, thiserror::Error)]
pub enum InternalError {
    #[error("received event for {sub_id} which was not outstanding")]
    NotOutstanding { sub_id: SubQueryId },
}
