//! Multi-server retry-and-racing orchestrator for a DNS stub resolver.
//!
//! This crate owns everything a stub resolver needs once a caller has
//! already built a DNS question and chosen a pool of upstream servers: it
//! schedules retries and fail-over across that pool, races outstanding
//! sub-queries against a single client-level deadline, classifies every
//! reply a transport reports, and hands successful DNSSEC-enabled replies
//! to a validator before returning a result. What sends bytes on the wire,
//! parses them back into a message, and validates a signature chain is
//! deliberately someone else's problem -- those live behind the
//! [`SingleTransport`] and [`Validator`] traits so this crate stays pure
//! orchestration logic, the same split `dns-over-tcp::client::Client` draws
//! between its sans-IO state machine and the socket that drives it.

pub mod clock;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod ids;
pub mod message;
mod orchestrator;
pub mod plan;
pub mod query_table;
pub mod ranking;
pub mod resolver;
pub mod transport;

pub use config::{ResolverConfig, SourcePorts, Tsig, TransportConfig};
pub use error::{InternalError, PlannerError, ResolveError};
pub use ids::{ClientId, SubQueryId, TransportId};
pub use message::{Message, SecurityLevel};
pub use query_table::ResolveResult;
pub use resolver::{Resolver, ResultReceiver};
pub use transport::{NoopValidator, SingleTransport, Validator};
