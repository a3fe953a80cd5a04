//! The `SingleTransport` external collaborator (spec §6).
//!
//! One UDP/TCP socket, per-packet timeout, TC-bit TCP fallback, and TSIG
//! signing live behind this trait -- the orchestrator only ever calls
//! `send_async` and reads `server_label`. Expressed as an `async_trait`
//! object-safe capability set, the way spec §9's design notes suggest
//! ("dynamic dispatch on transports... implement UDP and TCP variants
//! behind this interface").

use async_trait::async_trait;

use crate::config::TransportConfig;
use crate::event_bus::EventBusSender;
use crate::ids::SubQueryId;
use crate::message::Message;

#[async_trait]
pub trait SingleTransport: Send + Sync {
    /// Sends `request` and, unless the transport is torn down, eventually
    /// enqueues exactly one `(sub_id, RECEIVED, msg|None, err|None)` event
    /// on `bus`. Non-blocking: this method only needs to queue the send.
    async fn send_async(&self, request: Message, bus: EventBusSender, sub_id: SubQueryId);

    /// A human-readable label for logging and ranking diagnostics.
    fn server_label(&self) -> &str;

    /// Applies (or re-applies) configuration. Called on construction and
    /// whenever the resolver's configuration changes.
    fn set_config(&self, config: &TransportConfig);
}

/// The DNSSEC validator hand-off (spec §6).
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        message: Message,
    ) -> Result<(Message, crate::message::SecurityLevel), crate::error::ResolveError>;
}

/// Default validator for DNSSEC-off configurations: never consulted in
/// practice (the orchestrator skips the hand-off entirely when DNSSEC is
/// disabled) but kept as a harmless default so `Resolver` always has one.
pub struct NoopValidator;

#[async_trait]
impl Validator for NoopValidator {
    async fn validate(
        &self,
        message: Message,
    ) -> Result<(Message, crate::message::SecurityLevel), crate::error::ResolveError> {
        Ok((message, crate::message::SecurityLevel::Unchecked))
    }
}

#[cfg(any(test, feature = "test-support"))]
#[allow(clippy::unwrap_used)]
pub mod test_support {
    use std::sync::Mutex;

    use super::*;
    use crate::error::ResolveError;
    use crate::event_bus::Event;

    /// A deterministic in-memory transport driven entirely by canned
    /// responses, the way `dns-over-tcp/tests/client_and_server.rs` pairs a
    /// real client against an in-process server instead of a live socket.
    pub struct EchoTransport {
        label: String,
        scripted: Mutex<Vec<ScriptedReply>>,
        delay: Option<std::time::Duration>,
    }

    #[derive(Clone)]
    pub enum ScriptedReply {
        Response(dns_types::Response),
        Error(ResolveError),
        /// A transport-level failure unassociated with any response (spec
        /// §4.4, `EventKind::Error`) -- e.g. the underlying socket itself
        /// died, as opposed to a reply that carries an error for a specific
        /// request (`Error`, reported via `RECEIVED`).
        TransportFailure(ResolveError),
        /// Never replies -- simulates a silent/unreachable server.
        Silent,
    }

    impl EchoTransport {
        pub fn new(label: impl Into<String>) -> Self {
            Self {
                label: label.into(),
                scripted: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        /// Queues replies; each call to `send_async` consumes the next one
        /// in FIFO order, repeating the last entry once exhausted.
        pub fn with_script(label: impl Into<String>, script: Vec<ScriptedReply>) -> Self {
            Self {
                label: label.into(),
                scripted: Mutex::new(script),
                delay: None,
            }
        }

        /// As [`Self::with_script`], but waits `delay` before replying --
        /// used to make one upstream deterministically slower than another
        /// in a race (`tokio::time::pause`-driven tests only, never a real
        /// sleep in production).
        pub fn with_delay(label: impl Into<String>, script: Vec<ScriptedReply>, delay: std::time::Duration) -> Self {
            Self {
                label: label.into(),
                scripted: Mutex::new(script),
                delay: Some(delay),
            }
        }
    }

    #[async_trait]
    impl SingleTransport for EchoTransport {
        async fn send_async(&self, request: Message, bus: EventBusSender, sub_id: SubQueryId) {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let reply = {
                let mut script = self.scripted.lock().unwrap();
                if script.len() > 1 {
                    script.remove(0)
                } else {
                    script.first().cloned().unwrap_or(ScriptedReply::Silent)
                }
            };

            match reply {
                ScriptedReply::Response(response) => {
                    let message = request.with_response(response);
                    let _ = bus.send(Event::received(sub_id, message));
                }
                ScriptedReply::Error(error) => {
                    let _ = bus.send(Event::received_error(sub_id, error));
                }
                ScriptedReply::TransportFailure(error) => {
                    let _ = bus.send(Event::transport_error(sub_id, error));
                }
                ScriptedReply::Silent => {
                    // Never reply; the client-side deadline handles this.
                }
            }
        }

        fn server_label(&self) -> &str {
            &self.label
        }

        fn set_config(&self, _config: &TransportConfig) {}
    }
}
