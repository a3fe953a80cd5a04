//! Event Bus (spec §2 item 3).
//!
//! Internal channel carrying per-packet events from transports into the
//! orchestrator. Transports only ever hold the sender half -- never a
//! back-reference to the orchestrator itself (spec §9, "Cyclic
//! references").

use tokio::sync::mpsc;

use crate::error::ResolveError;
use crate::ids::SubQueryId;
use crate::message::Message;

/// The three kinds of event a transport (or the validator hand-off) can
/// report (spec §4.4).
#[derive(Debug, Clone)]
pub enum EventKind {
    Received,
    Validated,
    Error,
}

/// One event on the bus: `(sub_id, EventKind, Message|None, Error|None)`.
#[derive(Debug, Clone)]
pub struct Event {
    pub sub_id: SubQueryId,
    pub kind: EventKind,
    pub message: Option<Message>,
    pub error: Option<ResolveError>,
}

impl Event {
    pub fn received(sub_id: SubQueryId, message: Message) -> Self {
        Self {
            sub_id,
            kind: EventKind::Received,
            message: Some(message),
            error: None,
        }
    }

    pub fn received_error(sub_id: SubQueryId, error: ResolveError) -> Self {
        Self {
            sub_id,
            kind: EventKind::Received,
            message: None,
            error: Some(error),
        }
    }

    pub fn validated(sub_id: SubQueryId, message: Message) -> Self {
        Self {
            sub_id,
            kind: EventKind::Validated,
            message: Some(message),
            error: None,
        }
    }

    pub fn validation_error(sub_id: SubQueryId, error: ResolveError) -> Self {
        Self {
            sub_id,
            kind: EventKind::Validated,
            message: None,
            error: Some(error),
        }
    }

    /// A transport-level failure unassociated with any response (spec §4.4,
    /// `ERROR`). Transports that detect a failure outside the request/reply
    /// pairing (e.g. the underlying socket itself died) report it this way
    /// instead of through [`Self::received_error`].
    pub fn transport_error(sub_id: SubQueryId, error: ResolveError) -> Self {
        Self {
            sub_id,
            kind: EventKind::Error,
            message: None,
            error: Some(error),
        }
    }
}

pub type EventBusSender = mpsc::UnboundedSender<Event>;
pub type EventBusReceiver = mpsc::UnboundedReceiver<Event>;

pub fn channel() -> (EventBusSender, EventBusReceiver) {
    mpsc::unbounded_channel()
}
