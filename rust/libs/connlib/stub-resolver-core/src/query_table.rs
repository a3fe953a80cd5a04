//! Query Table (spec §4.2).
//!
//! Registry of in-flight client queries keyed by `client_id`. The single
//! source of truth for which sub-queries may still be considered live
//! (spec §4.2). Mutated only inside a critical section, matching spec §5's
//! concurrency model: `parking_lot::Mutex` the way it's used throughout the
//! rest of the workspace (gateway, tunnel).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{InternalError, ResolveError};
use crate::ids::{ClientId, SubQueryId, TransportId};
use crate::message::Message;
use crate::plan::plan;

/// What the client observes: `(client_id, message_or_none, error_or_none)`
/// (spec §6, "Result tuple on sink").
pub type ResolveResult = (ClientId, Option<Message>, Option<ResolveError>);

pub type ResultSink = mpsc::UnboundedSender<ResolveResult>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Open,
    StoppedWaitingValidation,
    Done,
}

pub struct ClientEntry {
    pub request: Message,
    pub sink: ResultSink,
    pub outstanding: HashSet<SubQueryId>,
    pub schedule: BTreeMap<Instant, (TransportId, u32)>,
    pub hard_deadline: Option<Instant>,
    pub query_timeout: Duration,
    pub state: QueryState,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Ok,
    DuplicateId,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ClearOutcome {
    Ok,
    NotOutstanding,
}

/// The registry itself. A thin wrapper over a `Mutex<HashMap<..>>` so the
/// orchestrator can take the lock once per tick and perform every due-fire
/// and event-drain step inside a single critical section (spec §5).
#[derive(Default)]
pub struct QueryTable {
    inner: Mutex<HashMap<ClientId, ClientEntry>>,
}

impl QueryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Inserts a new client query, building its schedule via the Schedule
    /// Planner with `base = now` (spec §4.2).
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &self,
        client_id: ClientId,
        request: Message,
        sink: ResultSink,
        servers: &[TransportId],
        retry_times: u32,
        retry_delay: Duration,
        query_timeout: Duration,
        now: Instant,
    ) -> Result<InsertOutcome, ResolveError> {
        let mut table = self.inner.lock();

        if table.contains_key(&client_id) {
            return Ok(InsertOutcome::DuplicateId);
        }

        let schedule = plan(servers, retry_times, retry_delay, now)
            .map_err(|e| ResolveError::Argument(e.to_string()))?;

        let hard_deadline = (!query_timeout.is_zero()).then(|| now + query_timeout);

        table.insert(
            client_id,
            ClientEntry {
                request,
                sink,
                outstanding: HashSet::new(),
                schedule,
                hard_deadline,
                query_timeout,
                state: QueryState::Open,
            },
        );

        Ok(InsertOutcome::Ok)
    }

    /// Returns and removes every schedule entry whose fire time has
    /// elapsed, across every client (spec §4.2).
    pub fn pop_due(&self, now: Instant) -> Vec<(ClientId, TransportId, u32)> {
        let mut table = self.inner.lock();
        let mut due = Vec::new();

        for (client_id, entry) in table.iter_mut() {
            if entry.state != QueryState::Open {
                continue;
            }

            let to_fire: Vec<Instant> = entry
                .schedule
                .range(..=now)
                .map(|(instant, _)| *instant)
                .collect();

            for instant in to_fire {
                if let Some((transport, attempt)) = entry.schedule.remove(&instant) {
                    due.push((*client_id, transport, attempt));
                }
            }
        }

        due
    }

    pub fn record_outstanding(&self, client_id: ClientId, sub_id: SubQueryId) {
        if let Some(entry) = self.inner.lock().get_mut(&client_id) {
            entry.outstanding.insert(sub_id);
        }
    }

    pub fn clear_outstanding(&self, client_id: ClientId, sub_id: SubQueryId) -> ClearOutcome {
        let mut table = self.inner.lock();
        let Some(entry) = table.get_mut(&client_id) else {
            return ClearOutcome::NotOutstanding;
        };

        if entry.outstanding.remove(&sub_id) {
            ClearOutcome::Ok
        } else {
            ClearOutcome::NotOutstanding
        }
    }

    /// Drops the client's schedule and outstanding set, but keeps the
    /// client_id present for dedup against late events (spec §4.2).
    pub fn cancel(&self, client_id: ClientId) {
        if let Some(entry) = self.inner.lock().get_mut(&client_id) {
            entry.schedule.clear();
            entry.outstanding.clear();
        }
    }

    pub fn remove(&self, client_id: ClientId) -> Option<ClientEntry> {
        self.inner.lock().remove(&client_id)
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.inner.lock().contains_key(&client_id)
    }

    pub fn set_state(&self, client_id: ClientId, state: QueryState) {
        if let Some(entry) = self.inner.lock().get_mut(&client_id) {
            entry.state = state;
        }
    }

    pub fn state(&self, client_id: ClientId) -> Option<QueryState> {
        self.inner.lock().get(&client_id).map(|e| e.state)
    }

    pub fn hard_deadline(&self, client_id: ClientId) -> Option<Instant> {
        self.inner.lock().get(&client_id).and_then(|e| e.hard_deadline)
    }

    pub fn is_outstanding_and_schedule_empty(&self, client_id: ClientId) -> bool {
        self.inner
            .lock()
            .get(&client_id)
            .is_some_and(|e| e.outstanding.is_empty() && e.schedule.is_empty())
    }

    /// Removes one transport's remaining schedule entries for a client
    /// (spec §4.4: "remove this transport from the remaining schedule").
    pub fn drop_transport_from_schedule(&self, client_id: ClientId, transport: TransportId) {
        if let Some(entry) = self.inner.lock().get_mut(&client_id) {
            entry.schedule.retain(|_, (t, _)| *t != transport);
        }
    }

    /// Drops every scheduled fire for the client without touching
    /// outstanding sub-queries (spec §4.4, "stop scheduling further
    /// sub-queries for this client").
    pub fn clear_schedule(&self, client_id: ClientId) {
        if let Some(entry) = self.inner.lock().get_mut(&client_id) {
            entry.schedule.clear();
        }
    }

    /// Every client_id currently present, used by `close()` (spec §4.7).
    pub fn all_client_ids(&self) -> Vec<ClientId> {
        self.inner.lock().keys().copied().collect()
    }

    /// The earliest instant the orchestrator needs to wake up for: either
    /// the next scheduled fire or the next client hard deadline, across
    /// every open client (used to feed the [`crate::clock::TimerWheel`]
    /// instead of busy-polling at the tick cadence alone).
    pub fn earliest_wakeup(&self) -> Option<Instant> {
        self.inner
            .lock()
            .values()
            .filter(|entry| entry.state != QueryState::Done)
            .flat_map(|entry| {
                let next_fire = (entry.state == QueryState::Open)
                    .then(|| entry.schedule.keys().next().copied())
                    .flatten();
                next_fire.into_iter().chain(entry.hard_deadline)
            })
            .min()
    }

    pub fn request_message(&self, client_id: ClientId) -> Option<Message> {
        self.inner.lock().get(&client_id).map(|e| e.request.clone())
    }

    pub fn sink(&self, client_id: ClientId) -> Option<ResultSink> {
        self.inner.lock().get(&client_id).map(|e| e.sink.clone())
    }

    /// Used only to surface spec §4.3 item 3's "protocol bug" check: did we
    /// actually dispatch this exact sub_id for this client?
    pub fn verify_outstanding(
        &self,
        client_id: ClientId,
        sub_id: SubQueryId,
    ) -> Result<(), InternalError> {
        let table = self.inner.lock();
        let Some(entry) = table.get(&client_id) else {
            return Ok(()); // Stale event for an already-removed client; caller drops it.
        };

        if entry.outstanding.contains(&sub_id) {
            Ok(())
        } else {
            Err(InternalError::NotOutstanding { sub_id })
        }
    }
}
