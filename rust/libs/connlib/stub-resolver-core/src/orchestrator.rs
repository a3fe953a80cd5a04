//! Orchestrator (Tick Loop) -- spec §4.3/§4.4.
//!
//! Owns the Query Table, Server Ranking and Event Bus receiver, and runs as
//! a single background tokio task. All mutation of ranking and schedule
//! state happens from inside this one task's loop iterations -- the same
//! "single writer, event-driven `select!`" shape as
//! `phoenix-channel::PhoenixChannel::poll` and
//! `dns-over-tcp::client::Client::handle_timeout`/`poll_timeout`, just
//! pushed onto its own tokio task instead of driven by an outer `Future::poll`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::clock::{Clock, TimerWheel};
use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::event_bus::{self, Event, EventBusReceiver, EventBusSender, EventKind};
use crate::ids::{ClientId, SubQueryId};
use crate::query_table::{ClientEntry, QueryState, QueryTable, ResolveResult};
use crate::ranking::ServerRanking;
use crate::transport::Validator;

/// Handle used by [`crate::resolver::Resolver`] to talk to the background
/// tick loop.
pub struct OrchestratorHandle {
    pub query_table: Arc<QueryTable>,
    ranking: Arc<Mutex<ServerRanking>>,
    wake: Arc<Notify>,
    closed: Arc<AtomicBool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl OrchestratorHandle {
    pub fn spawn(
        config: ResolverConfig,
        ranking: ServerRanking,
        validator: Arc<dyn Validator>,
    ) -> Self {
        let query_table = Arc::new(QueryTable::new());
        let ranking = Arc::new(Mutex::new(ranking));
        let wake = Arc::new(Notify::new());
        let closed = Arc::new(AtomicBool::new(false));
        let (bus_tx, bus_rx) = event_bus::channel();

        let join = tokio::spawn(run(
            query_table.clone(),
            ranking.clone(),
            bus_rx,
            bus_tx,
            config,
            validator,
            wake.clone(),
            closed.clone(),
        ));

        Self {
            query_table,
            ranking,
            wake,
            closed,
            join: Mutex::new(Some(join)),
        }
    }

    /// Wakes the tick loop immediately instead of waiting for the next
    /// `tick_period`, used when a fresh query lands on an otherwise-empty
    /// table (spec §4.6, `send_async`).
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn current_server_ids(&self) -> Vec<crate::ids::TransportId> {
        self.ranking.lock().ids()
    }

    /// Replaces the ranking list wholesale (spec §6, `nameserver`:
    /// "replaces the ranking list"). In-flight client queries keep racing
    /// whatever `TransportId`s they were scheduled against; only fresh
    /// `send_async` calls see the new list.
    pub fn replace_ranking(&self, ranking: ServerRanking) {
        *self.ranking.lock() = ranking;
    }

    /// Shutdown (spec §4.7). Stops the tick loop, fails every outstanding
    /// client query with [`ResolveError::ResolverClosed`], and drops the
    /// table.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return; // Already closed.
        }

        for client_id in self.query_table.all_client_ids() {
            if let Some(entry) = self.query_table.remove(client_id) {
                let _ = entry.sink.send((client_id, None, Some(ResolveError::ResolverClosed)));
            }
        }

        self.wake.notify_one();

        if let Some(join) = self.join.lock().take() {
            join.abort();
        }
    }
}

impl Drop for OrchestratorHandle {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run(
    query_table: Arc<QueryTable>,
    ranking: Arc<Mutex<ServerRanking>>,
    mut bus_rx: EventBusReceiver,
    bus_tx: EventBusSender,
    config: ResolverConfig,
    validator: Arc<dyn Validator>,
    wake: Arc<Notify>,
    closed: Arc<AtomicBool>,
) {
    let mut rng = StdRng::from_entropy();
    let clock = Clock;
    let dnssec = config.transport.dnssec;

    loop {
        if closed.load(Ordering::Acquire) {
            return;
        }

        // The timer wheel is rebuilt every iteration from whatever is still
        // due; it only ever needs to know the single earliest wake-up, not
        // the full set of future fire times (those stay in the Query
        // Table's own per-client schedules).
        let mut wheel = TimerWheel::new();
        if let Some(next) = query_table.earliest_wakeup() {
            wheel.schedule(next);
        }
        let sleep_for = wheel.sleep_duration(clock.now(), config.tick_period);

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = wake.notified() => {}
            event = bus_rx.recv() => {
                match event {
                    Some(event) => handle_event(&query_table, &ranking, &bus_tx, &validator, dnssec, event),
                    None => return,
                }
            }
        }

        while let Ok(event) = bus_rx.try_recv() {
            handle_event(&query_table, &ranking, &bus_tx, &validator, dnssec, event);
        }

        let now = clock.now();
        dispatch_due(&query_table, &ranking, &bus_tx, &mut rng, now);
        check_client_timeouts(&query_table, now);
    }
}

/// Fires every schedule entry whose time has come (spec §4.3 step 2):
/// assign a fresh transaction id, record the sub-query as outstanding, and
/// hand the packet to its transport.
fn dispatch_due(
    query_table: &Arc<QueryTable>,
    ranking: &Arc<Mutex<ServerRanking>>,
    bus_tx: &EventBusSender,
    rng: &mut StdRng,
    now: Instant,
) {
    for (client_id, transport_id, attempt) in query_table.pop_due(now) {
        let Some(request) = query_table.request_message(client_id) else {
            continue; // Client was removed between planning and firing.
        };

        let transport = ranking.lock().transport(transport_id);
        let Some(transport) = transport else {
            continue; // Should not happen: transport ids never change once built.
        };

        let sub_id = SubQueryId {
            transport: transport_id,
            client: client_id,
            attempt,
        };

        let message = request.with_fresh_id(rng);
        query_table.record_outstanding(client_id, sub_id);

        let bus_tx = bus_tx.clone();

        tokio::spawn(async move {
            transport.send_async(message, bus_tx, sub_id).await;
        });
    }
}

/// Fails any client whose `hard_deadline` has elapsed (spec §4.3 step 4,
/// property P9): the client-level deadline always wins over any remaining
/// retry schedule.
fn check_client_timeouts(query_table: &Arc<QueryTable>, now: Instant) {
    for client_id in query_table.all_client_ids() {
        let Some(deadline) = query_table.hard_deadline(client_id) else {
            continue;
        };

        if now < deadline {
            continue;
        }

        if let Some(entry) = query_table.remove(client_id) {
            let query_timeout = entry.query_timeout;
            finalize(
                client_id,
                entry,
                None,
                Some(ResolveError::ClientTimeout { query_timeout }),
            );
        }
    }
}

fn handle_event(
    query_table: &Arc<QueryTable>,
    ranking: &Arc<Mutex<ServerRanking>>,
    bus_tx: &EventBusSender,
    validator: &Arc<dyn Validator>,
    dnssec: bool,
    event: Event,
) {
    let client_id = event.sub_id.client;
    let transport_id = event.sub_id.transport;

    if let Err(err) = query_table.verify_outstanding(client_id, event.sub_id) {
        // A transport reported a sub_id we never dispatched -- a bug in the
        // orchestrator or a misbehaving transport, not a transient
        // condition. A resolver library must not crash its host process
        // over this, so fail the one affected client query as a fail-safe
        // instead of propagating the panic.
        debug_assert!(false, "{err}");
        tracing::error!(%err, "internal invariant violation; failing affected client query");

        if let Some(entry) = query_table.remove(client_id) {
            finalize(
                client_id,
                entry,
                None,
                Some(ResolveError::Transport {
                    server: transport_id.to_string(),
                    reason: "internal orchestrator invariant violation".to_string(),
                }),
            );
        }
        return;
    }

    query_table.clear_outstanding(client_id, event.sub_id);

    // Once a client has a winning response and is waiting on the validator
    // (or has already been finalized), only the VALIDATED event coming back
    // from that hand-off may resolve it. Late RECEIVED/ERROR events from
    // other still-outstanding sub-queries for the same client must not race
    // a second validator call or a competing timeout/error against the
    // pending validation (spec §3, `state`; §4.4 keeps such a client "in the
    // table awaiting validation", implying nothing else may finalize it).
    let still_racing = matches!(query_table.state(client_id), Some(QueryState::Open));

    match event.kind {
        EventKind::Received => {
            if !still_racing {
                return;
            }

            if let Some(error) = event.error {
                on_transport_error(query_table, ranking, client_id, transport_id, error);
                return;
            }

            let Some(message) = event.message else {
                return;
            };

            on_response_received(
                query_table, ranking, bus_tx, validator, dnssec, client_id, transport_id, message,
            );
        }
        EventKind::Validated => {
            if let Some(error) = event.error {
                if let Some(entry) = query_table.remove(client_id) {
                    finalize(client_id, entry, None, Some(error));
                }
                return;
            }

            if let Some(message) = event.message {
                if let Some(entry) = query_table.remove(client_id) {
                    finalize(client_id, entry, Some(message), None);
                }
            }
        }
        EventKind::Error => {
            if !still_racing {
                return;
            }

            if let Some(error) = event.error {
                on_transport_error(query_table, ranking, client_id, transport_id, error);
            }
        }
    }
}

/// Classifies a successful `RECEIVED` reply (spec §4.4). The validator is
/// only ever consulted when DNSSEC is enabled on the transport -- a
/// DNSSEC-off resolver trusts the upstream's answer as-is, matching the
/// `NoopValidator`'s purpose of never being called in that configuration.
///
/// The hand-off itself is spawned onto its own task, the same way
/// `dispatch_due` spawns transport sends: `validate` can legitimately take
/// tens to hundreds of milliseconds, and awaiting it inline here would stall
/// the one tick-loop task -- and every other concurrently in-flight client
/// query's due fires and deadline checks -- for that entire duration (spec
/// §5's "multiplexes many in-flight client queries" fairness model).
#[allow(clippy::too_many_arguments)]
fn on_response_received(
    query_table: &Arc<QueryTable>,
    ranking: &Arc<Mutex<ServerRanking>>,
    bus_tx: &EventBusSender,
    validator: &Arc<dyn Validator>,
    dnssec: bool,
    client_id: ClientId,
    transport_id: crate::ids::TransportId,
    message: crate::message::Message,
) {
    ranking.lock().promote(transport_id);

    if !dnssec {
        query_table.clear_schedule(client_id);
        if let Some(entry) = query_table.remove(client_id) {
            finalize(client_id, entry, Some(message), None);
        }
        return;
    }

    query_table.clear_schedule(client_id);
    query_table.set_state(client_id, QueryState::StoppedWaitingValidation);

    let sub_id = SubQueryId {
        transport: transport_id,
        client: client_id,
        attempt: 0,
    };

    let validator = validator.clone();
    let bus_tx = bus_tx.clone();

    tokio::spawn(async move {
        match validator.validate(message).await {
            Ok((message, level)) => {
                let _ = bus_tx.send(Event::validated(sub_id, message.with_security_level(level)));
            }
            Err(error) => {
                let _ = bus_tx.send(Event::validation_error(sub_id, error));
            }
        }
    });
}

/// Classifies a transport-level failure (spec §4.4).
fn on_transport_error(
    query_table: &Arc<QueryTable>,
    ranking: &Arc<Mutex<ServerRanking>>,
    client_id: ClientId,
    transport_id: crate::ids::TransportId,
    error: ResolveError,
) {
    #[allow(clippy::wildcard_enum_match_arm)]
    match &error {
        ResolveError::Timeout { .. } => {
            ranking.lock().demote(transport_id);

            if query_table.is_outstanding_and_schedule_empty(client_id) {
                if let Some(entry) = query_table.remove(client_id) {
                    finalize(client_id, entry, None, Some(error));
                }
            }
        }
        ResolveError::NxDomain => {
            query_table.clear_schedule(client_id);
            if let Some(entry) = query_table.remove(client_id) {
                finalize(client_id, entry, None, Some(error));
            }
        }
        ResolveError::ResourceExhausted { .. } => {
            tracing::warn!(%error, "Transport reported resource exhaustion, leaving schedule intact");
        }
        _ => {
            ranking.lock().sink_to_bottom(transport_id);
            query_table.drop_transport_from_schedule(client_id, transport_id);

            if query_table.is_outstanding_and_schedule_empty(client_id) {
                if let Some(entry) = query_table.remove(client_id) {
                    finalize(client_id, entry, None, Some(error));
                }
            }
        }
    }
}

fn finalize(
    client_id: ClientId,
    entry: ClientEntry,
    message: Option<crate::message::Message>,
    error: Option<ResolveError>,
) {
    let result: ResolveResult = (client_id, message, error);
    if entry.sink.send(result).is_err() {
        tracing::debug!(%client_id, "Caller dropped their result sink before the reply arrived");
    }
}
