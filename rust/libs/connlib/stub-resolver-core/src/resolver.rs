//! Public Resolver API (spec §4.6) and Shutdown (spec §4.7).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dns_types::{DomainName, RecordType};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::ids::ClientId;
use crate::message::Message;
use crate::orchestrator::OrchestratorHandle;
use crate::query_table::{InsertOutcome, ResolveResult};
use crate::ranking::ServerRanking;
use crate::transport::{NoopValidator, SingleTransport, Validator};

/// One logical client query in flight, returned by [`Resolver::send_async`].
pub type ResultReceiver = mpsc::UnboundedReceiver<ResolveResult>;

/// The multi-server retry-and-racing orchestrator (spec §4.6). Cheap to
/// clone: internally just an `Arc` around the orchestrator handle, matching
/// `PhoenixChannel`'s "clone the client, not the connection" idiom.
#[derive(Clone)]
pub struct Resolver {
    handle: Arc<OrchestratorHandle>,
    config: ResolverConfig,
    id_source: Arc<AtomicU64>,
}

impl Resolver {
    /// Builds a resolver with an already-validated configuration and one
    /// transport per upstream server, in priority order (spec §4.6).
    pub fn new(config: ResolverConfig, servers: Vec<Arc<dyn SingleTransport>>) -> Self {
        Self::with_validator(config, servers, Arc::new(NoopValidator))
    }

    /// As [`Resolver::new`], but with an explicit DNSSEC validator instead
    /// of the default no-op (spec §6).
    pub fn with_validator(
        config: ResolverConfig,
        servers: Vec<Arc<dyn SingleTransport>>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        for transport in &servers {
            transport.set_config(&config.transport);
        }

        let ranking = ServerRanking::new(servers);
        let handle = OrchestratorHandle::spawn(config.clone(), ranking, validator);

        Self {
            handle: Arc::new(handle),
            config,
            id_source: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Synchronous convenience wrapper: builds a query message from `name`
    /// and `rtype` using the resolver's configured defaults (RD from
    /// `recurse`, CD from `default_checking_disabled`) and dispatches it.
    pub async fn query(&self, name: &str, rtype: RecordType) -> Result<Message, ResolveError> {
        self.query_with_cd(name, rtype, None).await
    }

    /// As [`Self::query`], but lets the caller override the CD bit for this
    /// one query instead of the resolver's `default_checking_disabled`
    /// (spec §4.6: `query(name, type, class, set_cd?)`).
    pub async fn query_with_cd(
        &self,
        name: &str,
        rtype: RecordType,
        set_cd: Option<bool>,
    ) -> Result<Message, ResolveError> {
        let domain = DomainName::vec_from_str(name)
            .map_err(|e| ResolveError::Argument(format!("invalid domain name {name:?}: {e}")))?;

        let checking_disabled = set_cd.unwrap_or_else(|| self.config.default_checking_disabled());

        let message = Message::query(domain, rtype, self.config.transport.recurse, checking_disabled);

        self.send_message(message).await
    }

    /// Dispatches an already-built message and awaits its single terminal
    /// result, generating a fresh client id (spec §4.6).
    pub async fn send_message(&self, message: Message) -> Result<Message, ResolveError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.send_async(message, tx, None)?;

        match rx.recv().await {
            Some((_, Some(message), _)) => Ok(message),
            Some((_, None, Some(error))) => Err(error),
            Some((_, None, None)) | None => Err(ResolveError::ResolverClosed),
        }
    }

    /// Asynchronous entry point (spec §4.6): validates `message`, assigns a
    /// `client_id` if the caller didn't supply one, registers it in the
    /// Query Table, and wakes the tick loop immediately if the table was
    /// otherwise empty.
    ///
    /// On an `ArgumentError` (no configured servers, a duplicate
    /// `client_id`, ...), the error is pushed onto `sink` as the query's one
    /// terminal tuple rather than only returned from this call (spec §4.6:
    /// "pushes a single error tuple to sink and returns"; §7: "reported
    /// synchronously on the sink without consulting transports") -- a caller
    /// that follows the documented contract and only ever polls `sink` must
    /// still observe exactly one terminal event per `client_id` (I3), even
    /// for a query that never made it into the Query Table.
    pub fn send_async(
        &self,
        message: Message,
        sink: mpsc::UnboundedSender<ResolveResult>,
        client_id: Option<ClientId>,
    ) -> Result<ClientId, ResolveError> {
        let client_id = client_id.unwrap_or_else(|| self.next_client_id());

        let servers = self.handle.current_server_ids();
        if servers.is_empty() {
            let error = ResolveError::Argument("resolver has no configured upstream servers".into());
            let _ = sink.send((client_id, None, Some(error.clone())));
            return Err(error);
        }

        let was_empty = self.handle.query_table.is_empty();
        let now = Instant::now();

        let outcome = self.handle.query_table.insert(
            client_id,
            message,
            sink.clone(),
            &servers,
            self.config.retry_times,
            self.config.retry_delay,
            self.config.query_timeout,
            now,
        );

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                let _ = sink.send((client_id, None, Some(error.clone())));
                return Err(error);
            }
        };

        if outcome == InsertOutcome::DuplicateId {
            let error = ResolveError::Argument(format!("client_id {client_id} is already in flight"));
            let _ = sink.send((client_id, None, Some(error.clone())));
            return Err(error);
        }

        if was_empty {
            self.handle.wake();
        }

        Ok(client_id)
    }

    /// Replaces the upstream server pool wholesale (spec §6, `nameserver`:
    /// "replaces the ranking list"). Queries already in flight keep racing
    /// their originally-scheduled servers; only queries started after this
    /// call see the new pool.
    pub fn set_nameservers(&self, servers: Vec<Arc<dyn SingleTransport>>) {
        for transport in &servers {
            transport.set_config(&self.config.transport);
        }

        self.handle.replace_ranking(ServerRanking::new(servers));
    }

    /// Cancels a query in flight. A no-op if `client_id` already completed.
    pub fn cancel(&self, client_id: ClientId) {
        self.handle.query_table.cancel(client_id);
        self.handle.query_table.remove(client_id);
    }

    /// Shutdown (spec §4.7): fails every outstanding client query with
    /// [`ResolveError::ResolverClosed`] and stops the tick loop. Idempotent.
    pub fn close(&self) {
        self.handle.close();
    }

    /// `now + small_random_int`, per spec.md §4.6's client id generation
    /// scheme for callers that don't supply their own. `unique` alone
    /// already guarantees distinctness within a process; `now`/`jitter`
    /// just keep ids from being predictable across resolver instances.
    fn next_client_id(&self) -> ClientId {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let jitter: u32 = rand::thread_rng().r#gen();
        let unique = self.id_source.fetch_add(1, Ordering::Relaxed);

        ClientId(now ^ u64::from(jitter) ^ unique)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::test_support::{EchoTransport, ScriptedReply};
    use dns_types::{Query, RecordType, Response};

    fn domain() -> DomainName {
        DomainName::vec_from_str("example.com").unwrap()
    }

    fn ok_response() -> Response {
        let query = Query::new(domain(), RecordType::A);
        Response::no_error(&query)
    }

    #[tokio::test(start_paused = true)]
    async fn single_server_success_returns_exactly_one_result() {
        let transport: Arc<dyn SingleTransport> = Arc::new(EchoTransport::with_script(
            "server-0",
            vec![ScriptedReply::Response(ok_response())],
        ));

        let resolver = Resolver::new(
            ResolverConfig::new().with_tick_period(Duration::from_millis(10)),
            vec![transport],
        );

        let result = resolver.query("example.com", RecordType::A).await;
        assert!(result.is_ok());

        resolver.close();
    }

    #[tokio::test(start_paused = true)]
    async fn nxdomain_short_circuits_without_waiting_for_retries() {
        let transport: Arc<dyn SingleTransport> = Arc::new(EchoTransport::with_script(
            "server-0",
            vec![ScriptedReply::Error(ResolveError::NxDomain)],
        ));

        let resolver = Resolver::new(
            ResolverConfig::new()
                .with_tick_period(Duration::from_millis(10))
                .with_retry(4, Duration::from_secs(5)),
            vec![transport],
        );

        let err = resolver.query("example.com", RecordType::A).await.unwrap_err();
        assert!(matches!(err, ResolveError::NxDomain));

        resolver.close();
    }

    #[tokio::test(start_paused = true)]
    async fn close_fails_every_outstanding_query() {
        let transport: Arc<dyn SingleTransport> = Arc::new(EchoTransport::with_script(
            "server-0",
            vec![ScriptedReply::Silent],
        ));

        let resolver = Resolver::new(
            ResolverConfig::new().with_tick_period(Duration::from_millis(10)),
            vec![transport],
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        resolver
            .send_async(
                Message::query(domain(), RecordType::A, true, false),
                tx,
                None,
            )
            .unwrap();

        resolver.close();

        let (_, message, error) = rx.recv().await.unwrap();
        assert!(message.is_none());
        assert!(matches!(error, Some(ResolveError::ResolverClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn set_nameservers_is_used_by_subsequent_queries() {
        let dead: Arc<dyn SingleTransport> =
            Arc::new(EchoTransport::with_script("dead", vec![ScriptedReply::Silent]));

        let resolver = Resolver::new(
            ResolverConfig::new().with_tick_period(Duration::from_millis(10)),
            vec![dead],
        );

        let alive: Arc<dyn SingleTransport> = Arc::new(EchoTransport::with_script(
            "alive",
            vec![ScriptedReply::Response(ok_response())],
        ));
        resolver.set_nameservers(vec![alive]);

        let result = resolver.query("example.com", RecordType::A).await;
        assert!(result.is_ok());

        resolver.close();
    }

    #[tokio::test(start_paused = true)]
    async fn query_with_cd_overrides_the_resolver_default() {
        let transport: Arc<dyn SingleTransport> = Arc::new(EchoTransport::with_script(
            "server-0",
            vec![ScriptedReply::Response(ok_response())],
        ));

        // DNSSEC off, so the resolver's own default is checking_disabled=false.
        let resolver = Resolver::new(
            ResolverConfig::new().with_tick_period(Duration::from_millis(10)),
            vec![transport],
        );

        let message = resolver
            .query_with_cd("example.com", RecordType::A, Some(true))
            .await
            .unwrap();

        assert!(message.checking_disabled());

        resolver.close();
    }

    #[tokio::test(start_paused = true)]
    async fn send_async_with_no_servers_pushes_argument_error_to_sink() {
        let resolver = Resolver::new(
            ResolverConfig::new().with_tick_period(Duration::from_millis(10)),
            vec![],
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = resolver.send_async(Message::query(domain(), RecordType::A, true, false), tx, None);
        assert!(result.is_err());

        let (_, message, error) = rx.recv().await.unwrap();
        assert!(message.is_none());
        assert!(matches!(error, Some(ResolveError::Argument(_))));

        resolver.close();
    }

    #[tokio::test(start_paused = true)]
    async fn send_async_with_duplicate_client_id_pushes_argument_error_to_sink() {
        let transport: Arc<dyn SingleTransport> =
            Arc::new(EchoTransport::with_script("server-0", vec![ScriptedReply::Silent]));

        let resolver = Resolver::new(
            ResolverConfig::new().with_tick_period(Duration::from_millis(10)),
            vec![transport],
        );

        let client_id = ClientId(42);

        let (tx1, _rx1) = mpsc::unbounded_channel();
        resolver
            .send_async(
                Message::query(domain(), RecordType::A, true, false),
                tx1,
                Some(client_id),
            )
            .unwrap();

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let result = resolver.send_async(
            Message::query(domain(), RecordType::AAAA, true, false),
            tx2,
            Some(client_id),
        );
        assert!(result.is_err());

        let (got_id, message, error) = rx2.recv().await.unwrap();
        assert_eq!(got_id, client_id);
        assert!(message.is_none());
        assert!(matches!(error, Some(ResolveError::Argument(_))));

        resolver.close();
    }
}
