//! End-to-end scenarios driving `Resolver` against in-memory transports,
//! the way `dns-over-tcp/tests/client_and_server.rs` pairs a real client
//! against an in-process server instead of a live socket.

use std::sync::Arc;
use std::time::Duration;

use dns_types::{Query, RecordType, Response};
use stub_resolver_core::transport::test_support::{EchoTransport, ScriptedReply};
use stub_resolver_core::{ResolveError, ResolverConfig, SingleTransport};
use tokio::sync::mpsc;

fn domain() -> dns_types::DomainName {
    dns_types::DomainName::vec_from_str("example.com").unwrap()
}

fn ok_response() -> Response {
    let query = Query::new(domain(), RecordType::A);
    Response::no_error(&query)
}

fn fast_config() -> ResolverConfig {
    ResolverConfig::new()
        .with_tick_period(Duration::from_millis(10))
        .with_retry(4, Duration::from_secs(5))
}

#[tokio::test(start_paused = true)]
async fn two_server_race_the_faster_transport_wins() {
    let slow: Arc<dyn SingleTransport> = Arc::new(EchoTransport::with_delay(
        "slow",
        vec![ScriptedReply::Response(ok_response())],
        Duration::from_secs(3),
    ));
    let fast: Arc<dyn SingleTransport> = Arc::new(EchoTransport::with_script(
        "fast",
        vec![ScriptedReply::Response(ok_response())],
    ));

    let resolver =
        stub_resolver_core::Resolver::new(fast_config(), vec![fast.clone(), slow.clone()]);

    let result = resolver.query("example.com", RecordType::A).await;
    assert!(result.is_ok());

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn nxdomain_is_terminal_without_waiting_for_remaining_retries() {
    let transport: Arc<dyn SingleTransport> = Arc::new(EchoTransport::with_script(
        "authoritative",
        vec![ScriptedReply::Error(ResolveError::NxDomain)],
    ));

    let resolver = stub_resolver_core::Resolver::new(fast_config(), vec![transport]);

    let err = resolver.query("example.com", RecordType::A).await.unwrap_err();
    assert!(matches!(err, ResolveError::NxDomain));

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn transport_level_failure_sinks_the_transport_and_fails_the_client() {
    let transport: Arc<dyn SingleTransport> = Arc::new(EchoTransport::with_script(
        "flaky",
        vec![ScriptedReply::TransportFailure(ResolveError::Transport {
            server: "flaky".to_string(),
            reason: "connection reset".to_string(),
        })],
    ));

    let resolver = stub_resolver_core::Resolver::new(fast_config(), vec![transport]);

    let err = resolver.query("example.com", RecordType::A).await.unwrap_err();
    assert!(matches!(err, ResolveError::Transport { .. }));

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn client_deadline_overrides_remaining_retry_schedule() {
    let silent: Arc<dyn SingleTransport> = Arc::new(EchoTransport::with_script(
        "unreachable",
        vec![ScriptedReply::Silent],
    ));

    let resolver = stub_resolver_core::Resolver::new(
        fast_config().with_query_timeout(Duration::from_millis(50)),
        vec![silent],
    );

    let err = resolver.query("example.com", RecordType::A).await.unwrap_err();
    assert!(matches!(err, ResolveError::ClientTimeout { .. }));

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn distinct_client_queries_never_cross_talk() {
    let a: Arc<dyn SingleTransport> = Arc::new(EchoTransport::with_script(
        "server-a",
        vec![ScriptedReply::Response(ok_response())],
    ));

    let resolver = stub_resolver_core::Resolver::new(fast_config(), vec![a]);

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let (tx2, mut rx2) = mpsc::unbounded_channel();

    let id1 = resolver
        .send_async(
            stub_resolver_core::Message::query(domain(), RecordType::A, true, false),
            tx1,
            None,
        )
        .unwrap();
    let id2 = resolver
        .send_async(
            stub_resolver_core::Message::query(domain(), RecordType::AAAA, true, false),
            tx2,
            None,
        )
        .unwrap();

    assert_ne!(id1, id2);

    let (got1, msg1, _) = rx1.recv().await.unwrap();
    let (got2, msg2, _) = rx2.recv().await.unwrap();

    assert_eq!(got1, id1);
    assert_eq!(got2, id2);
    assert!(msg1.is_some());
    assert!(msg2.is_some());

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_every_outstanding_query_exactly_once() {
    let silent: Arc<dyn SingleTransport> = Arc::new(EchoTransport::with_script(
        "unreachable",
        vec![ScriptedReply::Silent],
    ));

    let resolver = stub_resolver_core::Resolver::new(fast_config(), vec![silent]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    resolver
        .send_async(
            stub_resolver_core::Message::query(domain(), RecordType::A, true, false),
            tx,
            None,
        )
        .unwrap();

    resolver.close();

    let (_, message, error) = rx.recv().await.unwrap();
    assert!(message.is_none());
    assert!(matches!(error, Some(ResolveError::ResolverClosed)));

    // No second tuple ever arrives for the same query.
    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn dnssec_enabled_routes_successful_replies_through_the_validator() {
    use stub_resolver_core::{Message, SecurityLevel, Validator};

    struct AlwaysSecure;

    #[async_trait::async_trait]
    impl Validator for AlwaysSecure {
        async fn validate(&self, message: Message) -> Result<(Message, SecurityLevel), ResolveError> {
            Ok((message, SecurityLevel::Secure))
        }
    }

    let transport: Arc<dyn SingleTransport> = Arc::new(EchoTransport::with_script(
        "server-0",
        vec![ScriptedReply::Response(ok_response())],
    ));

    let config = fast_config().with_dnssec(true).unwrap();
    let resolver =
        stub_resolver_core::Resolver::with_validator(config, vec![transport], Arc::new(AlwaysSecure));

    let message = resolver.query("example.com", RecordType::A).await.unwrap();
    assert_eq!(message.security_level(), SecurityLevel::Secure);

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn late_sub_query_events_are_ignored_while_awaiting_validation() {
    use stub_resolver_core::{Message, SecurityLevel, Validator};

    struct SlowSecure;

    #[async_trait::async_trait]
    impl Validator for SlowSecure {
        async fn validate(&self, message: Message) -> Result<(Message, SecurityLevel), ResolveError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok((message, SecurityLevel::Secure))
        }
    }

    let fast: Arc<dyn SingleTransport> = Arc::new(EchoTransport::with_script(
        "fast",
        vec![ScriptedReply::Response(ok_response())],
    ));
    // Reports a hard error for the same client well after `fast` has already
    // won and handed off to the (slow) validator, but before the validator
    // replies. Without dropping late events for a client past `Open`, this
    // would race a second terminal tuple (or a second validator call)
    // against the pending validation.
    let slow_timeout: Arc<dyn SingleTransport> = Arc::new(EchoTransport::with_delay(
        "slow",
        vec![ScriptedReply::Error(ResolveError::Timeout {
            server: "slow".into(),
            timeout: Duration::from_secs(10),
        })],
        Duration::from_millis(20),
    ));

    // A small retry_delay keeps the round-0 stagger between the two servers
    // under a millisecond, so `slow`'s sub-query is dispatched (and its
    // error event posted) well before the 100ms validator call returns --
    // otherwise the race this test exists to cover would never happen.
    let config = fast_config()
        .with_retry(4, Duration::from_millis(2))
        .with_dnssec(true)
        .unwrap();
    let resolver = stub_resolver_core::Resolver::with_validator(
        config,
        vec![fast, slow_timeout],
        Arc::new(SlowSecure),
    );

    let message = resolver.query("example.com", RecordType::A).await.unwrap();
    assert_eq!(message.security_level(), SecurityLevel::Secure);

    resolver.close();
}
