mod support;

use probedock_rt::{
    BridgeState, ConnectionBridge, Endpoint, FilterDefinition, FilterFetcher, FilterResult,
    FilterSource, Listener, Notifier, ProjectKey, Settings, TestResult, TestRun,
};
use rt_channel::{SocketIoChannel, SocketIoOptions};
use rt_proto::{EVENT_FILTERS_GET, EVENT_PAYLOAD, EVENT_RUN_END, EVENT_RUN_START, EVENT_TEST_RESULT};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{closed_port, AgentScript, FakeAgent, FiltersReply};

fn settings_for(port: u16) -> Settings {
    Settings {
        endpoint: Endpoint::new("127.0.0.1", port),
        connect_timeout: Duration::from_secs(5),
        filters_timeout: Duration::from_secs(5),
        ..Settings::default()
    }
}

/// A bridge of its own for each test; only one test below goes through the
/// process-wide instance.
fn bridge_for(settings: &Settings) -> ConnectionBridge {
    let options = SocketIoOptions {
        connect_timeout: settings.connect_timeout,
        ..SocketIoOptions::default()
    };
    let channel = SocketIoChannel::new(&settings.url(), options).expect("channel");
    ConnectionBridge::attach(Arc::new(channel), settings)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[test_timeout::timeout(20)]
fn notifications_reach_the_agent_in_call_order() {
    init_tracing();
    let agent = FakeAgent::start(AgentScript::default());
    let bridge = Arc::new(bridge_for(&settings_for(agent.addr.port())));
    assert_eq!(bridge.state(), BridgeState::Connected);

    let notifier = Notifier::new(bridge);
    notifier.notify_start("api", "1.4.0", Some("integration"));
    notifier.notify_test_result(
        &TestResult::new("creates an order", true, 31).with_tag("orders"),
        "api",
        "1.4.0",
        Some("integration"),
    );
    notifier.send(&TestRun {
        project: Some("api".into()),
        version: "1.4.0".into(),
        duration: 31,
        ..TestRun::default()
    });
    notifier.notify_end("api", "1.4.0", Some("integration"), 31);

    let wait = Duration::from_secs(5);
    let start = agent.next_event(wait).expect("run:start");
    assert_eq!(start.event, EVENT_RUN_START);
    assert_eq!(
        start.args,
        vec![json!({"project": {"name": "api", "version": "1.4.0"}, "category": "integration"})]
    );

    let result = agent.next_event(wait).expect("run:test:result");
    assert_eq!(result.event, EVENT_TEST_RESULT);
    assert_eq!(
        result.args,
        vec![json!({
            "n": "creates an order",
            "j": "api",
            "v": "1.4.0",
            "e": true,
            "p": true,
            "d": 31,
            "c": "integration",
            "g": ["orders"],
            "t": [],
            "a": {}
        })]
    );

    let payload = agent.next_event(wait).expect("payload");
    assert_eq!(payload.event, EVENT_PAYLOAD);
    match payload.args.first() {
        Some(Value::String(raw)) => {
            let run: Value = serde_json::from_str(raw).expect("payload is json text");
            assert_eq!(run["version"], "1.4.0");
        }
        other => panic!("expected a string payload, got {other:?}"),
    }

    let end = agent.next_event(wait).expect("run:end");
    assert_eq!(end.event, EVENT_RUN_END);
    assert_eq!(end.args[0]["duration"], 31);
}

#[test_timeout::timeout(20)]
fn filters_are_pulled_through_the_acknowledgement() {
    init_tracing();
    let agent = FakeAgent::start(AgentScript {
        filters: FiltersReply::Ack(json!({
            "filters": [{"type": "tag", "text": "slow"}, {"type": "tag", "text": "fast"}]
        })),
        ..AgentScript::default()
    });
    let bridge = Arc::new(bridge_for(&settings_for(agent.addr.port())));

    let result = FilterFetcher::new(bridge).get_filters();
    assert_eq!(
        result,
        FilterResult::Filters(vec![
            FilterDefinition::new("tag", "slow"),
            FilterDefinition::new("tag", "fast"),
        ])
    );
    let request = agent.next_event(Duration::from_secs(5)).expect("filters:get");
    assert_eq!(request.event, EVENT_FILTERS_GET);
    assert!(request.args.is_empty());
}

#[test_timeout::timeout(20)]
fn unanswered_filters_request_is_bounded() {
    init_tracing();
    let agent = FakeAgent::start(AgentScript {
        filters: FiltersReply::Never,
        ..AgentScript::default()
    });
    let bridge = Arc::new(bridge_for(&settings_for(agent.addr.port())));
    let fetcher = FilterFetcher::new(bridge).with_timeout(Duration::from_millis(300));

    let started = Instant::now();
    assert_eq!(fetcher.get_filters(), FilterResult::Unavailable);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "returned late: {elapsed:?}");
}

#[test_timeout::timeout(20)]
fn unreachable_agent_fails_fast_and_stays_silent() {
    init_tracing();
    let bridge = Arc::new(bridge_for(&settings_for(closed_port())));
    assert_eq!(bridge.state(), BridgeState::Failed);

    let notifier = Notifier::new(bridge.clone());
    notifier.notify_start("api", "1.0", None);
    notifier.notify_test_result(&TestResult::new("t", true, 1), "api", "1.0", None);
    notifier.send(&TestRun::default());
    notifier.notify_end("api", "1.0", None, 1);
    assert_eq!(FilterFetcher::new(bridge).get_filters(), FilterResult::Unavailable);
}

#[test_timeout::timeout(20)]
fn refused_namespace_fails_the_bridge() {
    init_tracing();
    let agent = FakeAgent::start(AgentScript {
        refuse: Some("not authorized".into()),
        ..AgentScript::default()
    });
    let bridge = bridge_for(&settings_for(agent.addr.port()));
    assert_eq!(bridge.state(), BridgeState::Failed);
}

#[test_timeout::timeout(20)]
fn stalled_handshake_is_bounded_by_connect_timeout() {
    init_tracing();
    // Accepts TCP but never answers the websocket upgrade.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let settings = Settings {
        connect_timeout: Duration::from_millis(400),
        ..settings_for(port)
    };

    let started = Instant::now();
    let bridge = bridge_for(&settings);
    let elapsed = started.elapsed();
    assert_eq!(bridge.state(), BridgeState::Failed);
    assert!(elapsed < Duration::from_secs(5), "returned late: {elapsed:?}");
    drop(listener);
}

#[test_timeout::timeout(20)]
fn global_bridge_opens_a_single_channel() {
    init_tracing();
    let agent = FakeAgent::start(AgentScript::default());
    assert!(ConnectionBridge::global().is_none());

    let settings = settings_for(agent.addr.port());
    let first = ConnectionBridge::init(&settings);
    let second = ConnectionBridge::init(&settings_for(closed_port()));
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.state(), BridgeState::Connected);
    let global = ConnectionBridge::global().expect("initialised");
    assert!(Arc::ptr_eq(&first, &global));

    // Both facades ride the shared bridge instead of dialling again.
    let listener = Listener::new(&settings);
    let source = FilterSource::new(&Settings::default());
    listener.test_run_start(&ProjectKey::name("api"), "1.0", None);
    assert_eq!(source.get_filters(), FilterResult::Filters(vec![]));

    let wait = Duration::from_secs(5);
    assert_eq!(agent.next_event(wait).expect("run:start").event, EVENT_RUN_START);
    assert_eq!(agent.next_event(wait).expect("filters:get").event, EVENT_FILTERS_GET);
    assert_eq!(agent.connections(), 1);
}
