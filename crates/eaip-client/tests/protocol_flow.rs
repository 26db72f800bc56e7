use eaip_client::{
    DataRequester, Handler, MemoryBroker, MemoryTransport, Protocol, PubSubTransport, RequestError,
};
use eaip_proto::{parse_status, DeviceState, DeviceType, TopicScheme};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const BASE: &str = "eaip://integration";

fn endpoint(
    broker: &MemoryBroker,
    id: &str,
    device_type: DeviceType,
) -> Arc<Protocol<MemoryTransport>> {
    Arc::new(Protocol::new(broker.connect(id), device_type, BASE))
}

/// Node that emits one value per start request while streaming is enabled.
fn serve_stream(node: &Arc<Protocol<MemoryTransport>>, data_id: &'static str) -> Arc<AtomicBool> {
    let streaming = Arc::new(AtomicBool::new(false));

    let on_start = Arc::clone(&streaming);
    let producer = Arc::downgrade(node);
    node.subscribe_start(data_id, move |_: &str, _: &str| {
        on_start.store(true, Ordering::SeqCst);
        if let Some(producer) = producer.upgrade() {
            producer.publish_data(data_id, "42").unwrap();
        }
    })
    .unwrap();

    let on_stop = Arc::clone(&streaming);
    node.subscribe_stop(data_id, move |_: &str, _: &str| {
        on_stop.store(false, Ordering::SeqCst);
    })
    .unwrap();

    streaming
}

#[test]
fn data_request_roundtrip() {
    let broker = MemoryBroker::new();
    let node = endpoint(&broker, "node", DeviceType::Node);
    let app = endpoint(&broker, "app", DeviceType::Application);

    node.publish_status(DeviceState::Online, &[]).unwrap();
    let streaming = serve_stream(&node, "temp");

    let requester = DataRequester::new(&app, "node", "temp").unwrap();
    assert_eq!(requester.device_state(), Some(DeviceState::Online));

    requester.start().unwrap();
    assert!(streaming.load(Ordering::SeqCst));
    assert_eq!(requester.get_data().as_deref(), Some("42"));
    assert_eq!(requester.get_data(), None);

    requester.stop().unwrap();
    assert!(!streaming.load(Ordering::SeqCst));

    node.publish_status(DeviceState::Offline, &[]).unwrap();
    assert!(matches!(
        requester.start(),
        Err(RequestError::DeviceUnavailable { .. })
    ));

    requester.close().unwrap();
    assert!(app.transport().registry().is_empty());
}

#[test]
fn two_streams_from_one_node() {
    let broker = MemoryBroker::new();
    let node = endpoint(&broker, "node", DeviceType::Node);
    let app = endpoint(&broker, "app", DeviceType::Application);

    node.publish_status(DeviceState::Online, &[]).unwrap();
    serve_stream(&node, "temp");
    serve_stream(&node, "humidity");

    let temp = DataRequester::new(&app, "node", "temp").unwrap();
    let humidity = DataRequester::new(&app, "node", "humidity").unwrap();
    assert_eq!(temp.device_state(), Some(DeviceState::Online));
    assert_eq!(humidity.device_state(), Some(DeviceState::Online));

    humidity.start().unwrap();
    assert_eq!(humidity.get_data().as_deref(), Some("42"));
    assert_eq!(temp.get_data(), None);
    humidity.close().unwrap();

    node.publish_status(DeviceState::Offline, &[]).unwrap();
    assert!(matches!(
        temp.start(),
        Err(RequestError::DeviceUnavailable { .. })
    ));

    temp.close().unwrap();
    assert!(app.transport().registry().is_empty());
}

#[test]
fn command_and_result() {
    let broker = MemoryBroker::new();
    let node = endpoint(&broker, "node", DeviceType::Node);
    let app = endpoint(&broker, "app", DeviceType::Application);

    let executor = Arc::downgrade(&node);
    node.subscribe_do("blink", move |_: &str, settings: &str| {
        if let Some(executor) = executor.upgrade() {
            let result = format!("blinked {settings}");
            let own_id = executor.device_id().to_string();
            executor.publish_done(&own_id, "blink", &result).unwrap();
        }
    })
    .unwrap();

    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&results);
    app.subscribe_done("node", "blink", move |_: &str, result: &str| {
        sink.lock().push(result.to_string());
    })
    .unwrap();

    app.publish_do("node", "blink", Some("3")).unwrap();
    app.publish_do("node", "blink", None).unwrap();

    assert_eq!(*results.lock(), vec!["blinked 3", "blinked "]);
}

#[test]
fn wildcard_status_monitor() {
    let broker = MemoryBroker::new();
    let scheme = TopicScheme::new(BASE);
    let monitor = broker.connect("monitor");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let parser = scheme.clone();
    let handler: Handler = Arc::new(move |topic: &str, payload: &str| {
        let parts = parser.parse(topic).unwrap();
        let fields = parse_status(payload);
        let state = fields.get("STATE").cloned().unwrap_or_default();
        sink.lock().push((parts.device_id, state));
    });
    monitor.subscribe(&scheme.status("+"), handler).unwrap();

    let a = endpoint(&broker, "devA", DeviceType::Node);
    let b = endpoint(&broker, "devB", DeviceType::Application);
    a.publish_status(DeviceState::Online, &[]).unwrap();
    b.publish_status(DeviceState::Offline, &[]).unwrap();
    a.publish_data("temp", "1").unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            ("devA".to_string(), "ONLINE".to_string()),
            ("devB".to_string(), "OFFLINE".to_string()),
        ]
    );
}

#[test]
fn overlapping_subscriptions_fan_out() {
    let broker = MemoryBroker::new();
    let node = endpoint(&broker, "node", DeviceType::Node);
    let app = endpoint(&broker, "app", DeviceType::Application);
    let order = Arc::new(Mutex::new(Vec::new()));

    let first = Arc::clone(&order);
    app.subscribe_data("node", "temp", move |_: &str, _: &str| first.lock().push("data"))
        .unwrap();

    let second = Arc::clone(&order);
    let all: Handler = Arc::new(move |_: &str, _: &str| second.lock().push("all"));
    app.transport()
        .subscribe(&format!("{BASE}/node/#"), all)
        .unwrap();

    node.publish_data("temp", "7").unwrap();
    assert_eq!(*order.lock(), vec!["data", "all"]);
}
