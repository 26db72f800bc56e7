use eaip_client::{DataRequester, MqttConfig, MqttTransport, Protocol};
use eaip_proto::{DeviceState, DeviceType};
use std::time::{Duration, Instant};
use uuid::Uuid;

fn connect(client_id: String) -> MqttTransport {
    let broker = std::env::var("EAIP_MQTT_BROKER")
        .unwrap_or_else(|_| "tcp://localhost:1883".to_string());
    MqttTransport::connect(MqttConfig {
        broker,
        client_id,
        keep_alive: Duration::from_secs(5),
        last_will: None,
    })
    .unwrap()
}

fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

#[test]
fn mqtt_data_roundtrip() {
    if std::env::var("EAIP_INTEGRATION").is_err() {
        eprintln!("Skipping integration test; set EAIP_INTEGRATION=1 to run");
        return;
    }

    let base = format!("eaip://integration-{}", Uuid::new_v4().simple());
    let node_id = format!("node{}", Uuid::new_v4().simple());

    let node = Protocol::new(connect(node_id.clone()), DeviceType::Node, &base);
    let app = Protocol::new(
        connect(format!("app{}", Uuid::new_v4().simple())),
        DeviceType::Application,
        &base,
    );

    node.publish_status(DeviceState::Online, &[]).unwrap();

    let requester = DataRequester::new(&app, &node_id, "value").unwrap();
    assert!(wait_for(|| requester.device_state() == Some(DeviceState::Online)));

    // Give the broker time to acknowledge the data subscription.
    std::thread::sleep(Duration::from_millis(500));
    node.publish_data("value", "17").unwrap();
    assert!(wait_for(|| requester.pending() > 0));
    assert_eq!(requester.get_data().as_deref(), Some("17"));

    requester.close().unwrap();
    node.publish_status(DeviceState::Offline, &[]).unwrap();

    app.transport().disconnect();
    node.transport().disconnect();
}
