//! End-to-end subscriber tests against the in-process mock publisher.

use gep_subscriber::mocks::{MockPublisher, MockSignal, PublisherSession};
use gep_subscriber::transport::constants::server_command;
use gep_subscriber::{DataSubscriber, SubscriberConnector, SubscriptionInfo};
use parking_lot::Mutex;
use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Polls `condition` until it holds or `timeout` elapses.
fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Shared event recorder filled from subscriber callbacks.
#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn new() -> Self {
        Recorder::default()
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    fn snapshot(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn count_matching(&self, needle: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.contains(needle))
            .count()
    }
}

/// Connects a subscriber to a fresh mock publisher and consumes the
/// operational-modes handshake.
fn connect_pair() -> (DataSubscriber, MockPublisher, PublisherSession) {
    let publisher = MockPublisher::bind().unwrap();
    let subscriber = DataSubscriber::new();

    subscriber.connect("127.0.0.1", publisher.port()).unwrap();
    let mut session = publisher.accept().unwrap();

    let modes = session
        .expect_command(server_command::DEFINE_OPERATIONAL_MODES)
        .unwrap();
    assert_eq!(modes.len(), 4, "operational modes payload is a single u32");

    (subscriber, publisher, session)
}

/// Subscribes with `info` and acknowledges through the mock session.
fn subscribe_and_ack(
    subscriber: &DataSubscriber,
    session: &mut PublisherSession,
    info: SubscriptionInfo,
) {
    subscriber.subscribe(info).unwrap();
    session.expect_command(server_command::SUBSCRIBE).unwrap();
    session.send_succeeded(server_command::SUBSCRIBE, "OK").unwrap();

    assert!(
        wait_for(Duration::from_secs(5), || subscriber.is_subscribed()),
        "subscriber should report subscribed after the publisher acknowledges"
    );
}

#[test]
fn test_subscribe_success_sets_state_and_reports_status() {
    let (subscriber, _publisher, mut session) = connect_pair();

    let status = Recorder::new();
    {
        let status = status.clone();
        subscriber.register_status_message_callback(move |message| status.push(message));
    }

    assert!(!subscriber.is_subscribed());
    subscribe_and_ack(&subscriber, &mut session, SubscriptionInfo::default());

    assert!(wait_for(Duration::from_secs(5), || {
        !status.snapshot().is_empty()
    }));
    assert_eq!(
        status.snapshot()[0],
        "Received success code in response to server command 0x08: OK"
    );

    subscriber.disconnect();
}

#[test]
fn test_subscribe_payload_carries_connection_string() {
    let (subscriber, _publisher, mut session) = connect_pair();

    let info = SubscriptionInfo {
        filter_expression: "FILTER ActiveMeasurements WHERE SignalType = 'FREQ'".to_string(),
        ..Default::default()
    };
    subscriber.subscribe(info).unwrap();

    let payload = session.expect_command(server_command::SUBSCRIBE).unwrap();
    let size = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]) as usize;
    let connection = std::str::from_utf8(&payload[5..5 + size]).unwrap();

    assert!(connection.starts_with("trackLatestMeasurements=false;"));
    assert!(connection.contains("inputMeasurementKeys={FILTER ActiveMeasurements"));

    subscriber.disconnect();
}

#[test]
fn test_unsubscribe_clears_subscribed() {
    let (subscriber, _publisher, mut session) = connect_pair();
    subscribe_and_ack(&subscriber, &mut session, SubscriptionInfo::default());

    subscriber.unsubscribe().unwrap();
    session.expect_command(server_command::UNSUBSCRIBE).unwrap();
    session
        .send_succeeded(server_command::UNSUBSCRIBE, "Unsubscribed")
        .unwrap();

    assert!(wait_for(Duration::from_secs(5), || !subscriber.is_subscribed()));
    subscriber.disconnect();
}

#[test]
fn test_failed_response_reports_error() {
    let (subscriber, _publisher, mut session) = connect_pair();

    let errors = Recorder::new();
    {
        let errors = errors.clone();
        subscriber.register_error_message_callback(move |message| errors.push(message));
    }

    session
        .send_failed(server_command::SUBSCRIBE, "Access denied")
        .unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        !errors.snapshot().is_empty()
    }));
    assert_eq!(
        errors.snapshot()[0],
        "Received failure code from server command 0x08: Access denied"
    );

    subscriber.disconnect();
}

#[test]
fn test_base_time_offsets_update() {
    let (subscriber, _publisher, mut session) = connect_pair();

    session.send_base_times(1, [1000, 2000]).unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        subscriber.time_index() == 1
    }));
    assert_eq!(subscriber.base_time_offsets(), [1000, 2000]);

    subscriber.disconnect();
}

#[test]
fn test_signal_index_cache_replaced_wholesale() {
    let (subscriber, _publisher, mut session) = connect_pair();

    let first = vec![MockSignal::new(1, "PPA", 1), MockSignal::new(2, "PPA", 2)];
    session.send_signal_index_cache(&first, true).unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        subscriber.signal_index_cache().len() == 2
    }));

    let second = vec![MockSignal::new(5, "PPB", 10)];
    session.send_signal_index_cache(&second, true).unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        subscriber.signal_index_cache().len() == 1
    }));

    let cache = subscriber.signal_index_cache();
    assert!(!cache.contains(1));
    assert!(!cache.contains(2));
    let key = cache.measurement_key(5).unwrap();
    assert_eq!(key.source, "PPB");
    assert_eq!(key.id, 10);

    subscriber.disconnect();
}

#[test]
fn test_compact_data_packet_delivers_measurements() {
    let (subscriber, _publisher, mut session) = connect_pair();

    let measurements = Recorder::new();
    {
        let measurements = measurements.clone();
        subscriber.register_new_measurements_callback(move |batch| {
            for m in batch {
                measurements.push(format!("{}:{}={}@{}", m.source, m.id, m.value, m.timestamp));
            }
        });
    }

    subscribe_and_ack(&subscriber, &mut session, SubscriptionInfo::default());

    let signals = vec![MockSignal::new(7, "PPA", 42)];
    session.send_signal_index_cache(&signals, true).unwrap();

    // Unknown index 99 must be dropped without an error
    session
        .send_compact_data_packet(&[(7, 630_000_000_000, 59.98), (99, 630_000_000_000, 1.0)])
        .unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        !measurements.snapshot().is_empty()
    }));
    assert_eq!(measurements.snapshot(), vec!["PPA:42=59.98@630000000000"]);
    assert!(subscriber.total_measurements_received() >= 2);

    subscriber.disconnect();
}

#[test]
fn test_tssc_data_packet_delivers_measurement() {
    let (subscriber, _publisher, mut session) = connect_pair();

    let recorder = Recorder::new();
    {
        let recorder = recorder.clone();
        subscriber.register_new_measurements_callback(move |batch| {
            for m in batch {
                recorder.push(format!(
                    "{}:{}:{}:{}:{}",
                    m.source, m.id, m.timestamp, m.flags, m.value
                ));
            }
        });
    }

    subscribe_and_ack(&subscriber, &mut session, SubscriptionInfo::default());

    let signals = vec![MockSignal::new(7, "PPA", 42)];
    session.send_signal_index_cache(&signals, true).unwrap();

    session
        .send_tssc_data_packet(&[(7, 630_000_001_234, 4, 1.5)])
        .unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        !recorder.snapshot().is_empty()
    }));
    assert_eq!(recorder.snapshot(), vec!["PPA:42:630000001234:4:1.5"]);

    subscriber.disconnect();
}

#[test]
fn test_tssc_version_mismatch_reports_protocol_error() {
    let (subscriber, _publisher, mut session) = connect_pair();

    let errors = Recorder::new();
    {
        let errors = errors.clone();
        subscriber.register_error_message_callback(move |message| errors.push(message));
    }

    subscribe_and_ack(&subscriber, &mut session, SubscriptionInfo::default());
    session.send_bad_tssc_version_packet().unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        errors.count_matching("TSSC version not recognized: 0x54") == 1
    }));

    subscriber.disconnect();
}

#[test]
fn test_tssc_sequence_gap_drops_until_reset() {
    let (subscriber, _publisher, mut session) = connect_pair();

    let errors = Recorder::new();
    let status = Recorder::new();
    let values = Recorder::new();
    {
        let errors = errors.clone();
        subscriber.register_error_message_callback(move |message| errors.push(message));
    }
    {
        let status = status.clone();
        subscriber.register_status_message_callback(move |message| status.push(message));
    }
    {
        let values = values.clone();
        subscriber.register_new_measurements_callback(move |batch| {
            for m in batch {
                values.push(format!("{}", m.value));
            }
        });
    }

    subscribe_and_ack(&subscriber, &mut session, SubscriptionInfo::default());
    session
        .send_signal_index_cache(&[MockSignal::new(1, "PPA", 1)], true)
        .unwrap();

    // Sequences 0 and 1 decode normally; the reset request from subscribe
    // stays pending until a mid-stream reset is observed
    session.send_tssc_data_packet(&[(1, 100, 0, 1.0)]).unwrap();
    session.send_tssc_data_packet(&[(1, 200, 0, 2.0)]).unwrap();

    // Mid-stream reset clears the pending reset request silently
    session.reset_tssc();
    session.send_tssc_data_packet(&[(1, 300, 0, 3.0)]).unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        values.snapshot() == vec!["1", "2", "3"]
    }));
    assert_eq!(status.count_matching("TSSC algorithm reset"), 0);

    // A gap now emits exactly one error and the packet is dropped
    session
        .send_tssc_data_packet_with_sequence(9, &[(1, 400, 0, 4.0)])
        .unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        errors.count_matching("TSSC is out of sequence") == 1
    }));
    assert_eq!(
        errors.count_matching("TSSC is out of sequence. Expecting: 1, Received: 9"),
        1
    );
    assert_eq!(values.snapshot(), vec!["1", "2", "3"]);

    // An unsolicited reset recovers the stream and reports a status message
    session.reset_tssc();
    session.send_tssc_data_packet(&[(1, 500, 0, 5.0)]).unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        values.snapshot() == vec!["1", "2", "3", "5"]
    }));
    assert_eq!(
        status.count_matching("TSSC algorithm reset before sequence number: 1"),
        1
    );

    subscriber.disconnect();
}

#[test]
fn test_udp_data_channel_delivers_measurements() {
    let (subscriber, _publisher, mut session) = connect_pair();

    let values = Recorder::new();
    {
        let values = values.clone();
        subscriber.register_new_measurements_callback(move |batch| {
            for m in batch {
                values.push(format!("{}", m.value));
            }
        });
    }

    // Grab an ephemeral local port for the data channel
    let data_port = {
        let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };

    let info = SubscriptionInfo {
        udp_data_channel: true,
        data_channel_local_port: data_port,
        ..Default::default()
    };
    subscribe_and_ack(&subscriber, &mut session, info);

    session
        .send_signal_index_cache(&[MockSignal::new(3, "PPA", 9)], true)
        .unwrap();
    assert!(wait_for(Duration::from_secs(5), || {
        subscriber.signal_index_cache().len() == 1
    }));

    session
        .send_udp_compact_data_packet(data_port, &[(3, 1000, 42.5)])
        .unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        values.snapshot() == vec!["42.5"]
    }));
    assert!(subscriber.total_data_channel_bytes_received() > 0);

    subscriber.disconnect();
}

#[test]
fn test_metadata_forwarded_unparsed() {
    let (subscriber, _publisher, mut session) = connect_pair();

    let metadata = Arc::new(Mutex::new(Vec::new()));
    {
        let metadata = Arc::clone(&metadata);
        subscriber.register_metadata_callback(move |payload| {
            metadata.lock().extend_from_slice(payload);
        });
    }

    session
        .send_response(
            gep_subscriber::transport::constants::server_response::SUCCEEDED,
            server_command::METADATA_REFRESH,
            b"<DataSet><Table/></DataSet>",
        )
        .unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        metadata.lock().as_slice() == b"<DataSet><Table/></DataSet>"
    }));

    subscriber.disconnect();
}

#[test]
fn test_callbacks_delivered_in_frame_order() {
    let (subscriber, _publisher, mut session) = connect_pair();

    let events = Recorder::new();
    {
        let events = events.clone();
        subscriber.register_status_message_callback(move |_| events.push("status"));
    }
    {
        let events = events.clone();
        subscriber.register_data_start_time_callback(move |_| events.push("start-time"));
    }
    {
        let events = events.clone();
        subscriber.register_processing_complete_callback(move |_| events.push("complete"));
    }
    {
        let events = events.clone();
        subscriber.register_configuration_changed_callback(move || events.push("config"));
    }

    session
        .send_succeeded(server_command::AUTHENTICATE, "Authenticated")
        .unwrap();
    session.send_data_start_time(630_000_000_000).unwrap();
    session.send_no_op().unwrap();
    session.send_configuration_changed().unwrap();
    session.send_processing_complete("Processing complete").unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        events.snapshot().len() == 4
    }));
    assert_eq!(
        events.snapshot(),
        vec!["status", "start-time", "config", "complete"]
    );

    subscriber.disconnect();
}

#[test]
fn test_unknown_response_code_reports_error() {
    let (subscriber, _publisher, mut session) = connect_pair();

    let errors = Recorder::new();
    {
        let errors = errors.clone();
        subscriber.register_error_message_callback(move |message| errors.push(message));
    }

    session.send_response(0x7C, 0x00, &[]).unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        errors.count_matching("Encountered unexpected server response code: 0x7c") == 1
    }));

    subscriber.disconnect();
}

#[test]
fn test_peer_close_fires_terminated_then_auto_reconnect() {
    let (subscriber, _publisher, session) = connect_pair();

    let events = Recorder::new();
    {
        let events = events.clone();
        subscriber.register_connection_terminated_callback(move || events.push("terminated"));
    }
    {
        let events = events.clone();
        subscriber.register_auto_reconnect_callback(move || events.push("auto-reconnect"));
    }

    session.close();

    assert!(wait_for(Duration::from_secs(5), || {
        events.snapshot().len() == 2
    }));
    assert_eq!(events.snapshot(), vec!["terminated", "auto-reconnect"]);
    assert!(!subscriber.is_connected());

    // The auto-disconnect already completed; an explicit disconnect is a no-op
    subscriber.disconnect();
    assert_eq!(events.snapshot().len(), 2);
}

#[test]
fn test_lifecycle_idempotence_and_reconnect() {
    let (subscriber, publisher, _session) = connect_pair();

    assert!(matches!(
        subscriber.connect("127.0.0.1", publisher.port()),
        Err(gep_subscriber::SubscriberError::AlreadyConnected)
    ));

    subscriber.disconnect();
    assert!(!subscriber.is_connected());

    // Second disconnect is a no-op
    subscriber.disconnect();

    // Reconnect to a fresh publisher succeeds
    let second = MockPublisher::bind().unwrap();
    subscriber.connect("127.0.0.1", second.port()).unwrap();
    let mut session = second.accept().unwrap();
    session
        .expect_command(server_command::DEFINE_OPERATIONAL_MODES)
        .unwrap();
    assert!(subscriber.is_connected());

    subscriber.disconnect();
    assert!(!subscriber.is_connected());
}

#[test]
fn test_send_on_disconnected_subscriber_is_error() {
    let subscriber = DataSubscriber::new();
    assert!(subscriber
        .send_server_command(server_command::METADATA_REFRESH, &[])
        .is_err());
}

#[test]
fn test_connector_bounded_retries_against_unreachable_host() {
    // Bind then drop a listener so the port actively refuses connections
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let subscriber = DataSubscriber::new();
    let connector = subscriber.connector();
    connector.set_hostname("127.0.0.1");
    connector.set_port(port);
    connector.set_max_retries(3);
    connector.set_retry_interval(10);

    let errors = Recorder::new();
    {
        let errors = errors.clone();
        connector.register_error_message_callback(move |message| errors.push(message));
    }

    let connected = SubscriberConnector::connect_subscriber(&subscriber);
    assert!(!connected);

    // Failure reports run on their own threads; give them a moment
    assert!(wait_for(Duration::from_secs(5), || {
        errors.count_matching("Failed to connect to") == 3
    }));
    assert_eq!(errors.snapshot().len(), 3);
}

#[test]
fn test_connector_cancel_interrupts_retry_sleep() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let subscriber = DataSubscriber::new();
    let connector = subscriber.connector();
    connector.set_hostname("127.0.0.1");
    connector.set_port(port);
    connector.set_max_retries(-1);
    connector.set_retry_interval(60_000);

    let worker = {
        let subscriber = subscriber.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let connected = SubscriberConnector::connect_subscriber(&subscriber);
            (connected, start.elapsed())
        })
    };

    // Let the first attempt fail and enter its sleep, then cancel
    thread::sleep(Duration::from_millis(200));
    subscriber.connector().cancel();

    let (connected, elapsed) = worker.join().unwrap();
    assert!(!connected);
    assert!(
        elapsed < Duration::from_secs(10),
        "cancel should interrupt the retry sleep, took {:?}",
        elapsed
    );
}

#[test]
fn test_measurement_serializes_to_json() {
    let measurement = gep_subscriber::Measurement {
        signal_id: uuid::Uuid::nil(),
        source: "PPA".to_string(),
        id: 42,
        timestamp: 630_000_000_000,
        flags: 0,
        value: 59.95,
    };

    let json = serde_json::to_string(&measurement).unwrap();
    assert!(json.contains("\"source\":\"PPA\""));
    assert!(json.contains("\"id\":42"));
}
