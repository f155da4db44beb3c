//! MQTT transport and publisher tests against an in-process scripted broker

use std::time::{Duration, Instant};

use bytes::BytesMut;
use fieldlink::DeviceEui;
use fieldlink_gateway::{
    GatewayError, MqttConfig, MqttPublisher, MqttSource, PublisherConfig, Republish,
    SubscriptionSet, TransportSource,
};
use rumqttc::mqttbytes::v4::{
    read, ConnAck, ConnectReturnCode, Packet, PubAck, Publish, SubAck, SubscribeReasonCode,
    UnsubAck,
};
use rumqttc::mqttbytes::Error as PacketError;
use rumqttc::QoS;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const BEACON_FRAME: &str = "aa5cac117c0158a42e06ca2e5c01015bffea01010466";
const MAX_PACKET: usize = 64 * 1024;
const WAIT: Duration = Duration::from_secs(5);

fn eui(s: &str) -> DeviceEui {
    s.parse().unwrap()
}

fn envelope(device: &str, data: &str) -> String {
    format!(r#"{{"deveui":"{}","data":"{}","devname":"test"}}"#, device, data)
}

// ============================================================================
// Scripted broker
// ============================================================================

enum Command {
    Publish { topic: String, payload: String },
    DropConnection,
}

/// Accepts one client connection at a time, answers CONNECT, SUBSCRIBE,
/// UNSUBSCRIBE and PINGREQ, and reports every packet it receives with the
/// number of the connection it arrived on.
struct ScriptedBroker {
    port: u16,
    packets: mpsc::UnboundedReceiver<(usize, Packet)>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ScriptedBroker {
    /// `ack_publishes` controls whether QoS 1 publishes get a PUBACK
    async fn start(ack_publishes: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (packet_tx, packets) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(serve(listener, ack_publishes, packet_tx, command_rx));
        Self {
            port,
            packets,
            commands,
        }
    }

    fn config(&self) -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".into(),
            port: self.port,
            reconnect_delay_ms: 50,
            ..Default::default()
        }
    }

    fn publish(&self, topic: &str, payload: String) {
        self.commands
            .send(Command::Publish {
                topic: topic.to_string(),
                payload,
            })
            .unwrap();
    }

    fn drop_connection(&self) {
        self.commands.send(Command::DropConnection).unwrap();
    }

    /// Skip packets until `select` picks one
    async fn expect<T>(&mut self, mut select: impl FnMut(usize, Packet) -> Option<T>) -> T {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let (connection, packet) = tokio::time::timeout_at(deadline, self.packets.recv())
                .await
                .expect("timed out waiting for a client packet")
                .expect("broker stopped");
            if let Some(found) = select(connection, packet) {
                return found;
            }
        }
    }

    /// Topic filters of the next SUBSCRIBE, with its connection number
    async fn next_subscribe(&mut self) -> (usize, Vec<String>) {
        self.expect(|connection, packet| match packet {
            Packet::Subscribe(subscribe) => Some((
                connection,
                subscribe.filters.into_iter().map(|f| f.path).collect(),
            )),
            _ => None,
        })
        .await
    }

    async fn next_unsubscribe(&mut self) -> Vec<String> {
        self.expect(|_, packet| match packet {
            Packet::Unsubscribe(unsubscribe) => Some(unsubscribe.topics),
            _ => None,
        })
        .await
    }

    async fn next_publish(&mut self) -> Publish {
        self.expect(|_, packet| match packet {
            Packet::Publish(publish) => Some(publish),
            _ => None,
        })
        .await
    }

    async fn next_disconnect(&mut self) {
        self.expect(|_, packet| matches!(packet, Packet::Disconnect).then_some(()))
            .await
    }
}

async fn serve(
    listener: TcpListener,
    ack_publishes: bool,
    packets: mpsc::UnboundedSender<(usize, Packet)>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut connection = 0;
    loop {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        connection += 1;
        let mut buf = BytesMut::new();
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Publish { topic, payload }) => {
                        let mut out = BytesMut::new();
                        Publish::new(topic, QoS::AtMostOnce, payload.into_bytes())
                            .write(&mut out)
                            .unwrap();
                        if stream.write_all(&out).await.is_err() {
                            break;
                        }
                    }
                    Some(Command::DropConnection) => break,
                    None => return,
                },
                packet = read_packet(&mut stream, &mut buf) => {
                    let Some(packet) = packet else { break };
                    let mut out = BytesMut::new();
                    match &packet {
                        Packet::Connect(_) => {
                            ConnAck::new(ConnectReturnCode::Success, false).write(&mut out).unwrap();
                        }
                        Packet::Subscribe(subscribe) => {
                            let codes = subscribe
                                .filters
                                .iter()
                                .map(|f| SubscribeReasonCode::Success(f.qos))
                                .collect();
                            SubAck::new(subscribe.pkid, codes).write(&mut out).unwrap();
                        }
                        Packet::Unsubscribe(unsubscribe) => {
                            UnsubAck::new(unsubscribe.pkid).write(&mut out).unwrap();
                        }
                        Packet::Publish(publish) if ack_publishes && publish.qos == QoS::AtLeastOnce => {
                            PubAck::new(publish.pkid).write(&mut out).unwrap();
                        }
                        Packet::PingReq => out.extend_from_slice(&[0xD0, 0x00]),
                        _ => {}
                    }
                    if !out.is_empty() && stream.write_all(&out).await.is_err() {
                        break;
                    }
                    if packets.send((connection, packet)).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Cancel safe: partial reads stay in `buf`
async fn read_packet(stream: &mut TcpStream, buf: &mut BytesMut) -> Option<Packet> {
    loop {
        match read(buf, MAX_PACKET) {
            Ok(packet) => return Some(packet),
            Err(PacketError::InsufficientBytes(_)) => {}
            Err(e) => panic!("malformed packet from client: {}", e),
        }
        match stream.read_buf(buf).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

// ============================================================================
// Uplink transport
// ============================================================================

#[tokio::test]
async fn test_source_forwards_uplinks_and_unsubscribes_on_close() {
    let mut broker = ScriptedBroker::start(true).await;
    let config = broker.config();
    let topics = SubscriptionSet::new(config.uplink_topic_template.clone());
    let tracker = eui("0004a30b001c0530");

    let mut source = MqttSource::connect(&config, [tracker], &CancellationToken::new())
        .await
        .unwrap();

    let (connection, filters) = broker.next_subscribe().await;
    assert_eq!(connection, 1);
    assert_eq!(filters, vec![topics.topic_for(&tracker)]);

    // A malformed envelope is dropped, the next one still arrives
    broker.publish(&topics.topic_for(&tracker), "not json".to_string());
    broker.publish(
        &topics.topic_for(&tracker),
        envelope("0004A30B001C0530", BEACON_FRAME),
    );
    let frame = tokio::time::timeout(WAIT, source.next_frame())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.device, tracker);
    assert_eq!(frame.payload_hex(), BEACON_FRAME);
    assert!(frame.is_location_beacon());

    source.close().await.unwrap();
    assert_eq!(broker.next_unsubscribe().await, vec![topics.wildcard_topic()]);
    broker.next_disconnect().await;
    assert_eq!(source.next_frame().await, None);
}

#[tokio::test]
async fn test_source_applies_subscription_changes() {
    let mut broker = ScriptedBroker::start(true).await;
    let config = broker.config();
    let topics = SubscriptionSet::new(config.uplink_topic_template.clone());
    let tracker = eui("0004a30b001c0530");
    let logger = eui("0004a30b001c0531");

    let mut source = MqttSource::connect(&config, [tracker], &CancellationToken::new())
        .await
        .unwrap();
    broker.next_subscribe().await;

    source
        .notify_subscription_change([(logger, true)].into())
        .unwrap();
    let (_, filters) = broker.next_subscribe().await;
    assert_eq!(filters, vec![topics.topic_for(&logger)]);

    source
        .notify_subscription_change([(tracker, false)].into())
        .unwrap();
    assert_eq!(broker.next_unsubscribe().await, vec![topics.topic_for(&tracker)]);

    source.close().await.unwrap();
}

#[tokio::test]
async fn test_source_resubscribes_after_reconnect() {
    let mut broker = ScriptedBroker::start(true).await;
    let config = broker.config();
    let topics = SubscriptionSet::new(config.uplink_topic_template.clone());
    let tracker = eui("0004a30b001c0530");
    let logger = eui("0004a30b001c0531");

    let mut source = MqttSource::connect(&config, [tracker], &CancellationToken::new())
        .await
        .unwrap();
    broker.next_subscribe().await;

    // Change the set, then lose the connection
    source
        .notify_subscription_change([(logger, true), (tracker, false)].into())
        .unwrap();
    broker.next_unsubscribe().await;
    broker.drop_connection();

    // The new session subscribes to the current set
    let filters = broker
        .expect(|connection, packet| match packet {
            Packet::Subscribe(subscribe) if connection == 2 => {
                Some(subscribe.filters.into_iter().map(|f| f.path).collect::<Vec<_>>())
            }
            _ => None,
        })
        .await;
    assert_eq!(filters, vec![topics.topic_for(&logger)]);

    broker.publish(
        &topics.topic_for(&logger),
        envelope("0004a30b001c0531", "ff015cc056d01903415a12"),
    );
    let frame = tokio::time::timeout(WAIT, source.next_frame())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.device, logger);

    source.close().await.unwrap();
}

// ============================================================================
// Metric publisher
// ============================================================================

fn publisher_config(broker: &ScriptedBroker, ack_timeout_ms: u64) -> PublisherConfig {
    PublisherConfig {
        mqtt: Some(MqttConfig {
            qos: 1,
            ..broker.config()
        }),
        ack_timeout_ms,
    }
}

#[tokio::test]
async fn test_publish_resolves_on_puback() {
    let mut broker = ScriptedBroker::start(true).await;
    let publisher = MqttPublisher::connect(&publisher_config(&broker, 5000), &CancellationToken::new())
        .await
        .unwrap();

    publisher
        .publish("device/0004a30b001c0531/temp", "23.5")
        .await
        .unwrap();

    let sent = broker.next_publish().await;
    assert_eq!(sent.topic, "device/0004a30b001c0531/temp");
    assert_eq!(&sent.payload[..], b"23.5");
    assert_eq!(sent.qos, QoS::AtLeastOnce);

    publisher.close().await;
    broker.next_disconnect().await;
}

#[tokio::test]
async fn test_publish_fails_when_connection_drops() {
    let mut broker = ScriptedBroker::start(false).await;
    let publisher = MqttPublisher::connect(&publisher_config(&broker, 5000), &CancellationToken::new())
        .await
        .unwrap();

    let started = Instant::now();
    let (result, ()) = tokio::join!(
        publisher.publish("device/0004a30b001c0531/hum", "41"),
        async {
            broker.next_publish().await;
            broker.drop_connection();
        }
    );

    match result {
        Err(GatewayError::Publish { topic, reason }) => {
            assert_eq!(topic, "device/0004a30b001c0531/hum");
            assert!(!reason.contains("no acknowledgment"), "timed out instead: {}", reason);
        }
        other => panic!("expected a publish error, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(5));

    // The failed message is not replayed on the next session
    broker
        .expect(|connection, packet| matches!(packet, Packet::Connect(_) if connection == 2).then_some(()))
        .await;
    while let Ok(Some((_, packet))) =
        tokio::time::timeout(Duration::from_millis(300), broker.packets.recv()).await
    {
        assert!(!matches!(packet, Packet::Publish(_)), "dropped publish was replayed");
    }

    publisher.close().await;
}

#[tokio::test]
async fn test_publish_times_out_without_ack() {
    let mut broker = ScriptedBroker::start(false).await;
    let publisher = MqttPublisher::connect(&publisher_config(&broker, 200), &CancellationToken::new())
        .await
        .unwrap();

    let started = Instant::now();
    let result = publisher.publish("device/0004a30b001c0532/smoke", "heartbeat").await;
    assert!(started.elapsed() >= Duration::from_millis(200));
    match result {
        Err(GatewayError::Publish { reason, .. }) => {
            assert!(reason.contains("no acknowledgment"), "unexpected reason: {}", reason)
        }
        other => panic!("expected a timeout, got {:?}", other),
    }
    broker.next_publish().await;

    publisher.close().await;
}
