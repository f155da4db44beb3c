// Fieldlink Gateway - Uplink ingestion pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Metric republishing
//!
//! Decoded scalar values are published one per message to
//! `device/<eui>/<metric>`. Each publish waits for the broker to accept it,
//! but failures are only logged and never retried.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use fieldlink::{DecodedRecord, DeviceEui};
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, QoS, Request};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PublisherConfig;
use crate::error::{GatewayError, Result};
use crate::transport::wait_for_connack;

/// Published value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Temperature,
    Humidity,
    Electricity,
    Smoke,
}

impl Metric {
    /// Last topic segment
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temperature => "temp",
            Metric::Humidity => "hum",
            Metric::Electricity => "ele",
            Metric::Smoke => "smoke",
        }
    }
}

/// Topic a device's metric is published to
pub fn metric_topic(device: &DeviceEui, metric: Metric) -> String {
    format!("device/{}/{}", device, metric.as_str())
}

/// Topic and payload of every metric carried by a record, in publish order
///
/// Location beacons carry no republished metric.
pub fn metric_messages(device: &DeviceEui, record: &DecodedRecord) -> Vec<(String, String)> {
    match record {
        DecodedRecord::LocationBeacon(_) => Vec::new(),
        DecodedRecord::Humidity(samples) => samples
            .iter()
            .flat_map(|s| {
                [
                    (metric_topic(device, Metric::Temperature), s.temperature.to_string()),
                    (metric_topic(device, Metric::Humidity), s.humidity.to_string()),
                    (metric_topic(device, Metric::Electricity), s.electricity.to_string()),
                ]
            })
            .collect(),
        DecodedRecord::Smoke(event) => {
            let topic = metric_topic(device, Metric::Smoke);
            let mut out = Vec::with_capacity(2);
            if event.is_heartbeat {
                out.push((topic.clone(), "heartbeat".to_string()));
            }
            if let Some(alarm) = event.alarm {
                out.push((topic, alarm.label().to_string()));
            }
            out
        }
    }
}

/// Sink for republished metrics
#[async_trait]
pub trait Republish: Send + Sync {
    /// Publish one message and wait until the broker has it
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;
}

/// Publish every metric of `record`, returning `(published, failed)`
pub async fn republish_record<P>(publisher: &P, device: &DeviceEui, record: &DecodedRecord) -> (u64, u64)
where
    P: Republish + ?Sized,
{
    let mut published = 0;
    let mut failed = 0;
    for (topic, payload) in metric_messages(device, record) {
        match publisher.publish(&topic, &payload).await {
            Ok(()) => {
                published += 1;
                info!(topic = %topic, payload = %payload, "metric published");
            }
            Err(e) => {
                failed += 1;
                error!(topic = %topic, payload = %payload, error = %e, "metric publish failed");
            }
        }
    }
    (published, failed)
}

type Waiter = oneshot::Sender<std::result::Result<(), String>>;

/// Publishes in flight, in the order they reach the event loop
#[derive(Default)]
struct Pending {
    /// Handed to the client, not yet written
    queued: VecDeque<Waiter>,
    /// Written, waiting for PUBACK or PUBCOMP
    awaiting: HashMap<u16, Waiter>,
}

impl Pending {
    fn fail_all(&mut self, reason: &str) {
        for waiter in self.queued.drain(..).chain(self.awaiting.drain().map(|(_, w)| w)) {
            let _ = waiter.send(Err(reason.to_string()));
        }
    }
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Broker-backed [`Republish`]
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
    ack_timeout: Duration,
    pending: Arc<Mutex<Pending>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttPublisher {
    /// Connect to the publisher broker
    ///
    /// Blocks until connected, like the uplink transport; `shutdown` aborts
    /// the wait with [`GatewayError::Closed`].
    pub async fn connect(config: &PublisherConfig, shutdown: &CancellationToken) -> Result<Self> {
        let mqtt = config
            .mqtt
            .as_ref()
            .ok_or_else(|| GatewayError::InvalidConfig("publisher has no broker configured".into()))?;
        let client_id = format!("{}-publisher", mqtt.client_id);
        let options = mqtt.mqtt_options(&client_id)?;
        let qos = mqtt.qos()?;
        let (client, mut eventloop) = AsyncClient::new(options, 64);

        info!(host = %mqtt.host, port = mqtt.port, "connecting publisher to mqtt broker");
        wait_for_connack(&mut eventloop, mqtt.reconnect_delay(), shutdown).await?;
        info!("publisher connected");

        let pending = Arc::new(Mutex::new(Pending::default()));
        let cancel = CancellationToken::new();
        let acks = AckTracker {
            client: client.clone(),
            eventloop,
            qos,
            pending: Arc::clone(&pending),
            reconnect_delay: mqtt.reconnect_delay(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(acks.run());

        Ok(Self {
            client,
            qos,
            ack_timeout: config.ack_timeout(),
            pending,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Fail outstanding publishes and disconnect
    pub async fn close(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(task) = task else {
            return;
        };
        self.cancel.cancel();
        if let Err(e) = task.await {
            warn!(error = %e, "publisher task ended abnormally");
        }
    }
}

#[async_trait]
impl Republish for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        {
            // Queue order must match the order requests reach the event loop
            let mut pending = lock(&self.pending);
            self.client
                .try_publish(topic, self.qos, false, payload.as_bytes().to_vec())?;
            pending.queued.push_back(tx);
        }

        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(GatewayError::Publish {
                topic: topic.to_string(),
                reason,
            }),
            Ok(Err(_)) => Err(GatewayError::Closed),
            Err(_) => Err(GatewayError::Publish {
                topic: topic.to_string(),
                reason: format!("no acknowledgment within {:?}", self.ack_timeout),
            }),
        }
    }
}

struct AckTracker {
    client: AsyncClient,
    eventloop: EventLoop,
    qos: QoS,
    pending: Arc<Mutex<Pending>>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
}

impl AckTracker {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.eventloop.poll() => event,
            };
            match event {
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => self.written(pkid),
                Ok(Event::Incoming(Packet::PubAck(ack))) => self.acked(ack.pkid),
                Ok(Event::Incoming(Packet::PubComp(comp))) => self.acked(comp.pkid),
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("publisher reconnected"),
                Ok(_) => {}
                Err(e) => {
                    error!(
                        error = %e,
                        retry_ms = self.reconnect_delay.as_millis() as u64,
                        "publisher connection error, will retry"
                    );
                    self.drop_unsent(&e.to_string());
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }
        self.shutdown().await;
    }

    fn written(&mut self, pkid: u16) {
        let mut pending = lock(&self.pending);
        let Some(waiter) = pending.queued.pop_front() else {
            debug!(pkid, "publish written with no waiter");
            return;
        };
        if self.qos == QoS::AtMostOnce {
            let _ = waiter.send(Ok(()));
        } else {
            pending.awaiting.insert(pkid, waiter);
        }
    }

    fn acked(&mut self, pkid: u16) {
        if let Some(waiter) = lock(&self.pending).awaiting.remove(&pkid) {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Fail every outstanding publish and discard them from the replay queue
    fn drop_unsent(&mut self, reason: &str) {
        let mut pending = lock(&self.pending);
        // Pull anything still in the request channel while callers are locked out
        self.eventloop.clean();
        self.eventloop
            .pending
            .retain(|request| !matches!(request, Request::Publish(_)));
        pending.fail_all(reason);
    }

    async fn shutdown(mut self) {
        lock(&self.pending).fail_all("publisher closed");
        if let Err(e) = self.client.try_disconnect() {
            warn!(error = %e, "publisher disconnect failed");
        }
        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(Duration::from_secs(2), flush).await.is_err() {
            warn!("timed out flushing publisher disconnect");
        }
        info!("publisher closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldlink::{HumiditySample, SmokeAlarm, SmokeEvent};
    use tokio::sync::Mutex as AsyncMutex;

    fn device() -> DeviceEui {
        "0004a30b001c0530".parse().unwrap()
    }

    #[test]
    fn test_metric_topics() {
        assert_eq!(
            metric_topic(&device(), Metric::Temperature),
            "device/0004a30b001c0530/temp"
        );
        assert_eq!(metric_topic(&device(), Metric::Smoke), "device/0004a30b001c0530/smoke");
    }

    #[test]
    fn test_humidity_messages() {
        let sample = |temperature| HumiditySample {
            temperature,
            humidity: 41.0,
            electricity: 90.0,
            timestamp: chrono::Utc::now(),
            alarm: None,
        };
        let record = DecodedRecord::Humidity(vec![sample(23.5), sample(24.0)]);
        let messages = metric_messages(&device(), &record);
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0], ("device/0004a30b001c0530/temp".into(), "23.5".into()));
        assert_eq!(messages[1], ("device/0004a30b001c0530/hum".into(), "41".into()));
        assert_eq!(messages[2], ("device/0004a30b001c0530/ele".into(), "90".into()));
        assert_eq!(messages[3].1, "24");
    }

    #[test]
    fn test_smoke_messages() {
        let event = SmokeEvent {
            is_heartbeat: true,
            alarm: Some(SmokeAlarm::from_code(0x0001)),
        };
        let messages = metric_messages(&device(), &DecodedRecord::Smoke(event));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].1, "heartbeat");
        assert_eq!(messages[1].1, SmokeAlarm::from_code(0x0001).label());

        let quiet = SmokeEvent {
            is_heartbeat: false,
            alarm: None,
        };
        assert!(metric_messages(&device(), &DecodedRecord::Smoke(quiet)).is_empty());
    }

    struct Recorder {
        sent: AsyncMutex<Vec<(String, String)>>,
        fail_topic: Option<String>,
    }

    #[async_trait]
    impl Republish for Recorder {
        async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
            if self.fail_topic.as_deref() == Some(topic) {
                return Err(GatewayError::Publish {
                    topic: topic.into(),
                    reason: "rejected".into(),
                });
            }
            self.sent.lock().await.push((topic.into(), payload.into()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_remaining_metrics() {
        let recorder = Recorder {
            sent: AsyncMutex::new(Vec::new()),
            fail_topic: Some(metric_topic(&device(), Metric::Humidity)),
        };
        let record = DecodedRecord::Humidity(vec![HumiditySample {
            temperature: 21.5,
            humidity: 40.0,
            electricity: 88.0,
            timestamp: chrono::Utc::now(),
            alarm: None,
        }]);

        let (ok, failed) = republish_record(&recorder, &device(), &record).await;
        assert_eq!((ok, failed), (2, 1));
        let sent = recorder.sent.lock().await;
        assert_eq!(sent[0], (metric_topic(&device(), Metric::Temperature), "21.5".into()));
        assert_eq!(sent[1], (metric_topic(&device(), Metric::Electricity), "88".into()));
    }

    #[tokio::test]
    async fn test_connect_requires_broker() {
        let result = MqttPublisher::connect(&PublisherConfig::default(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(GatewayError::InvalidConfig(_))));
    }
}
