// Fieldlink Gateway - Uplink ingestion pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Message-bus transport
//!
//! One spawned task owns the broker connection and the [`SubscriptionSet`].
//! Incoming publishes, subscription changes and shutdown all go through
//! that task, so the set has a single writer.

use std::time::Duration;

use async_trait::async_trait;
use fieldlink::{DeviceEui, RawUplinkFrame};
use rumqttc::{
    AsyncClient, Event, EventLoop, Outgoing, Packet, Publish, QoS, SubscribeFilter,
    SubscribeReasonCode,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{SubscriptionNotifier, TransportSource};
use crate::config::MqttConfig;
use crate::envelope;
use crate::error::{GatewayError, Result};
use crate::subscription::{SubscriptionChange, SubscriptionSet};

/// Requests the client may queue before `try_*` calls fail
const REQUEST_CAPACITY: usize = 64;

/// Upper bound on flushing the unsubscribe and disconnect at close
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Uplink frames from per-device broker topics
pub struct MqttSource {
    frames: mpsc::Receiver<RawUplinkFrame>,
    notices: mpsc::UnboundedSender<SubscriptionChange>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MqttSource {
    /// Connect and subscribe to every device in `devices`
    ///
    /// Retries forever with the configured delay until the broker accepts
    /// the connection. Only `shutdown` interrupts the retry loop, returning
    /// [`GatewayError::Closed`].
    pub async fn connect(
        config: &MqttConfig,
        devices: impl IntoIterator<Item = DeviceEui>,
        shutdown: &CancellationToken,
    ) -> Result<Self> {
        let options = config.mqtt_options(&config.client_id)?;
        let qos = config.qos()?;
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        info!(host = %config.host, port = config.port, "connecting to mqtt broker");
        wait_for_connack(&mut eventloop, config.reconnect_delay(), shutdown).await?;
        info!("connected to mqtt broker");

        let mut subscriptions = SubscriptionSet::new(config.uplink_topic_template.clone());
        for device in devices {
            subscriptions.insert(device);
        }

        let (frame_tx, frame_rx) = mpsc::channel(config.channel_capacity);
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let connection = Connection {
            client,
            eventloop,
            subscriptions,
            qos,
            reconnect_delay: config.reconnect_delay(),
            frames: frame_tx,
            notices: notice_rx,
            cancel: cancel.clone(),
        };
        connection.subscribe_all();
        let task = tokio::spawn(connection.run());

        Ok(Self {
            frames: frame_rx,
            notices: notice_tx,
            cancel,
            task: Some(task),
        })
    }
}

#[async_trait]
impl TransportSource for MqttSource {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn next_frame(&mut self) -> Option<RawUplinkFrame> {
        self.frames.recv().await
    }

    fn notifier(&self) -> SubscriptionNotifier {
        SubscriptionNotifier::new(self.notices.clone())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        info!("closing mqtt transport");
        self.cancel.cancel();
        if let Err(e) = task.await {
            warn!(error = %e, "mqtt connection task ended abnormally");
        }
        Ok(())
    }
}

pub(crate) async fn wait_for_connack(
    eventloop: &mut EventLoop,
    delay: Duration,
    shutdown: &CancellationToken,
) -> Result<()> {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return Err(GatewayError::Closed),
            event = eventloop.poll() => event,
        };
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => {
                error!(
                    error = %e,
                    retry_ms = delay.as_millis() as u64,
                    "connecting to mqtt broker failed, will retry"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return Err(GatewayError::Closed),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

struct Connection {
    client: AsyncClient,
    eventloop: EventLoop,
    subscriptions: SubscriptionSet,
    qos: QoS,
    reconnect_delay: Duration,
    frames: mpsc::Sender<RawUplinkFrame>,
    notices: mpsc::UnboundedReceiver<SubscriptionChange>,
    cancel: CancellationToken,
}

impl Connection {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(changes) = self.notices.recv() => self.apply(changes),
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("reconnected to mqtt broker");
                        self.subscribe_all();
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if !self.forward(publish).await {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        let failed = ack
                            .return_codes
                            .iter()
                            .filter(|c| matches!(c, SubscribeReasonCode::Failure))
                            .count();
                        if failed > 0 {
                            warn!(pkid = ack.pkid, failed, "broker rejected uplink subscriptions");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(
                            error = %e,
                            retry_ms = self.reconnect_delay.as_millis() as u64,
                            "mqtt connection error, will retry"
                        );
                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            _ = tokio::time::sleep(self.reconnect_delay) => {}
                        }
                    }
                },
            }
        }
        self.shutdown().await;
    }

    /// Queue a subscribe for every device in the set
    fn subscribe_all(&self) {
        if self.subscriptions.is_empty() {
            return;
        }
        let topics = self.subscriptions.topics();
        info!(topics = ?topics, qos = ?self.qos, "subscribing to uplink topics");
        let filters = topics
            .into_iter()
            .map(|topic| SubscribeFilter::new(topic, self.qos));
        if let Err(e) = self.client.try_subscribe_many(filters) {
            error!(error = %e, "subscribe to uplink topics failed");
        }
    }

    /// The set changes only for requests the client accepted
    fn apply(&mut self, changes: SubscriptionChange) {
        for (device, subscribe) in changes {
            let topic = self.subscriptions.topic_for(&device);
            if subscribe {
                info!(topic = %topic, qos = ?self.qos, "subscribing to uplink topic");
                match self.client.try_subscribe(topic.clone(), self.qos) {
                    Ok(()) => {
                        self.subscriptions.insert(device);
                    }
                    Err(e) => error!(topic = %topic, error = %e, "subscribe failed"),
                }
            } else {
                info!(topic = %topic, "unsubscribing from uplink topic");
                match self.client.try_unsubscribe(topic.clone()) {
                    Ok(()) => {
                        self.subscriptions.remove(&device);
                    }
                    Err(e) => error!(topic = %topic, error = %e, "unsubscribe failed"),
                }
            }
        }
    }

    /// Returns false once nobody is reading frames or the source is closing
    async fn forward(&mut self, publish: Publish) -> bool {
        let frame = match envelope::parse_uplink(&publish.payload) {
            Ok(frame) => frame,
            Err(e) => {
                error!(topic = %publish.topic, error = %e, "dropping malformed uplink");
                return true;
            }
        };
        info!(device = %frame.device, data = %frame.payload_hex(), "uplink frame received");

        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.frames.send(frame) => sent.is_ok(),
        }
    }

    async fn shutdown(mut self) {
        let topic = self.subscriptions.wildcard_topic();
        info!(topic = %topic, "unsubscribing from uplink topics");
        if let Err(e) = self.client.try_unsubscribe(topic.clone()) {
            warn!(topic = %topic, error = %e, "bulk unsubscribe failed");
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!(error = %e, "mqtt disconnect failed");
        }

        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "mqtt event loop ended");
                        break;
                    }
                }
            }
        };
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, flush).await.is_err() {
            warn!("timed out flushing mqtt disconnect");
        }
        info!("mqtt transport closed");
    }
}
