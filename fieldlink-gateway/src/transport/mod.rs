// Fieldlink Gateway - Uplink ingestion pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Uplink transports
//!
//! A [`TransportSource`] yields raw frames until it is closed. Two
//! implementations are provided: [`MqttSource`] subscribes to per-device
//! broker topics, [`HttpSource`] accepts POSTed envelopes.

mod http;
mod mqtt;

pub use http::{ingress_router, HttpSource};
pub use mqtt::MqttSource;
pub(crate) use mqtt::wait_for_connack;

use async_trait::async_trait;
use fieldlink::RawUplinkFrame;
use tokio::sync::mpsc;

use crate::error::{GatewayError, Result};
use crate::subscription::SubscriptionChange;

/// Source of raw uplink frames
#[async_trait]
pub trait TransportSource: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Wait for the next frame
    ///
    /// After [`close`](TransportSource::close), frames already queued are
    /// still returned; `None` means the source is closed and empty.
    async fn next_frame(&mut self) -> Option<RawUplinkFrame>;

    /// Handle for delivering subscription changes from elsewhere
    fn notifier(&self) -> SubscriptionNotifier;

    /// Request subscribe/unsubscribe for the given devices
    fn notify_subscription_change(&self, changes: SubscriptionChange) -> Result<()> {
        self.notifier().notify(changes)
    }

    /// Stop intake and release the underlying connection
    async fn close(&mut self) -> Result<()>;
}

/// Cloneable sender of subscription changes
///
/// Changes are queued and applied in order by the transport's own task.
#[derive(Debug, Clone)]
pub struct SubscriptionNotifier {
    tx: Option<mpsc::UnboundedSender<SubscriptionChange>>,
}

impl SubscriptionNotifier {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SubscriptionChange>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Notifier of a transport without subscriptions; accepts and ignores
    pub fn noop() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self, changes: SubscriptionChange) -> Result<()> {
        match &self.tx {
            Some(tx) => tx.send(changes).map_err(|_| GatewayError::Closed),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldlink::DeviceEui;

    #[test]
    fn test_noop_notifier() {
        let mut changes = SubscriptionChange::new();
        changes.insert(DeviceEui::default(), true);
        assert!(SubscriptionNotifier::noop().notify(changes).is_ok());
    }

    #[tokio::test]
    async fn test_notifier_delivers_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = SubscriptionNotifier::new(tx);
        let device: DeviceEui = "0102030405060708".parse().unwrap();

        notifier.notify([(device, true)].into()).unwrap();
        notifier.clone().notify([(device, false)].into()).unwrap();

        assert_eq!(rx.recv().await.unwrap().get(&device), Some(&true));
        assert_eq!(rx.recv().await.unwrap().get(&device), Some(&false));

        drop(rx);
        assert!(matches!(
            notifier.notify(SubscriptionChange::new()),
            Err(GatewayError::Closed)
        ));
    }
}
