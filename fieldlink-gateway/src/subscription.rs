//! Per-device uplink subscriptions
//!
//! The set is owned by a single connection task. It records which devices
//! the broker has accepted a subscription request for, and derives their
//! topics from the configured template.

use std::collections::{BTreeSet, HashMap};

use fieldlink::DeviceEui;

use crate::config::DEVICE_PLACEHOLDER;

/// Add (`true`) or remove (`false`) notifications keyed by device
pub type SubscriptionChange = HashMap<DeviceEui, bool>;

/// Wildcard used for the bulk unsubscribe on close
pub const TOPIC_WILDCARD: &str = "+";

/// Devices currently subscribed on one connection
#[derive(Debug, Clone)]
pub struct SubscriptionSet {
    template: String,
    devices: BTreeSet<DeviceEui>,
}

impl SubscriptionSet {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            devices: BTreeSet::new(),
        }
    }

    /// Uplink topic of one device
    pub fn topic_for(&self, device: &DeviceEui) -> String {
        self.template.replace(DEVICE_PLACEHOLDER, &device.to_string())
    }

    /// Topic matching every device
    pub fn wildcard_topic(&self) -> String {
        self.template.replace(DEVICE_PLACEHOLDER, TOPIC_WILDCARD)
    }

    pub fn contains(&self, device: &DeviceEui) -> bool {
        self.devices.contains(device)
    }

    /// Returns false if the device was already present
    pub fn insert(&mut self, device: DeviceEui) -> bool {
        self.devices.insert(device)
    }

    /// Returns false if the device was absent
    pub fn remove(&mut self, device: &DeviceEui) -> bool {
        self.devices.remove(device)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceEui> {
        self.devices.iter()
    }

    /// Topics of every device in the set, in device order
    pub fn topics(&self) -> Vec<String> {
        self.devices.iter().map(|d| self.topic_for(d)).collect()
    }
}
