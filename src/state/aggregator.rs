//! Single-writer state aggregation.
//!
//! The aggregator owns the only mutable copy of the session state. Producers
//! never touch it directly; they send [`StateUpdate`]s down a bounded channel
//! and [`StateAggregator::run`] applies them one at a time. Each update is
//! applied inside one `send_if_modified` call, so a reader borrowing the
//! snapshot never observes half of an update.

use super::{AlertEvent, ConnectivityState, RawAlert, Reading, ReadingUpdate};
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// One change to the session state.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    Reading(ReadingUpdate),
    Connectivity(ConnectivityState),
    DeviceStatus {
        room: String,
        device: String,
        on: bool,
    },
    GasAlert(RawAlert),
    /// A fall alert that already passed de-duplication.
    Alert(AlertEvent),
    /// Clear the current fall alert. The de-duplication watermark is untouched.
    AcknowledgeAlert,
    AcknowledgeGasAlert,
}

/// Immutable view of the session state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub reading: Reading,
    pub connectivity: ConnectivityState,
    pub alert: Option<AlertEvent>,
    pub gas_alert: Option<RawAlert>,
    /// Last reported on/off state per room and device.
    pub devices: BTreeMap<String, BTreeMap<String, bool>>,
}

impl Snapshot {
    /// Whether device commands can currently be published.
    pub fn is_online(&self) -> bool {
        self.connectivity == ConnectivityState::Online
    }

    /// Last reported state of a device, if any status was seen.
    pub fn device_state(&self, room: &str, device: &str) -> Option<bool> {
        self.devices.get(room)?.get(device).copied()
    }

    /// Apply an update, returning whether anything changed.
    pub fn apply(&mut self, update: StateUpdate) -> bool {
        match update {
            StateUpdate::Reading(update) => {
                self.reading.apply(&update);
                true
            }
            StateUpdate::Connectivity(state) => {
                let changed = self.connectivity != state;
                self.connectivity = state;
                changed
            }
            StateUpdate::DeviceStatus { room, device, on } => {
                let previous = self.devices.entry(room).or_default().insert(device, on);
                previous != Some(on)
            }
            StateUpdate::GasAlert(alert) => {
                self.gas_alert = Some(alert);
                true
            }
            StateUpdate::Alert(event) => {
                self.alert = Some(event);
                true
            }
            StateUpdate::AcknowledgeAlert => self.alert.take().is_some(),
            StateUpdate::AcknowledgeGasAlert => self.gas_alert.take().is_some(),
        }
    }
}

/// Owner of the session snapshot.
pub struct StateAggregator {
    snapshot: watch::Sender<Snapshot>,
}

impl Default for StateAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StateAggregator {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Snapshot::default());
        Self { snapshot }
    }

    /// Get a receiver that observes every applied change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    /// Clone the current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    fn apply(&self, update: StateUpdate) {
        debug!("[State] applying {:?}", update);
        self.snapshot.send_if_modified(|snapshot| snapshot.apply(update));
    }

    /// Consume updates until the channel closes or `cancel` fires.
    ///
    /// On exit the connectivity is forced to `Offline`; that is the last
    /// mutation this aggregator ever makes.
    pub async fn run(self, mut updates: mpsc::Receiver<StateUpdate>, cancel: CancellationToken) {
        info!("[State] aggregator started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                update = updates.recv() => match update {
                    Some(update) => self.apply(update),
                    None => break,
                },
            }
        }

        self.apply(StateUpdate::Connectivity(ConnectivityState::Offline));
        info!("[State] aggregator stopped");
    }
}
