//! Device-control commands published to the broker.

use super::client::BrokerSession;
use crate::error::{HubError, Result};
use crate::state::Snapshot;
use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::watch;

/// A single outbound command. Not retained after publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub topic: String,
    pub payload: String,
}

impl CommandRequest {
    /// Build the toggle command for a device currently showing `current_state`.
    ///
    /// The payload is the opposite of what is displayed: `"0"` turns an
    /// active device off, `"1"` turns an inactive one on.
    pub fn toggle(area: &str, room_id: &str, device: &str, current_state: bool) -> Self {
        Self {
            topic: format!("{}/{}/{}/set", area, room_id, device),
            payload: if current_state { "0" } else { "1" }.to_string(),
        }
    }
}

/// Anything that can put a command on the wire.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;
}

#[async_trait]
impl CommandSink for BrokerSession {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        BrokerSession::publish(self, topic, payload).await
    }
}

/// Publishes UI commands, refusing while the session is not online.
pub struct CommandPublisher<S> {
    sink: S,
    state: watch::Receiver<Snapshot>,
    area: String,
}

impl<S: CommandSink> CommandPublisher<S> {
    pub fn new(sink: S, state: watch::Receiver<Snapshot>, area: impl Into<String>) -> Self {
        Self {
            sink,
            state,
            area: area.into(),
        }
    }

    /// Toggle `device` in `room_id` away from `current_state`.
    ///
    /// Returns the command that was published, or `NotConnected` without
    /// publishing anything while connectivity is not `Online`.
    pub async fn send(
        &self,
        room_id: &str,
        device: &str,
        current_state: bool,
    ) -> Result<CommandRequest> {
        let command = CommandRequest::toggle(&self.area, room_id, device, current_state);
        self.publish(command.clone()).await?;
        info!(
            "[MQTT] Toggled {}/{} -> {}",
            room_id, device, command.payload
        );
        Ok(command)
    }

    /// Publish an arbitrary command under the same connectivity guard.
    pub async fn publish(&self, command: CommandRequest) -> Result<()> {
        if !self.state.borrow().is_online() {
            warn!(
                "[MQTT] Rejecting command on {}: not connected",
                command.topic
            );
            return Err(HubError::NotConnected);
        }
        self.sink.publish(&command.topic, &command.payload).await
    }
}
