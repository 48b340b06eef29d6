//! MQTT input for the home sensor broker.
//!
//! The broker session keeps the connection alive and hands every message to
//! the topic router; the command publisher sends device toggles back out.

mod client;
mod command;
mod router;

pub use client::{BrokerEventLoop, BrokerSession};
pub use command::{CommandPublisher, CommandRequest, CommandSink};
pub use router::{Routed, TopicRouter};
