//! Input sources feeding the session state.
//!
//! - `mqtt`: sensor broker connection, topic routing and device commands
//! - `alert`: fall alerts pushed or polled from the detection server
//! - `detection`: one-shot image classification requests

pub mod alert;
pub mod detection;
pub mod mqtt;
