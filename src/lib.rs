//! Maison Link library.
//!
//! Connects to the home sensor broker and the fall-detection server, and
//! folds everything they report into one watchable session state.

pub mod config;
pub mod error;
pub mod input;
pub mod session;
pub mod state;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{HubError, Result};
pub use session::Session;
