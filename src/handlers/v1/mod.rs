//! Versioned API handlers.

mod messages;

pub use messages::{list_messages, send_message};
