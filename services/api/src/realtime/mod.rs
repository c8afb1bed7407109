pub mod hub;
pub mod message_handler;
pub mod session;

#[cfg(test)]
mod hub_tests;

pub use hub::{Hub, HubConfig, HubHandle};
pub use message_handler::MessageHandler;
pub use session::{run_session, SessionConfig};
