//! Network adapters: the Bot API for reviewers and admins, and the session
//! bridge that owns the worker accounts' protocol sessions.

pub mod bot;
pub mod gateway;
pub mod updates;

pub use bot::{BotClient, DeliveryError};
pub use gateway::GatewayConnector;
