//! Two-phase real-time protocol: batch creation, then status subscription.

mod config;
mod error;
mod hub;
mod messages;
mod session;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use hub::UpdateHub;
pub use messages::{ClientMessage, ServerMessage, SliceAckItem, SliceItem, SliceItemStatus};
pub use session::{ConnectionPhase, GatewayContext, GatewaySession};
