//! Smart polling engine for Commune chat and conversation updates
//!
//! The backend exposes a plain REST API, so live chat is emulated by
//! polling it. This crate owns that loop:
//! - One repeating task per subscribed conversation, delivering only
//!   messages newer than the conversation's watermark
//! - One slower task for the conversation-list (notification) feed
//! - App lifecycle handling: ticks are suppressed while backgrounded
//! - A synchronously readable connection state for UI indicators
//!
//! # Example
//!
//! ```rust,no_run
//! use commune_gateway_client::HttpMessageGateway;
//! use commune_realtime::{AppState, RealtimeService};
//! use commune_shared_config::{GatewayConfig, PollingConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = HttpMessageGateway::new(&GatewayConfig::from_env()?)?;
//! let realtime = RealtimeService::new(gateway, PollingConfig::default());
//! realtime.initialize();
//!
//! realtime.subscribe_to_conversation(42, |message| {
//!     println!("new message {}", message.id);
//! });
//! realtime.subscribe_to_notifications(|event| {
//!     println!("{} conversations", event.data.len());
//! });
//!
//! realtime.handle_app_state_change(AppState::Background);
//! realtime.handle_app_state_change(AppState::Active);
//!
//! realtime.unsubscribe_from_conversation(42);
//! realtime.disconnect();
//! # Ok(())
//! # }
//! ```

mod error;
mod lifecycle;
mod poller;
mod registry;
mod service;
mod status;

pub use error::{RealtimeError, RealtimeResult};
pub use lifecycle::AppState;
pub use poller::{MessageCallback, NotificationCallback, NotificationEvent, NotificationKind};
pub use registry::{ChannelKey, SubscriptionHandle};
pub use service::RealtimeService;
pub use status::ConnectionState;

pub use commune_gateway_client::{Conversation, ConversationId, Message, MessageId};
