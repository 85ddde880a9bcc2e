//! REST gateway client for Commune conversations and messages
//!
//! This crate provides the read side of the Commune chat API that the
//! realtime polling engine depends on:
//! - Listing a page of a conversation's messages (newest first)
//! - Listing the current user's conversations
//!
//! The [`MessageGateway`] trait is the seam the engine is generic over;
//! [`HttpMessageGateway`] is the reqwest-backed implementation.
//!
//! # Example
//!
//! ```rust,no_run
//! use commune_gateway_client::{HttpMessageGateway, MessageGateway};
//! use commune_shared_config::GatewayConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::with_url("https://commune.example.com/api").with_token("token");
//! let gateway = HttpMessageGateway::new(&config)?;
//!
//! for message in gateway.list_messages(42, 1, 5).await? {
//!     println!("{}: {:?}", message.id, message.field("body"));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Environment Variables
//!
//! - `COMMUNE_API_URL`: backend base URL
//! - `COMMUNE_API_TOKEN`: bearer token (optional)

mod client;
mod error;
mod gateway;
mod models;

pub use client::HttpMessageGateway;
pub use error::{GatewayError, GatewayResult};
pub use gateway::MessageGateway;
pub use models::{Conversation, ConversationId, Message, MessageId};
