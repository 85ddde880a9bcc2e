//! Shared test utilities for Commune workspace
//!
//! This crate provides mock implementations of the Commune backend for
//! testing without network dependencies. These mocks are used by the
//! gateway and realtime test suites.
//!
//! # Mock Services
//!
//! - [`InMemoryGateway`] - In-memory `MessageGateway` for paused-clock engine tests
//! - [`MockCommuneServer`] - Mock REST backend for HTTP gateway tests
//!
//! # Example
//!
//! ```rust,ignore
//! use commune_test_utils::{InMemoryGateway, MockCommuneServer};
//!
//! #[tokio::test]
//! async fn test_with_mocks() {
//!     let server = MockCommuneServer::start().await;
//!     server.serve_messages(42).await;
//!
//!     // Use server.api_url() to configure your gateway
//! }
//! ```

mod backend;
mod gateway;

pub use backend::MockCommuneServer;
pub use gateway::InMemoryGateway;
