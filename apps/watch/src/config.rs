//! Watch configuration loaded from environment variables and arguments
//!
//! Conversation ids given on the command line take precedence over
//! `WATCH_CONVERSATIONS`. Everything else comes from the shared config.

use anyhow::{Context, Result};
use commune_gateway_client::ConversationId;
use commune_shared_config::{get_env_or_default, CommonConfig, Environment};

/// Watch configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Common configuration shared with other services
    pub common: CommonConfig,

    /// Conversations to subscribe to at startup
    pub conversations: Vec<ConversationId>,

    /// Whether to follow the conversation-list feed
    pub watch_notifications: bool,
}

impl Config {
    /// Load configuration from the environment and command-line arguments
    pub fn from_env<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let common = CommonConfig::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

        let args: Vec<String> = args.into_iter().collect();
        let conversations = if args.is_empty() {
            parse_conversation_ids(&get_env_or_default("WATCH_CONVERSATIONS", ""))
                .context("Invalid WATCH_CONVERSATIONS value")?
        } else {
            parse_conversation_ids(&args.join(","))
                .context("Invalid conversation id argument")?
        };

        Ok(Self {
            common,
            conversations,
            watch_notifications: get_env_or_default("WATCH_NOTIFICATIONS", "true")
                .parse()
                .context("Invalid WATCH_NOTIFICATIONS value")?,
        })
    }

    /// Get environment mode
    pub fn environment(&self) -> Environment {
        self.common.environment
    }
}

/// Parse a comma or whitespace separated list of conversation ids
fn parse_conversation_ids(raw: &str) -> Result<Vec<ConversationId>> {
    let mut ids: Vec<ConversationId> = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse()
                .with_context(|| format!("'{}' is not a conversation id", part))
        })
        .collect::<Result<_>>()?;
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}
