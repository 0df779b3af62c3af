//! Channel send/receive abstraction.
//!
//! Messaging platforms are reached only through this crate:
//! - **Inbound** (`message`) - normalized messages from any channel
//! - **Commands** (`commands`) - `/start`, deep links and button callbacks
//! - **Replies** (`reply`) - text plus quick-reply buttons
//! - **Delivery** (`delivery`) - outbound senders with retry and backoff
//!
//! ```text
//! webhook → InboundMessage → parse_intent → orchestrator → Reply
//!                                         ghost scheduler → ChannelSender
//! ```

pub mod commands;
pub mod delivery;
pub mod message;
pub mod reply;

pub use commands::{parse_intent, CallbackAction, ChatCommand, DeepLink, InboundIntent};
pub use delivery::{
    deliver_with_retry, sender_from_config, ChannelSender, DeliveryError, DeliveryOutcome,
    HttpRelaySender, LoggingSender, NoopSender, OutboundMessage, RecordingSender, RetryPolicy,
};
pub use message::{InboundMessage, MediaKind, MediaRef};
pub use reply::{Button, Reply, ReplyBuilder};
