use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use leadline_core::config::ChannelsConfig;
use leadline_core::domain::conversation::Channel;
use leadline_core::domain::tenant::TenantId;

use crate::reply::Reply;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub tenant_id: TenantId,
    pub external_user_id: String,
    pub channel: Channel,
    #[serde(flatten)]
    pub reply: Reply,
    pub correlation_id: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery timed out after {0} ms")]
    Timeout(u64),
    #[error("channel rejected the message: {0}")]
    Rejected(String),
    #[error("delivery transport failed: {0}")]
    Transport(String),
}

impl DeliveryError {
    /// Rejections are permanent; everything else may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError>;
}

#[derive(Default)]
pub struct NoopSender;

#[async_trait]
impl ChannelSender for NoopSender {
    async fn send(&self, _message: &OutboundMessage) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Writes outbound messages to the log instead of a provider. Used when no relay is configured.
#[derive(Default)]
pub struct LoggingSender;

#[async_trait]
impl ChannelSender for LoggingSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        info!(
            event_name = "channels.outbound.logged",
            tenant_id = %message.tenant_id,
            external_user_id = %message.external_user_id,
            channel = %message.channel,
            correlation_id = %message.correlation_id,
            buttons = message.reply.buttons.len(),
            "outbound message (no relay configured)"
        );
        Ok(())
    }
}

/// Keeps every attempted message and fails according to a script.
#[derive(Default)]
pub struct RecordingSender {
    state: Mutex<RecordingState>,
}

#[derive(Default)]
struct RecordingState {
    failures: VecDeque<DeliveryError>,
    attempts: Vec<OutboundMessage>,
    delivered: Vec<OutboundMessage>,
}

impl RecordingSender {
    pub fn failing_with(failures: Vec<DeliveryError>) -> Self {
        Self {
            state: Mutex::new(RecordingState {
                failures: failures.into(),
                attempts: Vec::new(),
                delivered: Vec::new(),
            }),
        }
    }

    pub fn attempts(&self) -> Vec<OutboundMessage> {
        self.with_state(|state| state.attempts.clone())
    }

    pub fn delivered(&self) -> Vec<OutboundMessage> {
        self.with_state(|state| state.delivered.clone())
    }

    fn with_state<T>(&self, read: impl FnOnce(&mut RecordingState) -> T) -> T {
        match self.state.lock() {
            Ok(mut state) => read(&mut state),
            Err(poisoned) => read(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl ChannelSender for RecordingSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        self.with_state(|state| {
            state.attempts.push(message.clone());
            match state.failures.pop_front() {
                Some(error) => Err(error),
                None => {
                    state.delivered.push(message.clone());
                    Ok(())
                }
            }
        })
    }
}

/// Posts outbound messages as JSON to a relay that owns the provider integrations.
pub struct HttpRelaySender {
    client: reqwest::Client,
    url: String,
    token: Option<SecretString>,
}

impl HttpRelaySender {
    pub fn new(
        url: impl Into<String>,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| DeliveryError::Transport(error.to_string()))?;
        Ok(Self { client, url: url.into(), token })
    }
}

#[async_trait]
impl ChannelSender for HttpRelaySender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let mut request = self.client.post(&self.url).json(message);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                DeliveryError::Timeout(0)
            } else {
                DeliveryError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = format!("relay responded {status}");
        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DeliveryError::Rejected(detail));
        }
        Err(DeliveryError::Transport(detail))
    }
}

/// The HTTP relay when `channels.outbound_url` is set; otherwise outbound messages are only logged.
pub fn sender_from_config(
    config: &ChannelsConfig,
) -> Result<Arc<dyn ChannelSender>, DeliveryError> {
    match config.outbound_url.as_deref().map(str::trim).filter(|url| !url.is_empty()) {
        Some(url) => Ok(Arc::new(HttpRelaySender::new(
            url,
            config.outbound_token.clone(),
            Duration::from_millis(config.send_timeout_ms),
        )?)),
        None => Ok(Arc::new(LoggingSender)),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub attempt_timeout_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            attempt_timeout_ms: 5_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        if !self.jitter || delay_ms < 2 {
            return Duration::from_millis(delay_ms);
        }
        let jittered = rand::thread_rng().gen_range(delay_ms / 2..=delay_ms);
        Duration::from_millis(jittered)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Exhausted { attempts: u32, last_error: DeliveryError },
}

impl DeliveryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

pub async fn deliver_with_retry<S>(
    sender: &S,
    message: &OutboundMessage,
    policy: &RetryPolicy,
) -> DeliveryOutcome
where
    S: ChannelSender + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);
    let attempt_timeout = Duration::from_millis(policy.attempt_timeout_ms.max(1));
    let mut last_error = DeliveryError::Transport("no attempt made".to_string());

    for attempt in 0..max_attempts {
        let result = match tokio::time::timeout(attempt_timeout, sender.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(policy.attempt_timeout_ms)),
        };

        match result {
            Ok(()) => {
                debug!(
                    event_name = "channels.delivery.sent",
                    correlation_id = %message.correlation_id,
                    attempts = attempt + 1,
                    "outbound message delivered"
                );
                return DeliveryOutcome::Delivered { attempts: attempt + 1 };
            }
            Err(error) => {
                warn!(
                    event_name = "channels.delivery.failed",
                    correlation_id = %message.correlation_id,
                    tenant_id = %message.tenant_id,
                    attempt = attempt + 1,
                    max_attempts,
                    error = %error,
                    "outbound delivery attempt failed"
                );
                let retryable = error.is_retryable();
                last_error = error;
                if !retryable {
                    return DeliveryOutcome::Exhausted { attempts: attempt + 1, last_error };
                }
                if attempt + 1 < max_attempts {
                    let delay = policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    DeliveryOutcome::Exhausted { attempts: max_attempts, last_error }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use leadline_core::config::ChannelsConfig;
    use leadline_core::domain::conversation::Channel;
    use leadline_core::domain::tenant::TenantId;

    use super::{
        deliver_with_retry, sender_from_config, ChannelSender, DeliveryError, DeliveryOutcome,
        OutboundMessage, RecordingSender, RetryPolicy,
    };
    use crate::reply::Reply;

    fn message() -> OutboundMessage {
        OutboundMessage {
            tenant_id: TenantId::new("acme-realty"),
            external_user_id: "wa-1".to_string(),
            channel: Channel::WhatsApp,
            reply: Reply::text("Still looking for a villa?"),
            correlation_id: "ghost-1".to_string(),
        }
    }

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            attempt_timeout_ms: 1_000,
            jitter: false,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay_ms: 100,
            max_delay_ms: 350,
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn jittered_backoff_stays_within_half_to_full_delay() {
        let policy = RetryPolicy { base_delay_ms: 400, max_delay_ms: 10_000, ..RetryPolicy::default() };
        for _ in 0..50 {
            let delay = policy.backoff(1);
            assert!(delay >= Duration::from_millis(400) && delay <= Duration::from_millis(800));
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_delivered() {
        let sender = RecordingSender::failing_with(vec![
            DeliveryError::Transport("502".to_string()),
            DeliveryError::Timeout(5_000),
        ]);
        let outcome = deliver_with_retry(&sender, &message(), &instant(3)).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
        assert_eq!(sender.attempts().len(), 3);
        assert_eq!(sender.delivered().len(), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let sender = RecordingSender::failing_with(vec![
            DeliveryError::Transport("down".to_string()),
            DeliveryError::Transport("down".to_string()),
            DeliveryError::Transport("still down".to_string()),
        ]);
        let outcome = deliver_with_retry(&sender, &message(), &instant(3)).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Exhausted {
                attempts: 3,
                last_error: DeliveryError::Transport("still down".to_string())
            }
        );
        assert!(sender.delivered().is_empty());
    }

    #[tokio::test]
    async fn permanent_rejection_stops_immediately() {
        let sender =
            RecordingSender::failing_with(vec![DeliveryError::Rejected("blocked".to_string())]);
        let outcome = deliver_with_retry(&sender, &message(), &instant(3)).await;
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(sender.attempts().len(), 1);
    }

    struct HangingSender;

    #[async_trait]
    impl ChannelSender for HangingSender {
        async fn send(&self, _message: &OutboundMessage) -> Result<(), DeliveryError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn slow_sends_are_bounded_by_the_attempt_timeout() {
        let policy = RetryPolicy { attempt_timeout_ms: 10, ..instant(2) };
        let outcome = deliver_with_retry(&HangingSender, &message(), &policy).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Exhausted { attempts: 2, last_error: DeliveryError::Timeout(10) }
        );
    }

    #[tokio::test]
    async fn blank_relay_url_falls_back_to_the_log_sender() {
        let config = ChannelsConfig {
            outbound_url: Some("   ".to_string()),
            outbound_token: None,
            send_timeout_ms: 1_000,
        };
        let sender = sender_from_config(&config).expect("log sender");
        assert_eq!(sender.send(&message()).await, Ok(()));
    }
}
