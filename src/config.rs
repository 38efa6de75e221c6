use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    domain::{ConversationTag, ResourceId, ServiceType},
    error::{ConfigError, TenderResult},
};

/// How often the buyer looks for sellers and launches a round.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(20);

/// Per-round settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoundConfig {
    /// Time a round waits in each waiting phase before giving up on missing
    /// replies. `None` waits forever.
    pub reply_timeout: Option<Duration>,
}

/// Configuration of a buyer agent.
///
/// Built with [`BuyerConfig::new`] and the `with_*` methods, checked with
/// [`BuyerConfig::validate`] before anything is scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyerConfig {
    /// The resource to buy. Required.
    pub resource: ResourceId,

    /// Capability tag sellers advertise in the directory.
    pub service: ServiceType,

    /// Conversation tag on every message of the negotiation.
    pub conversation: ConversationTag,

    /// Tick period of the round scheduler. The first round starts one period after
    /// the scheduler does.
    pub period: Duration,

    pub round: RoundConfig,

    /// Stop scheduling after the first confirmed purchase.
    pub stop_after_purchase: bool,

    /// Upper bound on scheduler ticks. `None` ticks until stopped.
    pub max_ticks: Option<u64>,
}

impl BuyerConfig {
    pub fn new(resource: impl Into<ResourceId>) -> Self {
        Self {
            resource: resource.into(),
            service: ServiceType::default(),
            conversation: ConversationTag::default(),
            period: DEFAULT_TICK_PERIOD,
            round: RoundConfig::default(),
            stop_after_purchase: true,
            max_ticks: None,
        }
    }

    pub fn with_service(self, service: impl Into<ServiceType>) -> Self {
        Self {
            service: service.into(),
            ..self
        }
    }

    pub fn with_conversation(self, conversation: impl Into<ConversationTag>) -> Self {
        Self {
            conversation: conversation.into(),
            ..self
        }
    }

    pub fn with_period(self, period: Duration) -> Self {
        Self { period, ..self }
    }

    pub fn with_reply_timeout(self, reply_timeout: Option<Duration>) -> Self {
        Self {
            round: RoundConfig { reply_timeout },
            ..self
        }
    }

    pub fn with_stop_after_purchase(self, stop_after_purchase: bool) -> Self {
        Self {
            stop_after_purchase,
            ..self
        }
    }

    pub fn with_max_ticks(self, max_ticks: Option<u64>) -> Self {
        Self { max_ticks, ..self }
    }

    pub fn validate(&self) -> TenderResult<()> {
        if self.resource.is_blank() {
            return Err(ConfigError::MissingResource.into());
        }
        if self.period.is_zero() {
            return Err(ConfigError::InvalidPeriod("tick period must be positive".to_string()).into());
        }
        if self.round.reply_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidValue {
                key: "reply_timeout".to_string(),
                msg: "must be positive when set".to_string(),
            }
            .into());
        }
        if self.service.0.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "service".to_string(),
                msg: "must not be blank".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
