use std::{fmt, num::ParseIntError, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{impl_display_inner, impl_from_primitive, impl_from_str_like};

pub const DEFAULT_SERVICE_TYPE: &str = "book-selling";
pub const DEFAULT_CONVERSATION: &str = "book-trade";

// ================================================================================================
// Identities
// ================================================================================================

/// Address of an agent on the message transport.
///
/// Counterparty addresses are resolved by the directory service and are opaque
/// to the negotiation logic: they are only compared, hashed and echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentAddress(pub Arc<str>);
impl_from_str_like!(AgentAddress);
impl_display_inner!(AgentAddress);

impl AgentAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The thing being negotiated for (e.g. a book title).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub String);
impl_from_str_like!(ResourceId);
impl_display_inner!(ResourceId);

impl ResourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

/// Capability tag advertised in the directory by agents able to sell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceType(pub String);
impl_from_str_like!(ServiceType);
impl_display_inner!(ServiceType);

impl Default for ServiceType {
    fn default() -> Self {
        Self(DEFAULT_SERVICE_TYPE.to_string())
    }
}

/// Constant tag shared by every message of one negotiation family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationTag(pub String);
impl_from_str_like!(ConversationTag);
impl_display_inner!(ConversationTag);

impl Default for ConversationTag {
    fn default() -> Self {
        Self(DEFAULT_CONVERSATION.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct RoundId(pub u64);
impl_from_primitive!(RoundId, u64);
impl_display_inner!(RoundId);

impl RoundId {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Per-scheduler nonce mixed into correlation tokens.
///
/// Round ids restart at zero with every scheduler, so the session keeps tokens of
/// two schedulers sharing a transport apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SessionId(pub u32);
impl_from_primitive!(SessionId, u32);

impl SessionId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

// ================================================================================================
// Correlation
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum TokenKind {
    /// Call for proposals.
    Cfp,
    /// Purchase order sent to the winning bidder.
    Order,
}

/// Value generated by the initiator of an exchange and echoed by the responder as
/// `in_reply_to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationToken(pub String);
impl_from_str_like!(CorrelationToken);
impl_display_inner!(CorrelationToken);

impl CorrelationToken {
    /// Builds `"{kind}-{session}-{round}"`. Unique as long as a round issues at most
    /// one token per kind, which the state machine guarantees.
    pub fn new(kind: TokenKind, session: SessionId, round: RoundId) -> Self {
        Self(format!("{kind}-{session}-{round}"))
    }
}

// ================================================================================================
// Pricing
// ================================================================================================

/// A non-negative integer price as quoted by a counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Price(pub u64);
impl_from_primitive!(Price, u64);
impl_display_inner!(Price);

impl FromStr for Price {
    type Err = ParseIntError;

    /// Surrounding whitespace is ignored. Signs other than an optional `+`, decimals
    /// and empty strings are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

/// A valid proposal received during a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub counterparty: AgentAddress,
    pub price: Price,
}

impl Bid {
    pub fn new(counterparty: AgentAddress, price: Price) -> Self {
        Self {
            counterparty,
            price,
        }
    }

    /// Whether `other` should replace `self` as the best bid.
    ///
    /// Strictly lower only: on equal prices the earlier bid stays.
    pub fn is_beaten_by(&self, other: &Bid) -> bool {
        other.price < self.price
    }
}
