use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use strum::{Display, EnumIter, EnumString};

use crate::domain::{AgentAddress, ConversationTag, CorrelationToken};

/// The intent of a message.
///
/// Closed set: every phase handler matches on it exhaustively.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Performative {
    /// Call for proposals, buyer to sellers.
    Solicit,
    /// A priced offer, seller to buyer.
    Propose,
    /// Refusal to bid or to honour a commit.
    Reject,
    /// Purchase order, buyer to the winning seller.
    Commit,
    /// The order was fulfilled.
    Confirm,
    /// Anything the protocol does not name.
    Other,
}

/// Receivers of a message. Most messages have exactly one.
pub type Receivers = SmallVec<[AgentAddress; 1]>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub performative: Performative,
    pub sender: AgentAddress,
    pub receivers: Receivers,
    pub conversation: ConversationTag,
    /// Token the initiator expects to see echoed in `in_reply_to`.
    pub reply_with: Option<CorrelationToken>,
    pub in_reply_to: Option<CorrelationToken>,
    pub payload: String,
}

impl Message {
    pub fn new(
        performative: Performative,
        sender: AgentAddress,
        conversation: ConversationTag,
    ) -> Self {
        Self {
            performative,
            sender,
            receivers: SmallVec::new(),
            conversation,
            reply_with: None,
            in_reply_to: None,
            payload: String::new(),
        }
    }

    pub fn with_receiver(mut self, receiver: AgentAddress) -> Self {
        self.receivers.push(receiver);
        self
    }

    pub fn with_receivers(mut self, receivers: impl IntoIterator<Item = AgentAddress>) -> Self {
        self.receivers.extend(receivers);
        self
    }

    pub fn with_payload(self, payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..self
        }
    }

    pub fn with_reply_with(self, token: CorrelationToken) -> Self {
        Self {
            reply_with: Some(token),
            ..self
        }
    }

    pub fn with_in_reply_to(self, token: CorrelationToken) -> Self {
        Self {
            in_reply_to: Some(token),
            ..self
        }
    }

    /// Builds the skeleton of a reply: addressed back to the sender, same
    /// conversation, and echoing `reply_with` as `in_reply_to`.
    pub fn reply(&self, performative: Performative, from: AgentAddress) -> Message {
        Message {
            performative,
            sender: from,
            receivers: smallvec![self.sender.clone()],
            conversation: self.conversation.clone(),
            reply_with: None,
            in_reply_to: self.reply_with.clone(),
            payload: String::new(),
        }
    }
}

/// A conjunction of optional predicates over the fields a receiver filters on.
///
/// An empty template matches every message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageTemplate {
    conversation: Option<ConversationTag>,
    in_reply_to: Option<CorrelationToken>,
    performative: Option<Performative>,
    sender: Option<AgentAddress>,
}

impl MessageTemplate {
    pub fn any() -> Self {
        Self::default()
    }

    /// The filter a round arms after sending a message tagged with `token`.
    pub fn reply_to(conversation: ConversationTag, token: CorrelationToken) -> Self {
        Self::any()
            .with_conversation(conversation)
            .with_in_reply_to(token)
    }

    pub fn with_conversation(self, conversation: ConversationTag) -> Self {
        Self {
            conversation: Some(conversation),
            ..self
        }
    }

    pub fn with_in_reply_to(self, token: CorrelationToken) -> Self {
        Self {
            in_reply_to: Some(token),
            ..self
        }
    }

    pub fn with_performative(self, performative: Performative) -> Self {
        Self {
            performative: Some(performative),
            ..self
        }
    }

    pub fn with_sender(self, sender: AgentAddress) -> Self {
        Self {
            sender: Some(sender),
            ..self
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.conversation
            .as_ref()
            .is_none_or(|c| *c == message.conversation)
            && self
                .in_reply_to
                .as_ref()
                .is_none_or(|t| message.in_reply_to.as_ref() == Some(t))
            && self
                .performative
                .is_none_or(|p| p == message.performative)
            && self.sender.as_ref().is_none_or(|s| *s == message.sender)
    }
}
