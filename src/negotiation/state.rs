use std::{fmt, fmt::Debug, sync::Arc};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    domain::{AgentAddress, Bid, ConversationTag, CorrelationToken, ResourceId, RoundId, SessionId},
    message::MessageTemplate,
};

pub mod await_confirmation;
pub mod broadcast;
pub mod collect_bids;
pub mod commit;

pub trait RoundState: Debug + Clone + Send + Sync + 'static {}

/// Counters carried through every phase for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tally {
    /// Replies received to the call for proposals, of any performative.
    pub replies: usize,
    /// Proposals whose price could not be parsed.
    pub malformed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Broadcast;

impl RoundState for Broadcast {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectBids {
    token: CorrelationToken,
    template: MessageTemplate,
    tally: Tally,
    best: Option<Bid>,
}

impl RoundState for CollectBids {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    tally: Tally,
    best: Bid,
}

impl RoundState for Commit {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwaitConfirmation {
    token: CorrelationToken,
    template: MessageTemplate,
    tally: Tally,
    best: Bid,
}

impl RoundState for AwaitConfirmation {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    tally: Tally,
    best: Option<Bid>,
    outcome: Outcome,
}

impl RoundState for Finished {}

/// How a round ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// The winning bidder confirmed the order.
    Purchased(Bid),
    /// The winning bidder answered the order with anything but a confirmation.
    Declined { counterparty: AgentAddress },
    /// Every counterparty replied but none with a usable proposal, or there were
    /// no counterparties at all.
    NoOffers,
    /// The reply budget of `phase` ran out.
    Expired { phase: PhaseKind },
}

impl Outcome {
    pub fn is_purchase(&self) -> bool {
        matches!(self, Self::Purchased(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Purchased(bid) => write!(f, "purchased from {} at {}", bid.counterparty, bid.price),
            Self::Declined { counterparty } => write!(f, "declined by {counterparty}"),
            Self::NoOffers => write!(f, "no offers"),
            Self::Expired { phase } => write!(f, "expired while in {phase}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Round<S: RoundState> {
    // === Identity ===
    pub id: RoundId,

    /// Nonce of the scheduler that launched the round, part of every token it issues.
    pub session: SessionId,

    /// Our own address, used as sender of every outbound message.
    pub buyer: AgentAddress,

    // === Negotiation ===
    pub resource: ResourceId,
    pub conversation: ConversationTag,

    /// Sellers solicited by this round. Deduplicated, sorted and frozen at start.
    pub counterparties: Arc<[AgentAddress]>,

    // === State ===
    pub state: S,
}

impl<S: RoundState> Round<S> {
    /// Moves the round into its next state, keeping identity and snapshot.
    pub(crate) fn into_state<N: RoundState>(self, state: N) -> Round<N> {
        Round {
            id: self.id,
            session: self.session,
            buyer: self.buyer,
            resource: self.resource,
            conversation: self.conversation,
            counterparties: self.counterparties,
            state,
        }
    }

    pub(crate) fn finish(self, tally: Tally, best: Option<Bid>, outcome: Outcome) -> Round<Finished> {
        self.into_state(Finished {
            tally,
            best,
            outcome,
        })
    }
}

impl Round<Finished> {
    pub fn outcome(&self) -> &Outcome {
        &self.state.outcome
    }

    pub fn tally(&self) -> Tally {
        self.state.tally
    }

    pub fn best_bid(&self) -> Option<&Bid> {
        self.state.best.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum PhaseKind {
    Broadcast,
    CollectBids,
    Commit,
    AwaitConfirmation,
    Finished,
}

/// A negotiation round in one of its phases.
#[derive(Debug, Clone)]
pub enum Phase {
    Broadcast(Round<Broadcast>),
    CollectBids(Round<CollectBids>),
    Commit(Round<Commit>),
    AwaitConfirmation(Round<AwaitConfirmation>),
    Finished(Round<Finished>),
}

impl Phase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            Self::Broadcast(_) => PhaseKind::Broadcast,
            Self::CollectBids(_) => PhaseKind::CollectBids,
            Self::Commit(_) => PhaseKind::Commit,
            Self::AwaitConfirmation(_) => PhaseKind::AwaitConfirmation,
            Self::Finished(_) => PhaseKind::Finished,
        }
    }

    pub fn round_id(&self) -> RoundId {
        match self {
            Self::Broadcast(r) => r.id,
            Self::CollectBids(r) => r.id,
            Self::Commit(r) => r.id,
            Self::AwaitConfirmation(r) => r.id,
            Self::Finished(r) => r.id,
        }
    }

    pub fn resource(&self) -> &ResourceId {
        match self {
            Self::Broadcast(r) => &r.resource,
            Self::CollectBids(r) => &r.resource,
            Self::Commit(r) => &r.resource,
            Self::AwaitConfirmation(r) => &r.resource,
            Self::Finished(r) => &r.resource,
        }
    }

    pub fn counterparties(&self) -> &[AgentAddress] {
        match self {
            Self::Broadcast(r) => &r.counterparties,
            Self::CollectBids(r) => &r.counterparties,
            Self::Commit(r) => &r.counterparties,
            Self::AwaitConfirmation(r) => &r.counterparties,
            Self::Finished(r) => &r.counterparties,
        }
    }

    /// The armed reply filter, present only while the round waits for a reply.
    pub fn template(&self) -> Option<&MessageTemplate> {
        match self {
            Self::CollectBids(r) => Some(&r.state.template),
            Self::AwaitConfirmation(r) => Some(&r.state.template),
            Self::Broadcast(_) | Self::Commit(_) | Self::Finished(_) => None,
        }
    }

    /// The single outstanding correlation token, if any.
    pub fn token(&self) -> Option<&CorrelationToken> {
        match self {
            Self::CollectBids(r) => Some(&r.state.token),
            Self::AwaitConfirmation(r) => Some(&r.state.token),
            Self::Broadcast(_) | Self::Commit(_) | Self::Finished(_) => None,
        }
    }

    pub fn awaits_reply(&self) -> bool {
        self.template().is_some()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            Self::Finished(r) => Some(r.outcome()),
            _ => None,
        }
    }

    pub fn tally(&self) -> Tally {
        match self {
            Self::Broadcast(_) => Tally::default(),
            Self::CollectBids(r) => r.state.tally,
            Self::Commit(r) => r.state.tally,
            Self::AwaitConfirmation(r) => r.state.tally,
            Self::Finished(r) => r.state.tally,
        }
    }

    pub fn replies(&self) -> usize {
        self.tally().replies
    }

    pub fn best_bid(&self) -> Option<&Bid> {
        match self {
            Self::Broadcast(_) => None,
            Self::CollectBids(r) => r.state.best.as_ref(),
            Self::Commit(r) => Some(&r.state.best),
            Self::AwaitConfirmation(r) => Some(&r.state.best),
            Self::Finished(r) => r.state.best.as_ref(),
        }
    }
}
