use std::sync::Arc;

use itertools::Itertools;
use smallvec::SmallVec;

use crate::{
    domain::{AgentAddress, ConversationTag, ResourceId, RoundId, SessionId},
    error::{NegotiationError, TenderResult},
    message::Message,
    negotiation::state::{Broadcast, Phase, Round},
};

/// Messages produced by a single step. Never more than the one solicitation or order.
pub type Outgoing = SmallVec<[Message; 1]>;

/// Result of advancing a round by one step.
#[derive(Debug, Clone)]
pub struct Transition {
    pub phase: Phase,
    pub outgoing: Outgoing,
}

impl Transition {
    /// A transition that sends nothing. Also used when a waiting phase has no reply
    /// to work on and simply stays where it is.
    pub fn to(phase: Phase) -> Self {
        Self {
            phase,
            outgoing: Outgoing::new(),
        }
    }
}

/// Everything a scheduler decides when launching a round.
#[derive(Debug, Clone)]
pub struct RoundParams {
    pub id: RoundId,
    pub session: SessionId,
    pub buyer: AgentAddress,
    pub resource: ResourceId,
    pub conversation: ConversationTag,
    pub counterparties: Vec<AgentAddress>,
}

impl Phase {
    /// Creates a round in its initial `Broadcast` phase.
    ///
    /// The counterparty list is snapshotted: sorted, deduplicated and frozen.
    pub fn start(params: RoundParams) -> Phase {
        let RoundParams {
            id,
            session,
            buyer,
            resource,
            conversation,
            counterparties,
        } = params;

        let counterparties: Arc<[AgentAddress]> =
            counterparties.into_iter().sorted().dedup().collect();

        Phase::Broadcast(Round {
            id,
            session,
            buyer,
            resource,
            conversation,
            counterparties,
            state: Broadcast,
        })
    }

    /// Advances the round by one step.
    ///
    /// Phases with an entry action (`Broadcast`, `Commit`) take no input. Waiting
    /// phases (`CollectBids`, `AwaitConfirmation`) consume one reply matching their
    /// armed template, or stay put when there is none. A finished round stays
    /// finished. Feeding a reply to a phase that does not wait for it, or one that
    /// does not match the template, is rejected.
    pub fn step(self, incoming: Option<Message>) -> TenderResult<Transition> {
        match (self, incoming) {
            (Phase::Broadcast(round), None) => Ok(round.solicit()),
            (Phase::Commit(round), None) => Ok(round.order()),
            (Phase::CollectBids(round), Some(reply)) if round.accepts(&reply) => {
                Ok(round.on_reply(reply))
            }
            (Phase::AwaitConfirmation(round), Some(reply)) if round.accepts(&reply) => {
                Ok(round.on_reply(reply))
            }
            (phase @ (Phase::CollectBids(_) | Phase::AwaitConfirmation(_) | Phase::Finished(_)), None) => {
                Ok(Transition::to(phase))
            }
            (phase, Some(reply)) => Err(NegotiationError::InvalidTransition {
                from: phase.kind(),
                msg: format!(
                    "unexpected {} from {} (in reply to {:?})",
                    reply.performative, reply.sender, reply.in_reply_to
                ),
            }
            .into()),
        }
    }

    /// Applies the end of the reply budget to a waiting phase.
    ///
    /// Bidding closes with the offers received so far; an unanswered order ends
    /// the round as `Expired`. Other phases are returned unchanged.
    pub fn expire(self) -> Transition {
        match self {
            Phase::CollectBids(round) => round.close(),
            Phase::AwaitConfirmation(round) => round.expire(),
            phase @ (Phase::Broadcast(_) | Phase::Commit(_) | Phase::Finished(_)) => {
                Transition::to(phase)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{Bid, CorrelationToken, Price},
        error::TenderError,
        message::Performative,
        negotiation::state::{Outcome, PhaseKind},
    };

    const BUYER: &str = "buyer";

    fn params(sellers: &[&str]) -> RoundParams {
        RoundParams {
            id: RoundId(7),
            session: SessionId(1),
            buyer: BUYER.into(),
            resource: "Dune".into(),
            conversation: ConversationTag::default(),
            counterparties: sellers.iter().map(|s| AgentAddress::from(*s)).collect(),
        }
    }

    /// Runs the entry action and returns the phase collecting bids with the sent cfp.
    fn broadcast(sellers: &[&str]) -> (Phase, Message) {
        let t = Phase::start(params(sellers)).step(None).expect("broadcast");
        assert_eq!(t.outgoing.len(), 1, "exactly one call for proposals");
        let cfp = t.outgoing.into_iter().next().unwrap();
        (t.phase, cfp)
    }

    fn reply(to: &Message, from: &str, performative: Performative, payload: &str) -> Message {
        to.reply(performative, from.into()).with_payload(payload)
    }

    /// Feeds replies one by one, checking the counter invariant after every step.
    fn feed(mut phase: Phase, replies: Vec<Message>) -> (Phase, Vec<Message>) {
        let mut sent = Vec::new();
        let snapshot = phase.counterparties().len();
        for r in replies {
            let t = phase.step(Some(r)).expect("reply accepted");
            assert!(t.phase.replies() <= snapshot, "reply counter exceeded snapshot");
            sent.extend(t.outgoing);
            phase = t.phase;
        }
        (phase, sent)
    }

    /// Runs entry actions until the phase waits or finishes.
    fn settle(mut phase: Phase) -> (Phase, Vec<Message>) {
        let mut sent = Vec::new();
        while !phase.awaits_reply() && !phase.is_finished() {
            let t = phase.step(None).expect("entry action");
            sent.extend(t.outgoing);
            phase = t.phase;
        }
        (phase, sent)
    }

    // ============================================================================================
    // 1. Broadcast
    // ============================================================================================

    #[test]
    fn test_broadcast_solicits_every_seller_once() {
        // Arrange & Act
        let (phase, cfp) = broadcast(&["s2", "s1", "s2", "s3"]);

        // Assert
        assert_eq!(cfp.performative, Performative::Solicit);
        assert_eq!(cfp.payload, "Dune");
        assert_eq!(cfp.sender, AgentAddress::from(BUYER));
        assert_eq!(
            cfp.receivers.as_slice(),
            &[AgentAddress::from("s1"), AgentAddress::from("s2"), AgentAddress::from("s3")],
            "snapshot is deduplicated"
        );
        assert_eq!(phase.kind(), PhaseKind::CollectBids);
        assert_eq!(phase.token(), cfp.reply_with.as_ref());
        assert_eq!(phase.replies(), 0);
        assert!(phase.best_bid().is_none());
    }

    #[test]
    fn test_empty_snapshot_finishes_without_messages() {
        let t = Phase::start(params(&[])).step(None).unwrap();

        assert!(t.outgoing.is_empty(), "nothing may be sent");
        assert_eq!(t.phase.outcome(), Some(&Outcome::NoOffers));
        assert_eq!(t.phase.replies(), 0);
    }

    // ============================================================================================
    // 2. Collecting Bids
    // ============================================================================================

    #[test]
    fn test_first_lowest_bid_wins_ties() {
        // Arrange
        let (phase, cfp) = broadcast(&["a", "b", "c"]);
        let replies = vec![
            reply(&cfp, "a", Performative::Propose, "30"),
            reply(&cfp, "b", Performative::Propose, "20"),
            reply(&cfp, "c", Performative::Propose, "20"),
        ];

        // Act
        let (phase, sent) = feed(phase, replies);
        let (phase, orders) = settle(phase);

        // Assert
        assert!(sent.is_empty());
        assert_eq!(phase.best_bid(), Some(&Bid::new("b".into(), Price(20))));
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].performative, Performative::Commit);
        assert_eq!(orders[0].receivers.as_slice(), &[AgentAddress::from("b")]);
        assert_eq!(orders[0].payload, "Dune");
        assert_eq!(orders[0].conversation, cfp.conversation);
        assert_ne!(orders[0].reply_with, cfp.reply_with, "order needs a fresh token");
    }

    #[test]
    fn test_best_bid_is_minimum_for_any_arrival_order() {
        let prices = [55u64, 12, 40, 12, 99, 13];
        let sellers: Vec<String> = (0..prices.len()).map(|i| format!("s{i}")).collect();
        let names: Vec<&str> = sellers.iter().map(String::as_str).collect();

        for rotation in 0..prices.len() {
            let (phase, cfp) = broadcast(&names);
            let order: Vec<usize> = (0..prices.len()).map(|i| (i + rotation) % prices.len()).collect();
            let replies = order
                .iter()
                .map(|&i| reply(&cfp, names[i], Performative::Propose, &prices[i].to_string()))
                .collect();

            let (phase, _) = feed(phase, replies);

            let first_cheapest = order.iter().copied().find(|&i| prices[i] == 12).unwrap();
            let best = phase.best_bid().expect("a bid must be retained");
            assert_eq!(best.price, Price(12));
            assert_eq!(best.counterparty, AgentAddress::from(names[first_cheapest]));
        }
    }

    #[test]
    fn test_malformed_price_is_counted_but_ignored() {
        // Arrange
        let (phase, cfp) = broadcast(&["a", "b", "c"]);
        let replies = vec![
            reply(&cfp, "a", Performative::Propose, "cheap"),
            reply(&cfp, "b", Performative::Propose, "-1"),
            reply(&cfp, "c", Performative::Propose, "25"),
        ];

        // Act
        let (phase, _) = feed(phase, replies);

        // Assert
        assert_eq!(phase.kind(), PhaseKind::Commit);
        assert_eq!(phase.tally().replies, 3);
        assert_eq!(phase.tally().malformed, 2);
        assert_eq!(phase.best_bid(), Some(&Bid::new("c".into(), Price(25))));
    }

    #[test]
    fn test_only_refusals_end_in_no_offers_without_commit() {
        let (phase, cfp) = broadcast(&["a", "b"]);
        let replies = vec![
            reply(&cfp, "a", Performative::Reject, "not-available"),
            reply(&cfp, "b", Performative::Confirm, ""),
        ];

        let (phase, sent) = feed(phase, replies);
        let (phase, orders) = settle(phase);

        assert!(sent.is_empty());
        assert!(orders.is_empty(), "no commit without a valid proposal");
        assert_eq!(phase.outcome(), Some(&Outcome::NoOffers));
        assert_eq!(phase.replies(), 2);
    }

    #[test]
    fn test_waiting_phase_without_reply_stays_put() {
        let (phase, _) = broadcast(&["a"]);

        let t = phase.step(None).unwrap();

        assert!(t.outgoing.is_empty());
        assert_eq!(t.phase.kind(), PhaseKind::CollectBids);
        assert_eq!(t.phase.replies(), 0);
    }

    #[test]
    fn test_reply_with_foreign_token_is_rejected() {
        let (phase, cfp) = broadcast(&["a"]);
        let stale = reply(&cfp, "a", Performative::Propose, "10")
            .with_in_reply_to(CorrelationToken::from("cfp-deadbeef-1"));

        let err = phase.step(Some(stale)).unwrap_err();

        assert!(matches!(
            err,
            TenderError::Negotiation(NegotiationError::InvalidTransition {
                from: PhaseKind::CollectBids,
                ..
            })
        ));
    }

    #[test]
    fn test_expiry_closes_bidding_with_partial_replies() {
        // Arrange
        let (phase, cfp) = broadcast(&["a", "b", "c"]);
        let (phase, _) = feed(phase, vec![reply(&cfp, "b", Performative::Propose, "18")]);

        // Act
        let t = phase.expire();

        // Assert
        assert_eq!(t.phase.kind(), PhaseKind::Commit);
        assert_eq!(t.phase.best_bid(), Some(&Bid::new("b".into(), Price(18))));
        assert_eq!(t.phase.replies(), 1);
    }

    #[test]
    fn test_expiry_without_offers_is_no_offers() {
        let (phase, _) = broadcast(&["a", "b"]);

        let t = phase.expire();

        assert_eq!(t.phase.outcome(), Some(&Outcome::NoOffers));
    }

    // ============================================================================================
    // 3. Commit & Confirmation
    // ============================================================================================

    fn awaiting_confirmation() -> (Phase, Message) {
        let (phase, cfp) = broadcast(&["a", "b"]);
        let (phase, _) = feed(
            phase,
            vec![
                reply(&cfp, "a", Performative::Propose, "31"),
                reply(&cfp, "b", Performative::Propose, "29"),
            ],
        );
        let (phase, mut orders) = settle(phase);
        assert_eq!(phase.kind(), PhaseKind::AwaitConfirmation);
        (phase, orders.remove(0))
    }

    #[test]
    fn test_confirmation_records_purchase_at_best_price() {
        let (phase, order) = awaiting_confirmation();

        let t = phase
            .step(Some(reply(&order, "b", Performative::Confirm, "")))
            .unwrap();

        assert!(t.outgoing.is_empty());
        assert_eq!(
            t.phase.outcome(),
            Some(&Outcome::Purchased(Bid::new("b".into(), Price(29))))
        );
    }

    #[test]
    fn test_non_confirmation_declines_without_retry() {
        let (phase, order) = awaiting_confirmation();

        let t = phase
            .step(Some(reply(&order, "b", Performative::Other, "not-available")))
            .unwrap();
        let (finished, resent) = settle(t.phase);

        assert!(t.outgoing.is_empty());
        assert!(resent.is_empty(), "the order must never be retried");
        assert_eq!(
            finished.outcome(),
            Some(&Outcome::Declined {
                counterparty: "b".into()
            })
        );
    }

    #[test]
    fn test_late_bid_does_not_match_order_template() {
        let (phase, order) = awaiting_confirmation();
        // A proposal to the original cfp carries the cfp token, not the order token.
        let late = Message::new(Performative::Propose, "c".into(), ConversationTag::default())
            .with_in_reply_to(CorrelationToken::new(
                crate::domain::TokenKind::Cfp,
                SessionId(1),
                RoundId(7),
            ));

        assert_ne!(late.in_reply_to, order.reply_with);
        assert!(phase.step(Some(late)).is_err());
    }

    #[test]
    fn test_unanswered_order_expires() {
        let (phase, _) = awaiting_confirmation();

        let t = phase.expire();

        assert_eq!(
            t.phase.outcome(),
            Some(&Outcome::Expired {
                phase: PhaseKind::AwaitConfirmation
            })
        );
        assert_eq!(t.phase.best_bid().map(|b| b.price), Some(Price(29)));
    }

    #[test]
    fn test_finished_round_ignores_further_steps() {
        let t = Phase::start(params(&[])).step(None).unwrap();

        let again = t.phase.step(None).unwrap();
        let expired = again.phase.expire();

        assert!(again.outgoing.is_empty());
        assert_eq!(expired.phase.outcome(), Some(&Outcome::NoOffers));
    }
}
