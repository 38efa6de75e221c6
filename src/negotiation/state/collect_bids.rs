use crate::{
    domain::{Bid, Price},
    error::NegotiationError,
    message::{Message, Performative},
    negotiation::{
        round::Transition,
        state::{CollectBids, Commit, Outcome, Phase, Round},
    },
};

impl Round<CollectBids> {
    /// Whether `reply` answers this round's call for proposals.
    pub fn accepts(&self, reply: &Message) -> bool {
        self.state.template.matches(reply)
    }

    /// Counts one reply and keeps the cheapest proposal.
    ///
    /// Malformed prices only spoil their own reply. Once every counterparty has
    /// answered, bidding is closed.
    pub fn on_reply(mut self, reply: Message) -> Transition {
        self.state.tally.replies += 1;

        match reply.performative {
            Performative::Propose => match reply.payload.parse::<Price>() {
                Ok(price) => self.consider(Bid::new(reply.sender, price)),
                Err(source) => {
                    let e = NegotiationError::MalformedPrice {
                        sender: reply.sender,
                        payload: reply.payload,
                        source,
                    };
                    tracing::warn!(round_id = %self.id, error = %e, "Ignoring malformed proposal");
                    self.state.tally.malformed += 1;
                }
            },
            Performative::Solicit
            | Performative::Reject
            | Performative::Commit
            | Performative::Confirm
            | Performative::Other => {
                tracing::debug!(
                    round_id = %self.id,
                    seller = %reply.sender,
                    performative = %reply.performative,
                    "Reply without offer"
                );
            }
        }

        if self.state.tally.replies >= self.counterparties.len() {
            self.close()
        } else {
            Transition::to(Phase::CollectBids(self))
        }
    }

    /// Ends bidding with whatever arrived so far.
    pub fn close(self) -> Transition {
        let tally = self.state.tally;
        match self.state.best.clone() {
            Some(best) => {
                tracing::info!(
                    round_id = %self.id,
                    seller = %best.counterparty,
                    price = %best.price,
                    replies = tally.replies,
                    "Bidding closed"
                );
                Transition::to(Phase::Commit(self.into_state(Commit { tally, best })))
            }
            None => {
                tracing::info!(round_id = %self.id, replies = tally.replies, "Bidding closed without offers");
                Transition::to(Phase::Finished(self.finish(tally, None, Outcome::NoOffers)))
            }
        }
    }

    fn consider(&mut self, bid: Bid) {
        let improves = self
            .state
            .best
            .as_ref()
            .is_none_or(|best| best.is_beaten_by(&bid));

        tracing::debug!(
            round_id = %self.id,
            seller = %bid.counterparty,
            price = %bid.price,
            improves,
            "Proposal received"
        );

        if improves {
            self.state.best = Some(bid);
        }
    }
}
