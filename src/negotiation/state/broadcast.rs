use smallvec::smallvec;

use crate::{
    domain::{CorrelationToken, TokenKind},
    message::{Message, MessageTemplate, Performative},
    negotiation::{
        round::Transition,
        state::{Broadcast, CollectBids, Outcome, Phase, Round, Tally},
    },
};

impl Round<Broadcast> {
    /// Sends the call for proposals to every counterparty and starts collecting bids.
    ///
    /// With nobody to ask the round ends right here as `NoOffers`, without sending
    /// anything.
    pub fn solicit(self) -> Transition {
        if self.counterparties.is_empty() {
            tracing::info!(round_id = %self.id, "No sellers to solicit");
            let done = self.finish(Tally::default(), None, Outcome::NoOffers);
            return Transition::to(Phase::Finished(done));
        }

        let token = CorrelationToken::new(TokenKind::Cfp, self.session, self.id);
        let cfp = Message::new(Performative::Solicit, self.buyer.clone(), self.conversation.clone())
            .with_receivers(self.counterparties.iter().cloned())
            .with_payload(self.resource.as_str())
            .with_reply_with(token.clone());
        let template = MessageTemplate::reply_to(self.conversation.clone(), token.clone());

        tracing::debug!(
            round_id = %self.id,
            token = %token,
            sellers = self.counterparties.len(),
            "Call for proposals"
        );

        let next = self.into_state(CollectBids {
            token,
            template,
            tally: Tally::default(),
            best: None,
        });
        Transition {
            phase: Phase::CollectBids(next),
            outgoing: smallvec![cfp],
        }
    }
}
