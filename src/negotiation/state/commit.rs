use smallvec::smallvec;

use crate::{
    domain::{CorrelationToken, TokenKind},
    message::{Message, MessageTemplate, Performative},
    negotiation::{
        round::Transition,
        state::{AwaitConfirmation, Commit, Phase, Round},
    },
};

impl Round<Commit> {
    /// Places the order with the best bidder only and waits for its answer.
    pub fn order(self) -> Transition {
        let Commit { tally, best } = self.state.clone();
        let token = CorrelationToken::new(TokenKind::Order, self.session, self.id);
        let order = Message::new(Performative::Commit, self.buyer.clone(), self.conversation.clone())
            .with_receiver(best.counterparty.clone())
            .with_payload(self.resource.as_str())
            .with_reply_with(token.clone());
        let template = MessageTemplate::reply_to(self.conversation.clone(), token.clone());

        tracing::debug!(round_id = %self.id, token = %token, seller = %best.counterparty, "Order sent");

        let next = self.into_state(AwaitConfirmation {
            token,
            template,
            tally,
            best,
        });
        Transition {
            phase: Phase::AwaitConfirmation(next),
            outgoing: smallvec![order],
        }
    }
}
