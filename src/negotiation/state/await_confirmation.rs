use crate::{
    message::{Message, Performative},
    negotiation::{
        round::Transition,
        state::{AwaitConfirmation, Outcome, Phase, PhaseKind, Round},
    },
};

impl Round<AwaitConfirmation> {
    pub fn accepts(&self, reply: &Message) -> bool {
        self.state.template.matches(reply)
    }

    /// Any answer ends the round. Only a confirmation counts as a purchase; the
    /// order is never resent.
    pub fn on_reply(self, reply: Message) -> Transition {
        let AwaitConfirmation { tally, best, .. } = self.state.clone();

        let outcome = match reply.performative {
            Performative::Confirm => Outcome::Purchased(best.clone()),
            Performative::Solicit
            | Performative::Propose
            | Performative::Reject
            | Performative::Commit
            | Performative::Other => Outcome::Declined {
                counterparty: best.counterparty.clone(),
            },
        };

        Transition::to(Phase::Finished(self.finish(tally, Some(best), outcome)))
    }

    /// The seller never answered within the reply budget.
    pub fn expire(self) -> Transition {
        let AwaitConfirmation { tally, best, .. } = self.state.clone();
        let outcome = Outcome::Expired {
            phase: PhaseKind::AwaitConfirmation,
        };
        Transition::to(Phase::Finished(self.finish(tally, Some(best), outcome)))
    }
}
