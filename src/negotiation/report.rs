use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{AgentAddress, Bid, ResourceId, RoundId},
    error::{SystemError, TenderResult},
    negotiation::state::{Finished, Outcome, Round},
};

/// Summary of one finished negotiation round.
///
/// This is what a round leaves behind once it is dropped: who was asked, how many
/// answered, which bid won and how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub round_id: RoundId,
    pub resource: ResourceId,
    pub counterparties: Vec<AgentAddress>,
    pub replies: usize,
    pub malformed_replies: usize,
    pub best_bid: Option<Bid>,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RoundReport {
    pub fn new(round: &Round<Finished>, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        let tally = round.tally();
        Self {
            round_id: round.id,
            resource: round.resource.clone(),
            counterparties: round.counterparties.to_vec(),
            replies: tally.replies,
            malformed_replies: tally.malformed,
            best_bid: round.best_bid().cloned(),
            outcome: round.outcome().clone(),
            started_at,
            finished_at,
        }
    }

    pub fn is_purchase(&self) -> bool {
        self.outcome.is_purchase()
    }

    /// The purchase, if the round ended with one.
    pub fn purchase(&self) -> Option<&Bid> {
        match &self.outcome {
            Outcome::Purchased(bid) => Some(bid),
            Outcome::Declined { .. } | Outcome::NoOffers | Outcome::Expired { .. } => None,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn to_json_line(&self) -> TenderResult<String> {
        Ok(serde_json::to_string(self).map_err(SystemError::from)?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        domain::{ConversationTag, Price, SessionId},
        message::Performative,
        negotiation::{RoundParams, state::Phase},
    };

    fn purchased_round() -> Round<Finished> {
        let params = RoundParams {
            id: RoundId(2),
            session: SessionId(9),
            buyer: "buyer".into(),
            resource: "Dune".into(),
            conversation: ConversationTag::default(),
            counterparties: vec!["s1".into()],
        };
        let t = Phase::start(params).step(None).unwrap();
        let cfp = t.outgoing[0].clone();
        let t = t
            .phase
            .step(Some(cfp.reply(Performative::Propose, "s1".into()).with_payload("42")))
            .unwrap();
        let t = t.phase.step(None).unwrap();
        let order = t.outgoing[0].clone();
        let t = t
            .phase
            .step(Some(order.reply(Performative::Confirm, "s1".into())))
            .unwrap();
        match t.phase {
            Phase::Finished(round) => round,
            other => panic!("round should be finished, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_report_captures_round_summary() {
        // Arrange
        let round = purchased_round();
        let start = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 3).unwrap();

        // Act
        let report = RoundReport::new(&round, start, end);

        // Assert
        assert_eq!(report.round_id, RoundId(2));
        assert_eq!(report.counterparties, vec![AgentAddress::from("s1")]);
        assert_eq!(report.replies, 1);
        assert_eq!(report.malformed_replies, 0);
        assert!(report.is_purchase());
        assert_eq!(report.purchase().map(|b| b.price), Some(Price(42)));
        assert_eq!(report.duration(), chrono::Duration::seconds(3));
    }

    #[test]
    fn test_report_serializes_as_single_json_line() {
        let now = Utc::now();
        let report = RoundReport::new(&purchased_round(), now, now);

        let line = report.to_json_line().expect("report must serialize");
        let parsed: RoundReport = serde_json::from_str(&line).expect("line must parse back");

        assert!(!line.contains('\n'));
        assert_eq!(parsed.outcome, report.outcome);
        assert_eq!(parsed.resource, report.resource);
    }
}
