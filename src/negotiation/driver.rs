use std::time::Duration;

use chrono::Utc;
use smallvec::SmallVec;
use tokio::time::Instant;

use crate::{
    error::TenderResult,
    message::{Message, MessageTemplate},
    negotiation::{
        report::RoundReport,
        state::{Phase, PhaseKind},
    },
    transport::{Mailbox, Transport},
};

/// Drives one round to a terminal phase.
///
/// Entry actions run immediately. Waiting phases poll the mailbox for a reply
/// matching their template and suspend until the next delivery when there is
/// none. With a `reply_timeout`, every waiting phase gets that much time before
/// [`Phase::expire`] is applied; without one a silent seller keeps the round
/// suspended until the task is aborted.
///
/// Send failures are logged and otherwise ignored: delivery is not guaranteed
/// anyway, and a missing reply is handled by the timeout.
///
/// Once the round is finished its templates are retired from the mailbox, so
/// replies that come in late or were never consumed do not pile up there.
#[tracing::instrument(
    skip_all,
    fields(round_id = %phase.round_id(), resource = %phase.resource())
)]
pub async fn drive<T: Transport>(
    mut phase: Phase,
    mailbox: Mailbox,
    transport: T,
    reply_timeout: Option<Duration>,
) -> TenderResult<RoundReport> {
    let started_at = Utc::now();
    let mut armed: Option<(PhaseKind, Option<Instant>)> = None;
    let mut spent: SmallVec<[MessageTemplate; 2]> = SmallVec::new();

    loop {
        if let Phase::Finished(round) = &phase {
            let dropped: usize = spent.iter().map(|t| mailbox.retire(t)).sum();
            if dropped > 0 {
                tracing::debug!(dropped, "Discarded leftover replies");
            }
            let report = RoundReport::new(round, started_at, Utc::now());
            tracing::info!(outcome = %report.outcome, replies = report.replies, "Round finished");
            return Ok(report);
        }

        let transition = match phase.template().cloned() {
            None => phase.step(None)?,
            Some(template) => {
                let kind = phase.kind();
                let deadline = match armed {
                    Some((armed_kind, deadline)) if armed_kind == kind => deadline,
                    _ => {
                        let deadline = reply_timeout.map(|t| Instant::now() + t);
                        armed = Some((kind, deadline));
                        spent.push(template.clone());
                        deadline
                    }
                };

                match next_reply(&mailbox, &template, deadline).await {
                    Some(reply) => phase.step(Some(reply))?,
                    None => {
                        tracing::warn!(phase = %kind, replies = phase.replies(), "Reply budget exhausted");
                        phase.expire()
                    }
                }
            }
        };

        for message in transition.outgoing {
            let performative = message.performative;
            if let Err(e) = transport.send(message) {
                tracing::warn!(%performative, error = %e, "Failed to send message");
            }
        }
        phase = transition.phase;
    }
}

async fn next_reply(
    mailbox: &Mailbox,
    template: &MessageTemplate,
    deadline: Option<Instant>,
) -> Option<Message> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, mailbox.receive(template))
            .await
            .ok(),
        None => Some(mailbox.receive(template).await),
    }
}
