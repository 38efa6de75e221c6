use itertools::Itertools;
use tokio::{
    task::{JoinError, JoinSet},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::BuyerConfig,
    directory::Directory,
    domain::{AgentAddress, RoundId, SessionId},
    error::{TenderError, TenderResult},
    negotiation::{
        driver,
        report::RoundReport,
        round::RoundParams,
        state::Phase,
    },
    transport::{Mailbox, Transport},
};

/// Periodically refreshes the seller snapshot and launches one round per tick.
///
/// Rounds run as independent tasks on the scheduler's [`JoinSet`]; a slow round
/// never delays the next tick and several rounds may be in flight at once. Every
/// finished round is published as a [`RoundReport`] on [`RoundScheduler::reports`].
pub struct RoundScheduler<D, T> {
    identity: AgentAddress,
    config: BuyerConfig,
    directory: D,
    transport: T,
    mailbox: Mailbox,
    session: SessionId,
    next_round: RoundId,
    rounds: JoinSet<TenderResult<RoundReport>>,
    outbox: async_channel::Sender<RoundReport>,
    reports: async_channel::Receiver<RoundReport>,
}

impl<D, T> RoundScheduler<D, T>
where
    D: Directory,
    T: Transport + Clone,
{
    pub fn new(
        identity: AgentAddress,
        config: BuyerConfig,
        directory: D,
        transport: T,
        mailbox: Mailbox,
    ) -> Self {
        let (outbox, reports) = async_channel::unbounded();
        Self {
            identity,
            config,
            directory,
            transport,
            mailbox,
            session: SessionId::random(),
            next_round: RoundId::default(),
            rounds: JoinSet::new(),
            outbox,
            reports,
        }
    }

    pub fn with_session(self, session: SessionId) -> Self {
        Self { session, ..self }
    }

    /// Stream of reports of finished rounds. Closed once [`RoundScheduler::run`] returns.
    pub fn reports(&self) -> async_channel::Receiver<RoundReport> {
        self.reports.clone()
    }

    pub fn in_flight(&self) -> usize {
        self.rounds.len()
    }

    /// Looks up the sellers and launches a round against them.
    ///
    /// A failed lookup skips this tick only. An empty result still launches a
    /// round, which ends immediately as `NoOffers`.
    #[tracing::instrument(skip(self), fields(buyer = %self.identity, round_id = %self.next_round))]
    pub async fn on_tick(&mut self) -> Option<RoundId> {
        let sellers = match self.directory.lookup(&self.config.service).await {
            Ok(sellers) => sellers,
            Err(e) => {
                warn!(error = %e, "Directory lookup failed, skipping tick");
                return None;
            }
        };
        info!(
            sellers = %sellers.iter().join(", "),
            count = sellers.len(),
            "Found seller agents"
        );

        let id = self.next_round;
        self.next_round = id.next();

        let phase = Phase::start(RoundParams {
            id,
            session: self.session,
            buyer: self.identity.clone(),
            resource: self.config.resource.clone(),
            conversation: self.config.conversation.clone(),
            counterparties: sellers,
        });
        self.rounds.spawn(driver::drive(
            phase,
            self.mailbox.clone(),
            self.transport.clone(),
            self.config.round.reply_timeout,
        ));
        Some(id)
    }

    /// Ticks until cancelled, until `max_ticks` ticks have fired and their rounds
    /// finished, or (with `stop_after_purchase`) until a round buys the resource.
    ///
    /// Rounds still in flight when the loop stops are aborted. Returns the reports
    /// of all rounds that finished.
    #[tracing::instrument(skip_all, fields(buyer = %self.identity, resource = %self.config.resource))]
    pub async fn run(mut self, cancel: CancellationToken) -> Vec<RoundReport> {
        let period = self.config.period;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks = 0u64;
        let mut finished = Vec::new();

        loop {
            let ticks_left = self.config.max_ticks.is_none_or(|max| ticks < max);
            if !ticks_left && self.rounds.is_empty() {
                info!(ticks, "Tick budget used up");
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scheduler cancelled");
                    break;
                }

                _ = ticker.tick(), if ticks_left => {
                    ticks += 1;
                    self.on_tick().await;
                }

                Some(joined) = self.rounds.join_next() => {
                    if let Some(report) = self.reap(joined) {
                        let purchased = report.is_purchase();
                        finished.push(report);
                        if purchased && self.config.stop_after_purchase {
                            info!("Resource purchased, no further rounds");
                            break;
                        }
                    }
                }
            }
        }

        if !self.rounds.is_empty() {
            warn!(in_flight = self.rounds.len(), "Aborting unfinished rounds");
        }
        self.rounds.shutdown().await;
        self.outbox.close();
        finished
    }

    fn reap(&self, joined: Result<TenderResult<RoundReport>, JoinError>) -> Option<RoundReport> {
        match joined {
            Ok(Ok(report)) => {
                match report.purchase() {
                    Some(bid) => info!(
                        round_id = %report.round_id,
                        seller = %bid.counterparty,
                        price = %bid.price,
                        "{} successfully purchased",
                        report.resource
                    ),
                    None => info!(round_id = %report.round_id, outcome = %report.outcome, "Round ended without purchase"),
                }
                if self.outbox.try_send(report.clone()).is_err() {
                    debug!("Report channel closed");
                }
                Some(report)
            }
            Ok(Err(e)) => {
                error!(error = %e, "Round failed");
                None
            }
            Err(e) => {
                let e = TenderError::from(e);
                error!(error = %e, "Round task panicked or was aborted");
                None
            }
        }
    }
}
