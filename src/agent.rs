use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    config::BuyerConfig,
    directory::Directory,
    domain::AgentAddress,
    error::TenderResult,
    negotiation::{RoundReport, RoundScheduler},
    transport::{LocalBus, Mailbox, Transport},
};

/// A buyer agent: the lifecycle around one [`RoundScheduler`].
///
/// `setup` refuses to build an agent from an invalid configuration, so a
/// missing resource stops the process before any round is scheduled. The
/// configuration is validated exactly once, by `setup` or `on_bus`.
pub struct BuyerAgent<D, T> {
    identity: AgentAddress,
    scheduler: RoundScheduler<D, T>,
}

impl<D, T> BuyerAgent<D, T>
where
    D: Directory,
    T: Transport + Clone,
{
    pub fn setup(
        identity: AgentAddress,
        config: BuyerConfig,
        directory: D,
        transport: T,
        mailbox: Mailbox,
    ) -> TenderResult<Self> {
        admit(&identity, &config)?;
        Ok(Self::assemble(identity, config, directory, transport, mailbox))
    }

    fn assemble(
        identity: AgentAddress,
        config: BuyerConfig,
        directory: D,
        transport: T,
        mailbox: Mailbox,
    ) -> Self {
        info!(agent = %identity, resource = %config.resource, "Trying to buy");
        let scheduler = RoundScheduler::new(identity.clone(), config, directory, transport, mailbox);
        Self {
            identity,
            scheduler,
        }
    }

    pub fn identity(&self) -> &AgentAddress {
        &self.identity
    }

    pub fn reports(&self) -> async_channel::Receiver<RoundReport> {
        self.scheduler.reports()
    }

    /// Runs the scheduler until it stops, then takes the agent down.
    pub async fn run(self, cancel: CancellationToken) -> Vec<RoundReport> {
        let Self {
            identity,
            scheduler,
        } = self;
        let reports = scheduler.run(cancel).await;
        take_down(&identity, &reports);
        reports
    }
}

impl<D: Directory> BuyerAgent<D, LocalBus> {
    /// Sets the agent up on an in-process bus, registering its mailbox there only
    /// once the configuration has been accepted.
    pub fn on_bus(
        identity: AgentAddress,
        config: BuyerConfig,
        directory: D,
        bus: &LocalBus,
    ) -> TenderResult<Self> {
        admit(&identity, &config)?;
        let mailbox = bus.register(identity.clone());
        Ok(Self::assemble(identity, config, directory, bus.clone(), mailbox))
    }
}

/// Announces the agent and checks its configuration. A rejected configuration
/// takes the agent down right away.
fn admit(identity: &AgentAddress, config: &BuyerConfig) -> TenderResult<()> {
    info!(agent = %identity, "Buyer-agent is ready");
    if let Err(e) = config.validate() {
        error!(agent = %identity, error = %e, "Buyer-agent cannot start");
        take_down(identity, &[]);
        return Err(e);
    }
    Ok(())
}

fn take_down(identity: &AgentAddress, reports: &[RoundReport]) {
    let purchased = reports.iter().filter(|r| r.is_purchase()).count();
    info!(agent = %identity, rounds = reports.len(), purchased, "Buyer-agent terminating");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        directory::Registry,
        error::{ConfigError, TenderError},
    };

    #[test]
    fn test_invalid_config_fails_setup_without_registering() {
        let bus = LocalBus::new();

        let result = BuyerAgent::on_bus("buyer".into(), BuyerConfig::new(""), Registry::new(), &bus);

        assert!(matches!(
            result,
            Err(TenderError::Config(ConfigError::MissingResource))
        ));
        assert!(!bus.is_registered(&"buyer".into()));
    }

    #[test]
    fn test_setup_checks_config_once_and_keeps_identity() {
        let bus = LocalBus::new();
        let mailbox = bus.register("buyer".into());

        let rejected = BuyerAgent::setup(
            "buyer".into(),
            BuyerConfig::new("   "),
            Registry::new(),
            bus.clone(),
            mailbox.clone(),
        );
        let agent = BuyerAgent::setup(
            "buyer".into(),
            BuyerConfig::new("Dune"),
            Registry::new(),
            bus,
            mailbox,
        )
        .expect("valid config");

        assert!(matches!(
            rejected,
            Err(TenderError::Config(ConfigError::MissingResource))
        ));
        assert_eq!(agent.identity(), &AgentAddress::from("buyer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_without_sellers_reports_no_offers_per_tick() {
        // Arrange
        let bus = LocalBus::new();
        let config = BuyerConfig::new("Dune")
            .with_period(Duration::from_secs(20))
            .with_max_ticks(Some(2));
        let agent = BuyerAgent::on_bus("buyer".into(), config, Registry::new(), &bus)
            .expect("valid config");

        // Act
        let reports = agent.run(CancellationToken::new()).await;

        // Assert
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| !r.is_purchase() && r.counterparties.is_empty()));
    }
}
