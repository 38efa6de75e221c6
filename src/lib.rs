//! Buyer side of a contract-net negotiation.
//!
//! A [`agent::BuyerAgent`] periodically asks a [`directory::Directory`] for the
//! sellers of a service, solicits a price for one resource from all of them, and
//! orders from the cheapest. Each attempt is an independent negotiation round
//! driven by the [`negotiation`] state machine over a [`transport::Transport`].

mod macros;

pub mod agent;
pub mod config;
pub mod directory;
pub mod domain;
pub mod error;
pub mod message;
pub mod negotiation;
pub mod seller;
pub mod transport;

pub mod prelude {
    // 1. Traits
    pub use crate::directory::Directory;
    pub use crate::transport::Transport;

    // 2. Agents
    pub use crate::agent::BuyerAgent;
    pub use crate::seller::Seller;

    // 3. Negotiation
    pub use crate::negotiation::{
        Outcome, Phase, PhaseKind, RoundParams, RoundReport, RoundScheduler, Transition,
    };

    // 4. Domain and Messaging
    pub use crate::directory::Registry;
    pub use crate::domain::{
        AgentAddress, Bid, ConversationTag, CorrelationToken, Price, ResourceId, RoundId,
        ServiceType, SessionId,
    };
    pub use crate::message::{Message, MessageTemplate, Performative};
    pub use crate::transport::{LocalBus, Mailbox};

    // 5. Configuration
    pub use crate::config::{BuyerConfig, RoundConfig};

    // 6. Errors
    pub use crate::error::{
        ConfigError, DirectoryError, NegotiationError, SystemError, TenderError, TenderResult,
        TransportError,
    };
}
