//! The buyer side of a contract-net negotiation.
//!
//! A [`Phase`] is one negotiation round frozen between two steps. The protocol
//! logic ([`Phase::step`], [`Phase::expire`]) is pure: it consumes the phase and an
//! optional incoming reply and yields the next phase plus the messages to send.
//! [`driver::drive`] feeds it from a mailbox, and [`scheduler::RoundScheduler`]
//! launches one round per tick.

pub mod driver;
pub mod report;
pub mod round;
pub mod scheduler;
pub mod state;

pub use report::RoundReport;
pub use round::{RoundParams, Transition};
pub use scheduler::RoundScheduler;
pub use state::{Outcome, Phase, PhaseKind};
