use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    directory::Registry,
    domain::{AgentAddress, ConversationTag, Price, ResourceId, ServiceType},
    message::{Message, MessageTemplate, Performative},
    transport::{Mailbox, Transport},
};

pub const NOT_AVAILABLE: &str = "not-available";

/// The counterparty side of the negotiation: a seller with a price list.
///
/// Answers a call for proposals with its price, or a rejection when the resource
/// is not in stock. Answers an order with a confirmation and removes the item, or
/// with `Other` when it has been sold in the meantime.
pub struct Seller<T> {
    identity: AgentAddress,
    conversation: ConversationTag,
    catalogue: HashMap<ResourceId, Price>,
    transport: T,
    mailbox: Mailbox,
}

impl<T: Transport> Seller<T> {
    pub fn new(identity: AgentAddress, transport: T, mailbox: Mailbox) -> Self {
        Self {
            identity,
            conversation: ConversationTag::default(),
            catalogue: HashMap::new(),
            transport,
            mailbox,
        }
    }

    pub fn with_conversation(self, conversation: ConversationTag) -> Self {
        Self {
            conversation,
            ..self
        }
    }

    pub fn with_offer(mut self, resource: impl Into<ResourceId>, price: Price) -> Self {
        self.catalogue.insert(resource.into(), price);
        self
    }

    pub fn identity(&self) -> &AgentAddress {
        &self.identity
    }

    pub fn price_of(&self, resource: &ResourceId) -> Option<Price> {
        self.catalogue.get(resource).copied()
    }

    /// Publishes the seller's service in the registry.
    pub fn advertise(&self, registry: &Registry, service: ServiceType) {
        registry.register(self.identity.clone(), [service]);
    }

    /// Computes the answer to one incoming message.
    pub fn respond(&mut self, message: &Message) -> Option<Message> {
        let resource = ResourceId::from(message.payload.as_str());
        match message.performative {
            Performative::Solicit => Some(match self.price_of(&resource) {
                Some(price) => message
                    .reply(Performative::Propose, self.identity.clone())
                    .with_payload(price.to_string()),
                None => message
                    .reply(Performative::Reject, self.identity.clone())
                    .with_payload(NOT_AVAILABLE),
            }),
            Performative::Commit => Some(match self.catalogue.remove(&resource) {
                Some(price) => {
                    info!(seller = %self.identity, %resource, buyer = %message.sender, %price, "Sold");
                    message.reply(Performative::Confirm, self.identity.clone())
                }
                None => message
                    .reply(Performative::Other, self.identity.clone())
                    .with_payload(NOT_AVAILABLE),
            }),
            Performative::Propose
            | Performative::Reject
            | Performative::Confirm
            | Performative::Other => {
                debug!(seller = %self.identity, performative = %message.performative, "Ignoring message");
                None
            }
        }
    }

    /// Serves incoming messages until cancelled.
    #[tracing::instrument(skip_all, fields(seller = %self.identity))]
    pub async fn run(mut self, cancel: CancellationToken) {
        let template = MessageTemplate::any().with_conversation(self.conversation.clone());
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = self.mailbox.receive(&template) => message,
            };

            if let Some(reply) = self.respond(&message) {
                if let Err(e) = self.transport.send(reply) {
                    warn!(error = %e, "Failed to answer");
                }
            }
        }
        debug!("Seller stopped");
    }
}
