#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tender::{
    directory::{Directory, Registry},
    domain::{AgentAddress, ConversationTag, Price, RoundId, ServiceType, SessionId},
    error::DirectoryError,
    message::{Message, MessageTemplate, Performative},
    negotiation::{Phase, RoundParams},
    seller::Seller,
    transport::{LocalBus, Mailbox, Transport},
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub const RESOURCE: &str = "Dune";
pub const BUYER: &str = "buyer";
pub const SESSION: SessionId = SessionId(0xab);

/// An in-process world: one bus, one registry, and the seller tasks running on it.
pub struct World {
    pub bus: LocalBus,
    pub registry: Registry,
    pub cancel: CancellationToken,
    sellers: JoinSet<()>,
}

impl World {
    pub fn new() -> Self {
        Self {
            bus: LocalBus::new(),
            registry: Registry::new(),
            cancel: CancellationToken::new(),
            sellers: JoinSet::new(),
        }
    }

    /// Spawns an advertised seller. `None` means it is out of stock and refuses.
    pub fn seller(&mut self, name: &str, price: Option<u64>) -> AgentAddress {
        let address = AgentAddress::from(name);
        let mailbox = self.bus.register(address.clone());
        let mut seller = Seller::new(address, self.bus.clone(), mailbox);
        if let Some(price) = price {
            seller = seller.with_offer(RESOURCE, Price(price));
        }
        seller.advertise(&self.registry, ServiceType::default());
        let address = seller.identity().clone();
        self.sellers.spawn(seller.run(self.cancel.child_token()));
        address
    }

    /// Registers a seller whose replies the test writes by hand.
    pub fn scripted(&self, name: &str) -> Counterparty {
        let address = AgentAddress::from(name);
        let mailbox = self.bus.register(address.clone());
        self.registry.register(address.clone(), [ServiceType::default()]);
        Counterparty {
            address,
            mailbox,
            bus: self.bus.clone(),
        }
    }

    pub fn buyer_mailbox(&self) -> Mailbox {
        self.bus.register(BUYER.into())
    }

    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        while self.sellers.join_next().await.is_some() {}
    }
}

/// A seller played by the test itself.
pub struct Counterparty {
    pub address: AgentAddress,
    pub mailbox: Mailbox,
    bus: LocalBus,
}

impl Counterparty {
    pub async fn expect(&self, performative: Performative) -> Message {
        let template = MessageTemplate::any().with_performative(performative);
        self.mailbox.receive(&template).await
    }

    pub fn answer(&self, to: &Message, performative: Performative, payload: &str) {
        let reply = to
            .reply(performative, self.address.clone())
            .with_payload(payload);
        self.bus.send(reply).expect("buyer is registered");
    }
}

pub fn round(id: u64, sellers: &[&AgentAddress]) -> Phase {
    Phase::start(RoundParams {
        id: RoundId(id),
        session: SESSION,
        buyer: BUYER.into(),
        resource: RESOURCE.into(),
        conversation: ConversationTag::default(),
        counterparties: sellers.iter().map(|s| (*s).clone()).collect(),
    })
}

/// Directory that fails the first `failures` lookups, then answers from `registry`.
#[derive(Clone)]
pub struct FlakyDirectory {
    registry: Registry,
    failures: usize,
    calls: Arc<AtomicUsize>,
}

impl FlakyDirectory {
    pub fn new(registry: Registry, failures: usize) -> Self {
        Self {
            registry,
            failures,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Directory for FlakyDirectory {
    async fn lookup(&self, service: &ServiceType) -> Result<Vec<AgentAddress>, DirectoryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(DirectoryError::Lookup {
                service: service.to_string(),
                msg: format!("lookup #{call} refused"),
            });
        }
        self.registry.lookup(service).await
    }
}
