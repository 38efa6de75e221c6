use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::Notify;

use crate::{
    domain::AgentAddress,
    error::{TenderResult, TransportError},
    message::{Message, MessageTemplate},
};

/// Outbound half of the message transport.
///
/// Fire and forget: `Ok` means the message was handed over, not that anybody
/// read it.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, message: Message) -> TenderResult<()>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, message: Message) -> TenderResult<()> {
        (**self).send(message)
    }
}

// ================================================================================================
// Mailbox
// ================================================================================================

/// Templates of finished exchanges a mailbox remembers. Late replies to older
/// exchanges are no longer recognised and stay queued like any unknown message.
pub const RETIRED_CAPACITY: usize = 256;

/// Inbound queue of one agent.
///
/// Cloning is cheap and every clone refers to the same queue, so all rounds of one
/// buyer share a mailbox and pick out their own replies by template.
#[derive(Debug, Clone)]
pub struct Mailbox {
    owner: AgentAddress,
    inner: Arc<MailboxInner>,
}

#[derive(Debug, Default)]
struct MailboxInner {
    queue: Mutex<Queue>,
    arrivals: Notify,
}

#[derive(Debug, Default)]
struct Queue {
    messages: VecDeque<Message>,
    /// Most recent first.
    retired: VecDeque<MessageTemplate>,
}

impl Queue {
    fn is_retired(&self, message: &Message) -> bool {
        self.retired.iter().any(|t| t.matches(message))
    }

    fn discard(&mut self, template: &MessageTemplate) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !template.matches(m));
        before - self.messages.len()
    }
}

impl Mailbox {
    pub fn new(owner: AgentAddress) -> Self {
        Self {
            owner,
            inner: Arc::default(),
        }
    }

    /// Queues `message` and wakes waiting receivers. Replies to a retired exchange
    /// are dropped.
    pub fn deliver(&self, message: Message) {
        {
            let mut queue = self.queue();
            if queue.is_retired(&message) {
                tracing::debug!(
                    owner = %self.owner,
                    sender = %message.sender,
                    in_reply_to = ?message.in_reply_to,
                    "Dropping reply to a finished exchange"
                );
                return;
            }
            queue.messages.push_back(message);
        }
        self.inner.arrivals.notify_waiters();
    }

    /// Removes and returns the oldest message matching `template`, if any.
    ///
    /// Never waits. Non-matching messages stay queued in arrival order.
    pub fn try_receive(&self, template: &MessageTemplate) -> Option<Message> {
        let mut queue = self.queue();
        let pos = queue.messages.iter().position(|m| template.matches(m))?;
        queue.messages.remove(pos)
    }

    /// Waits until a message matching `template` is available and takes it.
    ///
    /// Cancel safe: a message is only removed from the queue when this future
    /// completes.
    pub async fn receive(&self, template: &MessageTemplate) -> Message {
        loop {
            let arrival = self.inner.arrivals.notified();
            tokio::pin!(arrival);
            // Register before checking the queue so a delivery in between is not lost.
            arrival.as_mut().enable();

            if let Some(message) = self.try_receive(template) {
                return message;
            }
            arrival.await;
        }
    }

    /// Drops every queued message matching `template`. Returns how many were dropped.
    pub fn discard(&self, template: &MessageTemplate) -> usize {
        self.queue().discard(template)
    }

    /// Discards what is queued for a finished exchange and drops matching messages
    /// delivered later on.
    ///
    /// Only the last [`RETIRED_CAPACITY`] templates are remembered.
    pub fn retire(&self, template: &MessageTemplate) -> usize {
        let mut queue = self.queue();
        if queue.retired.len() >= RETIRED_CAPACITY {
            queue.retired.pop_back();
        }
        queue.retired.push_front(template.clone());
        queue.discard(template)
    }

    pub fn len(&self) -> usize {
        self.queue().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().messages.is_empty()
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ================================================================================================
// Local Bus
// ================================================================================================

/// In-process transport routing messages to registered mailboxes.
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    mailboxes: Arc<Mutex<HashMap<AgentAddress, Mailbox>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mailbox for `address`, creating it on first registration.
    pub fn register(&self, address: AgentAddress) -> Mailbox {
        self.routes()
            .entry(address.clone())
            .or_insert_with(|| Mailbox::new(address))
            .clone()
    }

    /// Removes the route. Queued messages stay with existing mailbox handles.
    pub fn deregister(&self, address: &AgentAddress) -> bool {
        self.routes().remove(address).is_some()
    }

    pub fn is_registered(&self, address: &AgentAddress) -> bool {
        self.routes().contains_key(address)
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<AgentAddress, Mailbox>> {
        self.mailboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for LocalBus {
    /// Delivers a copy to every registered receiver.
    ///
    /// Unknown receivers are skipped. The call only fails when the message has no
    /// receivers or none of them is known.
    fn send(&self, message: Message) -> TenderResult<()> {
        let Some(first) = message.receivers.first().cloned() else {
            return Err(TransportError::NoReceivers(message.sender.clone()).into());
        };

        let targets: Vec<Mailbox> = {
            let routes = self.routes();
            message
                .receivers
                .iter()
                .filter_map(|r| {
                    let target = routes.get(r).cloned();
                    if target.is_none() {
                        tracing::debug!(receiver = %r, "Dropping message for unknown receiver");
                    }
                    target
                })
                .collect()
        };

        if targets.is_empty() {
            return Err(TransportError::UnknownReceiver(first).into());
        }

        for target in targets {
            target.deliver(message.clone());
        }
        Ok(())
    }
}
