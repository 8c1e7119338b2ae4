//! PollNotifierServer actor for managing live poll subscriptions
//!
//! This actor keeps one sink per subscription and indexes it by the scope the
//! subscriber asked for, so a published event only touches the subscribers
//! that care about it.

use super::message::{EvictAll, GetSubscriptionCount, Publish, Subscribe, Unsubscribe};
use super::{PollEvent, Scope};
use crate::models::{PollId, UserId};
use actix::prelude::*;
use futures::channel::mpsc::UnboundedSender;
use std::collections::{HashMap, HashSet};

/// Stored subscriber information
struct Subscriber {
    scope: Scope,
    /// Channel to push events to this subscription
    sink: UnboundedSender<PollEvent>,
}

/// PollNotifierServer fans committed poll changes out to subscribers
pub struct PollNotifierServer {
    /// Subscription ID counter
    next_id: usize,
    mailbox_capacity: usize,
    /// Subscription ID -> Subscriber
    subscribers: HashMap<usize, Subscriber>,
    by_poll: HashMap<PollId, HashSet<usize>>,
    by_owner: HashMap<UserId, HashSet<usize>>,
    global: HashSet<usize>,
}

impl PollNotifierServer {
    pub fn new(mailbox_capacity: usize) -> Self {
        log::info!("PollNotifierServer starting up.");
        Self {
            next_id: 0,
            mailbox_capacity,
            subscribers: HashMap::new(),
            by_poll: HashMap::new(),
            by_owner: HashMap::new(),
            global: HashSet::new(),
        }
    }

    fn index_mut(&mut self, scope: Scope) -> &mut HashSet<usize> {
        match scope {
            Scope::Poll(id) => self.by_poll.entry(id).or_default(),
            Scope::Owner(id) => self.by_owner.entry(id).or_default(),
            Scope::Global => &mut self.global,
        }
    }

    fn remove(&mut self, id: usize) -> bool {
        let subscriber = match self.subscribers.remove(&id) {
            Some(subscriber) => subscriber,
            None => return false,
        };

        match subscriber.scope {
            Scope::Poll(poll_id) => {
                if let Some(ids) = self.by_poll.get_mut(&poll_id) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.by_poll.remove(&poll_id);
                    }
                }
            }
            Scope::Owner(owner_id) => {
                if let Some(ids) = self.by_owner.get_mut(&owner_id) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.by_owner.remove(&owner_id);
                    }
                }
            }
            Scope::Global => {
                self.global.remove(&id);
            }
        }
        true
    }

    /// Subscription IDs an event must reach.
    fn recipients(&self, event: &PollEvent) -> Vec<usize> {
        let mut ids = Vec::new();
        if let Some(ids_for_poll) = event.poll_id().and_then(|id| self.by_poll.get(&id)) {
            ids.extend(ids_for_poll.iter().copied());
        }
        if let Some(ids_for_owner) = event.owner_id().and_then(|id| self.by_owner.get(&id)) {
            ids.extend(ids_for_owner.iter().copied());
        }
        if event.is_public() {
            ids.extend(self.global.iter().copied());
        }
        ids
    }
}

impl Default for PollNotifierServer {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Actor for PollNotifierServer {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.set_mailbox_capacity(self.mailbox_capacity);
        log::info!("PollNotifierServer started");
    }
}

/// Handle new subscriptions
impl Handler<Subscribe> for PollNotifierServer {
    type Result = usize;

    fn handle(&mut self, msg: Subscribe, _: &mut Context<Self>) -> Self::Result {
        let id = self.next_id;
        self.next_id += 1;

        self.subscribers.insert(
            id,
            Subscriber {
                scope: msg.scope,
                sink: msg.sink,
            },
        );
        self.index_mut(msg.scope).insert(id);

        log::debug!(
            "Subscription {} registered for {:?} (total subscriptions: {})",
            id,
            msg.scope,
            self.subscribers.len()
        );

        id
    }
}

/// Handle releases; a second release of the same ID is a no-op
impl Handler<Unsubscribe> for PollNotifierServer {
    type Result = ();

    fn handle(&mut self, msg: Unsubscribe, _: &mut Context<Self>) {
        if self.remove(msg.id) {
            log::debug!(
                "Subscription {} released (total subscriptions: {})",
                msg.id,
                self.subscribers.len()
            );
        }
    }
}

/// Handle event fan-out
impl Handler<Publish> for PollNotifierServer {
    type Result = usize;

    fn handle(&mut self, msg: Publish, _: &mut Context<Self>) -> Self::Result {
        let event = msg.0;
        let mut delivered = 0;
        let mut dead = Vec::new();

        for id in self.recipients(&event) {
            if let Some(subscriber) = self.subscribers.get(&id) {
                if subscriber.sink.unbounded_send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(id);
                }
            }
        }

        for id in dead {
            log::warn!("Dropping dead subscription {}", id);
            self.remove(id);
        }

        delivered
    }
}

/// Drop every sink; receivers observe a closed channel
impl Handler<EvictAll> for PollNotifierServer {
    type Result = usize;

    fn handle(&mut self, _: EvictAll, _: &mut Context<Self>) -> Self::Result {
        let count = self.subscribers.len();
        self.subscribers.clear();
        self.by_poll.clear();
        self.by_owner.clear();
        self.global.clear();
        log::info!("Evicted {} subscription(s)", count);
        count
    }
}

/// Get subscription count (for monitoring)
impl Handler<GetSubscriptionCount> for PollNotifierServer {
    type Result = usize;

    fn handle(&mut self, _: GetSubscriptionCount, _: &mut Context<Self>) -> Self::Result {
        self.subscribers.len()
    }
}
