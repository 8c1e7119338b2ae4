//! Change notifier: fan-out of poll and vote changes to live subscribers.
//!
//! ## Architecture
//!
//! - `PollNotifierServer` actor keeps subscriber sinks indexed by poll, owner
//!   and the global scope
//! - `Subscription` is the caller-owned handle: a stream that yields a
//!   `Snapshot` first and deltas afterwards, released on drop
//! - `PollSequencer` serializes "commit + publish" per poll so deltas for one
//!   poll arrive in commit order
//! - `LiveFeed` and `PollBoard` are the client half: reconnect with backoff and
//!   an idempotent reducer over the event stream
//!
//! Delivery is at-least-once. The subscriber is registered before its snapshot
//! is read, so a delta committed in between may show up in both.

pub mod board;
pub mod feed;
pub mod message;
pub mod sequencer;
pub mod server;
pub mod subscription;

use crate::app_config::RealtimeConfig;
use crate::auth::{self, Identity};
use crate::error::PollError;
use crate::models::{OptionId, Poll, PollFilter, PollId, PollState, Tally, UserId};
use crate::retry::RetryPolicy;
use crate::storage::PollRepository;
use actix::prelude::*;
use futures::channel::mpsc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use board::PollBoard;
pub use feed::{FeedStatus, LiveFeed};
pub use sequencer::PollSequencer;
pub use server::PollNotifierServer;
pub use subscription::{Subscription, SubscriptionState};

/// What a subscription watches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Poll(PollId),
    Owner(UserId),
    /// Every active poll.
    Global,
}

/// Snapshot and delta vocabulary sent to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PollEvent {
    /// Full state of every poll in scope. Always the first event.
    Snapshot { scope: Scope, polls: Vec<PollState> },
    PollCreated { poll: Poll },
    /// Carries the tally so global viewers can render a poll they never saw.
    PollActivated { state: PollState },
    PollDeactivated { poll_id: PollId, owner_id: UserId },
    PollDeleted {
        poll_id: PollId,
        owner_id: UserId,
        was_active: bool,
    },
    /// Title or option edits.
    PollUpdated { poll: Poll },
    /// `tally` is authoritative; clients replace rather than increment.
    VoteCast {
        poll_id: PollId,
        owner_id: UserId,
        option_id: OptionId,
        tally: Tally,
    },
}

impl PollEvent {
    pub fn poll_id(&self) -> Option<PollId> {
        match self {
            PollEvent::Snapshot { .. } => None,
            PollEvent::PollCreated { poll } | PollEvent::PollUpdated { poll } => Some(poll.id),
            PollEvent::PollActivated { state } => Some(state.poll.id),
            PollEvent::PollDeactivated { poll_id, .. }
            | PollEvent::PollDeleted { poll_id, .. }
            | PollEvent::VoteCast { poll_id, .. } => Some(*poll_id),
        }
    }

    pub fn owner_id(&self) -> Option<UserId> {
        match self {
            PollEvent::Snapshot { .. } => None,
            PollEvent::PollCreated { poll } | PollEvent::PollUpdated { poll } => {
                Some(poll.owner_id)
            }
            PollEvent::PollActivated { state } => Some(state.poll.owner_id),
            PollEvent::PollDeactivated { owner_id, .. }
            | PollEvent::PollDeleted { owner_id, .. }
            | PollEvent::VoteCast { owner_id, .. } => Some(*owner_id),
        }
    }

    /// Whether the global scope may see this event. Inactive polls are not
    /// public, so their creation and edits stay with the owner.
    pub fn is_public(&self) -> bool {
        match self {
            PollEvent::Snapshot { .. } | PollEvent::PollCreated { .. } => false,
            PollEvent::PollUpdated { poll } => poll.is_active,
            PollEvent::PollDeleted { was_active, .. } => *was_active,
            PollEvent::PollActivated { .. }
            | PollEvent::PollDeactivated { .. }
            | PollEvent::VoteCast { .. } => true,
        }
    }
}

impl Scope {
    pub fn matches(&self, event: &PollEvent) -> bool {
        match self {
            Scope::Poll(id) => event.poll_id() == Some(*id),
            Scope::Owner(id) => event.owner_id() == Some(*id),
            Scope::Global => event.is_public(),
        }
    }
}

/// Facade over the notifier actor. Cheap to clone.
#[derive(Clone)]
pub struct ChangeNotifier {
    server: Addr<PollNotifierServer>,
    repo: Arc<dyn PollRepository>,
    retry: RetryPolicy,
    sequencer: PollSequencer,
}

impl ChangeNotifier {
    pub fn new(
        server: Addr<PollNotifierServer>,
        repo: Arc<dyn PollRepository>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            server,
            repo,
            retry,
            sequencer: PollSequencer::default(),
        }
    }

    /// Starts a notifier actor on the current arbiter. Needs a running actix
    /// `System`.
    pub fn start(
        repo: Arc<dyn PollRepository>,
        config: &RealtimeConfig,
        retry: RetryPolicy,
    ) -> Self {
        let server = PollNotifierServer::new(config.mailbox_capacity).start();
        Self::new(server, repo, retry)
    }

    pub fn sequencer(&self) -> &PollSequencer {
        &self.sequencer
    }

    /// Opens a subscription. The returned handle yields the snapshot first.
    ///
    /// Watching a hidden poll or another owner's scope needs manager rights.
    pub async fn subscribe(
        &self,
        scope: Scope,
        viewer: Option<&Identity>,
    ) -> Result<Subscription, PollError> {
        self.authorize(scope, viewer).await?;

        let (sink, rx) = mpsc::unbounded();
        let id = self
            .server
            .send(message::Subscribe { scope, sink })
            .await
            .map_err(|e| PollError::Subscription(e.to_string()))?;
        let mut subscription = Subscription::new(id, scope, self.server.clone(), rx);

        // Dropping `subscription` on error releases the registration.
        let polls = self.snapshot(scope, viewer).await?;
        subscription.attach_snapshot(PollEvent::Snapshot { scope, polls });

        log::debug!("Subscription {} opened for {:?}", id, scope);
        Ok(subscription)
    }

    /// Fans an event out to every matching subscriber. Delivery problems are
    /// logged, never returned: the change has already committed.
    pub async fn publish(&self, event: PollEvent) {
        match self.server.send(message::Publish(event)).await {
            Ok(delivered) => log::debug!("Event delivered to {} subscriber(s)", delivered),
            Err(e) => log::warn!("Notifier unavailable, event dropped: {}", e),
        }
    }

    /// Drops every server-side sink. Open subscriptions end in `Error`.
    pub async fn evict_all(&self) -> usize {
        self.server.send(message::EvictAll).await.unwrap_or(0)
    }

    pub async fn subscription_count(&self) -> Result<usize, PollError> {
        self.server
            .send(message::GetSubscriptionCount)
            .await
            .map_err(|e| PollError::Subscription(e.to_string()))
    }

    async fn authorize(&self, scope: Scope, viewer: Option<&Identity>) -> Result<(), PollError> {
        match scope {
            Scope::Global => Ok(()),
            Scope::Owner(owner_id) => match viewer {
                Some(identity) if identity.is_admin() || identity.user_id == owner_id => Ok(()),
                Some(_) => Err(PollError::Authorization),
                None => Err(PollError::Unauthenticated),
            },
            Scope::Poll(poll_id) => {
                let poll = self.find_poll(poll_id).await?;
                if poll.is_active || auth::can_view_hidden(viewer, &poll) {
                    Ok(())
                } else {
                    Err(PollError::NotFound("poll"))
                }
            }
        }
    }

    async fn find_poll(&self, poll_id: PollId) -> Result<Poll, PollError> {
        let repo = &self.repo;
        self.retry
            .run("load poll", || repo.find_poll(poll_id))
            .await?
            .ok_or(PollError::NotFound("poll"))
    }

    async fn snapshot(
        &self,
        scope: Scope,
        viewer: Option<&Identity>,
    ) -> Result<Vec<PollState>, PollError> {
        let repo = &self.repo;
        let polls = match scope {
            Scope::Poll(poll_id) => {
                let poll = self.find_poll(poll_id).await?;
                if !poll.is_active && !auth::can_view_hidden(viewer, &poll) {
                    return Err(PollError::NotFound("poll"));
                }
                vec![poll]
            }
            Scope::Owner(owner_id) => {
                let filter = PollFilter {
                    active_only: false,
                    owner_id: Some(owner_id),
                };
                self.retry.run("list polls", || repo.list_polls(filter)).await?
            }
            Scope::Global => {
                let filter = PollFilter {
                    active_only: true,
                    owner_id: None,
                };
                self.retry.run("list polls", || repo.list_polls(filter)).await?
            }
        };

        let mut states = Vec::with_capacity(polls.len());
        for poll in polls {
            let counts = self
                .retry
                .run("count votes", || repo.count_votes(poll.id))
                .await?;
            let tally = Tally::from_counts(&poll.options, &counts);
            states.push(PollState { poll, tally });
        }
        Ok(states)
    }
}
