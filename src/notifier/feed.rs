//! Client-side subscription with bounded reconnect.

use super::{ChangeNotifier, PollEvent, Scope, Subscription, SubscriptionState};
use crate::auth::Identity;
use crate::retry::RetryPolicy;
use futures::channel::mpsc;

/// What a viewer should be told about the realtime channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedStatus {
    Connecting,
    Live,
    /// `attempt` counts failed attempts in the current outage.
    Reconnecting { attempt: u32 },
    /// Retries exhausted or a terminal error. No further events arrive.
    Degraded { reason: String },
    /// Closed by the owner.
    Closed,
}

impl FeedStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, FeedStatus::Live)
    }

    /// Badge text for viewers. Only `Live` ever claims to be live.
    pub fn label(&self) -> &'static str {
        match self {
            FeedStatus::Connecting => "CONNECTING",
            FeedStatus::Live => "LIVE",
            FeedStatus::Reconnecting { .. } => "RECONNECTING",
            FeedStatus::Degraded { .. } => "REALTIME UNAVAILABLE",
            FeedStatus::Closed => "OFFLINE",
        }
    }
}

/// Keeps one scope subscribed, re-subscribing with exponential backoff when
/// the channel fails. Every successful (re)connect yields a fresh snapshot.
pub struct LiveFeed {
    notifier: ChangeNotifier,
    scope: Scope,
    viewer: Option<Identity>,
    policy: RetryPolicy,
    status: FeedStatus,
    current: Option<Subscription>,
    listeners: Vec<mpsc::UnboundedSender<FeedStatus>>,
}

impl LiveFeed {
    pub fn new(
        notifier: ChangeNotifier,
        scope: Scope,
        viewer: Option<Identity>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            notifier,
            scope,
            viewer,
            policy,
            status: FeedStatus::Connecting,
            current: None,
            listeners: Vec::new(),
        }
    }

    pub fn status(&self) -> &FeedStatus {
        &self.status
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Every later status change, in order. Drives a viewer's badge.
    pub fn status_changes(&mut self) -> mpsc::UnboundedReceiver<FeedStatus> {
        let (tx, rx) = mpsc::unbounded();
        self.listeners.push(tx);
        rx
    }

    fn set_status(&mut self, status: FeedStatus) {
        if self.status == status {
            return;
        }
        self.listeners
            .retain(|listener| listener.unbounded_send(status.clone()).is_ok());
        self.status = status;
    }

    /// Next event, reconnecting as needed. `None` once degraded or closed.
    pub async fn next_event(&mut self) -> Option<PollEvent> {
        loop {
            if matches!(self.status, FeedStatus::Degraded { .. } | FeedStatus::Closed) {
                return None;
            }

            let subscription = match self.current.as_mut() {
                Some(subscription) => subscription,
                None => {
                    let reconnecting = matches!(self.status, FeedStatus::Reconnecting { .. });
                    self.connect(reconnecting).await;
                    continue;
                }
            };

            if let Some(event) = subscription.next_event().await {
                return Some(event);
            }

            if subscription.state() == SubscriptionState::Closed {
                self.set_status(FeedStatus::Closed);
                return None;
            }

            log::warn!("Live feed for {:?} lost its subscription", self.scope);
            self.current = None;
            self.set_status(FeedStatus::Reconnecting { attempt: 0 });
        }
    }

    /// Stops the feed and releases its subscription.
    pub fn close(&mut self) {
        if let Some(mut subscription) = self.current.take() {
            subscription.unsubscribe();
        }
        self.set_status(FeedStatus::Closed);
    }

    async fn connect(&mut self, reconnecting: bool) {
        let mut attempt = 0;
        loop {
            if reconnecting || attempt > 0 {
                actix_web::rt::time::sleep(self.policy.delay_for(attempt.max(1))).await;
            }

            match self.notifier.subscribe(self.scope, self.viewer.as_ref()).await {
                Ok(subscription) => {
                    self.current = Some(subscription);
                    self.set_status(FeedStatus::Live);
                    return;
                }
                Err(err) if err.is_retryable() && attempt + 1 < self.policy.max_attempts => {
                    attempt += 1;
                    log::warn!(
                        "Subscribing to {:?} failed (attempt {}/{}): {}",
                        self.scope,
                        attempt,
                        self.policy.max_attempts,
                        err
                    );
                    self.set_status(FeedStatus::Reconnecting { attempt });
                }
                Err(err) => {
                    log::warn!("Live feed for {:?} degraded: {}", self.scope, err);
                    self.set_status(FeedStatus::Degraded {
                        reason: err.to_string(),
                    });
                    return;
                }
            }
        }
    }
}
