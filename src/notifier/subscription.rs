//! Caller-owned subscription handle.

use super::message::Unsubscribe;
use super::server::PollNotifierServer;
use super::{PollEvent, Scope};
use actix::Addr;
use futures::channel::mpsc::UnboundedReceiver;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Lifecycle of a subscription: `Connecting -> Subscribed -> (Closed | Error)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Subscribed,
    /// Released by the owner.
    Closed,
    /// The server dropped the sink. The owner should subscribe again.
    Error,
}

/// A live view of one scope.
///
/// Yields the `Snapshot` first, then deltas. The server-side registration is
/// released by [`Subscription::unsubscribe`] or when the handle is dropped,
/// whichever comes first.
pub struct Subscription {
    id: usize,
    scope: Scope,
    server: Addr<PollNotifierServer>,
    rx: UnboundedReceiver<PollEvent>,
    snapshot: Option<PollEvent>,
    state: SubscriptionState,
    released: bool,
}

impl Subscription {
    pub(super) fn new(
        id: usize,
        scope: Scope,
        server: Addr<PollNotifierServer>,
        rx: UnboundedReceiver<PollEvent>,
    ) -> Self {
        Self {
            id,
            scope,
            server,
            rx,
            snapshot: None,
            state: SubscriptionState::Connecting,
            released: false,
        }
    }

    pub(super) fn attach_snapshot(&mut self, snapshot: PollEvent) {
        self.snapshot = Some(snapshot);
        self.state = SubscriptionState::Subscribed;
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Releases the server-side registration. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.state = SubscriptionState::Closed;
        self.snapshot = None;
        self.rx.close();
        self.server.do_send(Unsubscribe { id: self.id });
        log::debug!("Subscription {} closed", self.id);
    }

    /// Next event, or `None` once closed or failed.
    pub async fn next_event(&mut self) -> Option<PollEvent> {
        self.next().await
    }
}

impl Stream for Subscription {
    type Item = PollEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<PollEvent>> {
        match self.state {
            SubscriptionState::Closed | SubscriptionState::Error => return Poll::Ready(None),
            SubscriptionState::Connecting | SubscriptionState::Subscribed => {}
        }

        if let Some(snapshot) = self.snapshot.take() {
            return Poll::Ready(Some(snapshot));
        }

        match self.rx.poll_next_unpin(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(event)),
            Poll::Ready(None) => {
                log::warn!("Subscription {} lost its server-side sink", self.id);
                self.state = SubscriptionState::Error;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
