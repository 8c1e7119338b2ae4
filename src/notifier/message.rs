//! Message types for the poll notifier actor

use super::{PollEvent, Scope};
use actix::prelude::*;
use futures::channel::mpsc::UnboundedSender;

/// Register a subscriber sink for a scope
pub struct Subscribe {
    pub scope: Scope,
    /// Channel the server pushes deltas into
    pub sink: UnboundedSender<PollEvent>,
}

impl Message for Subscribe {
    /// Returns subscription ID
    type Result = usize;
}

/// Release a subscription. Unknown IDs are ignored.
pub struct Unsubscribe {
    pub id: usize,
}

impl Message for Unsubscribe {
    type Result = ();
}

/// Fan a committed change out to every matching subscriber
pub struct Publish(pub PollEvent);

impl Message for Publish {
    /// Number of subscribers the event was delivered to
    type Result = usize;
}

/// Drop every sink without the clients asking, e.g. on shutdown
pub struct EvictAll;

impl Message for EvictAll {
    /// Number of subscriptions dropped
    type Result = usize;
}

/// Get count of live subscriptions (for monitoring)
pub struct GetSubscriptionCount;

impl Message for GetSubscriptionCount {
    type Result = usize;
}
