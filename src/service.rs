//! Wiring of the three components over one repository.

use crate::app_config::{AppConfig, RealtimeConfig};
use crate::auth::Identity;
use crate::notifier::{ChangeNotifier, LiveFeed, PollNotifierServer, Scope};
use crate::polls::PollStore;
use crate::retry::RetryPolicy;
use crate::storage::PollRepository;
use crate::votes::VoteLedger;
use actix::{Actor, Addr};
use std::sync::Arc;

/// Shared application state handed to every request handler.
#[derive(Clone)]
pub struct LivePoll {
    pub polls: PollStore,
    pub votes: VoteLedger,
    pub notifier: ChangeNotifier,
    realtime: RealtimeConfig,
    reconnect: RetryPolicy,
}

impl LivePoll {
    /// Builds the service around an already running notifier actor.
    pub fn new(
        repo: Arc<dyn PollRepository>,
        config: &AppConfig,
        server: Addr<PollNotifierServer>,
    ) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        let notifier = ChangeNotifier::new(server, repo.clone(), retry);
        Self {
            polls: PollStore::new(repo.clone(), notifier.clone(), retry, config.limits.clone()),
            votes: VoteLedger::new(repo, notifier.clone(), retry),
            notifier,
            realtime: config.realtime.clone(),
            reconnect: RetryPolicy::reconnect(&config.realtime),
        }
    }

    /// Starts a notifier actor on the current arbiter and builds the service.
    pub fn start(repo: Arc<dyn PollRepository>, config: &AppConfig) -> Self {
        let server = PollNotifierServer::new(config.realtime.mailbox_capacity).start();
        Self::new(repo, config, server)
    }

    /// Heartbeat and timeout settings for live sockets.
    pub fn realtime(&self) -> &RealtimeConfig {
        &self.realtime
    }

    /// In-process live feed using the configured reconnect policy.
    pub fn live_feed(&self, scope: Scope, viewer: Option<Identity>) -> LiveFeed {
        LiveFeed::new(self.notifier.clone(), scope, viewer, self.reconnect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[actix_rt::test]
    async fn test_components_take_their_config_sections() {
        let mut config = AppConfig::default();
        config.realtime.client_timeout_secs = 90;
        config.realtime.reconnect_attempts = 5;

        let service = LivePoll::start(Arc::new(MemoryStore::new()), &config);

        assert_eq!(service.realtime().client_timeout_secs, 90);
        assert_eq!(service.reconnect.max_attempts, 5);
        assert_eq!(
            service.live_feed(Scope::Global, None).status().label(),
            "CONNECTING"
        );
    }
}
