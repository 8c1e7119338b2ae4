//! Test fixtures for building services and polls
#![allow(dead_code)]

use super::flaky::FlakyStore;
use livepoll::app_config::AppConfig;
use livepoll::auth::{Identity, IdentityProvider, JwtIdentityProvider};
use livepoll::models::{OptionId, Poll};
use livepoll::retry::RetryPolicy;
use livepoll::storage::{MemoryStore, PollRepository};
use livepoll::LivePoll;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_SECRET: &[u8] = b"livepoll-test-secret-0123456789abcdef";

/// Memory-backed service with a fresh notifier actor. Needs an actix System,
/// which `#[actix_rt::test]` provides.
pub fn memory_service() -> (LivePoll, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let repo: Arc<dyn PollRepository> = store.clone();
    (LivePoll::start(repo, &AppConfig::default()), store)
}

/// Service over a `FlakyStore`. Store calls get a single attempt, so every
/// injected failure surfaces once per call.
pub fn flaky_service() -> (LivePoll, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::new());
    let repo: Arc<dyn PollRepository> = store.clone();
    let mut config = AppConfig::default();
    config.retry.max_attempts = 1;
    (LivePoll::start(repo, &config), store)
}

pub fn identity_provider() -> Arc<dyn IdentityProvider> {
    Arc::new(JwtIdentityProvider::new(TEST_SECRET, 5))
}

/// Bearer header value for the given identity
pub fn bearer(identity: &Identity) -> String {
    let token = JwtIdentityProvider::new(TEST_SECRET, 5)
        .issue(identity)
        .expect("Failed to issue test token");
    format!("Bearer {}", token)
}

/// Fast reconnect policy so feed tests do not sleep for long.
pub fn quick_reconnect(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    }
}

/// Create a poll owned by `owner` and optionally activate it.
pub async fn create_test_poll(
    service: &LivePoll,
    owner: &Identity,
    title: &str,
    options: &[&str],
    active: bool,
) -> Poll {
    let poll = service
        .polls
        .create_poll(owner, title, options.iter().map(|s| s.to_string()).collect())
        .await
        .expect("Failed to create poll");

    if active {
        service
            .polls
            .set_active(poll.id, owner, true)
            .await
            .expect("Failed to activate poll")
    } else {
        poll
    }
}

/// Look up an option id by its text
pub fn option_id(poll: &Poll, text: &str) -> OptionId {
    poll.options
        .iter()
        .find(|o| o.text == text)
        .map(|o| o.id)
        .unwrap_or_else(|| panic!("Poll {} has no option {:?}", poll.id, text))
}
