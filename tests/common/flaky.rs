//! Repository wrapper that injects transient store failures
#![allow(dead_code)]

use async_trait::async_trait;
use livepoll::models::{NewPoll, OptionChanges, OptionId, Poll, PollFilter, PollId, UserId, Vote};
use livepoll::storage::{MemoryStore, PollRepository, VoteInsert};
use livepoll::PollError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

fn outage(what: &str) -> PollError {
    PollError::TransientStore(format!("{} timed out", what))
}

/// Delegates to a `MemoryStore` unless one of the failure switches is on.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_counts_after_vote: AtomicBool,
    voted: AtomicBool,
    list_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    /// `find_poll` and `list_polls` fail while set.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// `count_votes` fails once any vote has been inserted.
    pub fn fail_counts_after_vote(&self) {
        self.fail_counts_after_vote.store(true, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn reads_down(&self) -> bool {
        self.fail_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PollRepository for FlakyStore {
    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll, PollError> {
        self.inner.insert_poll(poll).await
    }

    async fn find_poll(&self, id: PollId) -> Result<Option<Poll>, PollError> {
        if self.reads_down() {
            return Err(outage("find poll"));
        }
        self.inner.find_poll(id).await
    }

    async fn list_polls(&self, filter: PollFilter) -> Result<Vec<Poll>, PollError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.reads_down() {
            return Err(outage("list polls"));
        }
        self.inner.list_polls(filter).await
    }

    async fn set_active(&self, id: PollId, active: bool) -> Result<Option<Poll>, PollError> {
        self.inner.set_active(id, active).await
    }

    async fn update_title(&self, id: PollId, title: String) -> Result<Option<Poll>, PollError> {
        self.inner.update_title(id, title).await
    }

    async fn apply_option_changes(
        &self,
        id: PollId,
        changes: OptionChanges,
    ) -> Result<Option<Poll>, PollError> {
        self.inner.apply_option_changes(id, changes).await
    }

    async fn delete_poll(&self, id: PollId) -> Result<bool, PollError> {
        self.inner.delete_poll(id).await
    }

    async fn insert_vote(
        &self,
        poll_id: PollId,
        option_id: OptionId,
        voter_id: UserId,
    ) -> Result<VoteInsert, PollError> {
        let result = self.inner.insert_vote(poll_id, option_id, voter_id).await;
        if matches!(result, Ok(VoteInsert::Inserted(_))) {
            self.voted.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn find_vote(
        &self,
        poll_id: PollId,
        voter_id: UserId,
    ) -> Result<Option<Vote>, PollError> {
        self.inner.find_vote(poll_id, voter_id).await
    }

    async fn count_votes(&self, poll_id: PollId) -> Result<Vec<(OptionId, u64)>, PollError> {
        if self.fail_counts_after_vote.load(Ordering::SeqCst) && self.voted.load(Ordering::SeqCst) {
            return Err(outage("count votes"));
        }
        self.inner.count_votes(poll_id).await
    }
}
