//! Durable store abstraction for polls, options and votes.
//!
//! Supports multiple backends:
//! - `postgres`: relational store through sea-orm
//! - `memory`: process-local maps, for tests and single-node demos
//!
//! Every backend must make `insert_vote` a single atomic operation: the
//! one-vote-per-voter rule is enforced here and nowhere else.

pub mod memory;
pub mod postgres;

use crate::error::PollError;
use crate::models::{
    NewPoll, OptionChanges, OptionId, Poll, PollFilter, PollId, UserId, Vote,
};
use async_trait::async_trait;
use std::sync::Arc;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Outcome of an atomic vote insert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteInsert {
    Inserted(Vote),
    /// The `(poll_id, voter_id)` constraint rejected the row.
    Duplicate { prior_option_id: OptionId },
    PollInactive,
    PollMissing,
    /// The option is not (or no longer) one of the poll's options.
    OptionMissing,
}

/// Trait for poll storage backends.
#[async_trait]
pub trait PollRepository: Send + Sync {
    /// Insert a poll and its options in one transaction.
    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll, PollError>;

    async fn find_poll(&self, id: PollId) -> Result<Option<Poll>, PollError>;

    /// Newest first.
    async fn list_polls(&self, filter: PollFilter) -> Result<Vec<Poll>, PollError>;

    /// Returns the updated poll, or `None` if it does not exist.
    async fn set_active(&self, id: PollId, active: bool) -> Result<Option<Poll>, PollError>;

    async fn update_title(&self, id: PollId, title: String) -> Result<Option<Poll>, PollError>;

    /// Apply option updates, inserts and removals atomically. Votes are never
    /// touched.
    async fn apply_option_changes(
        &self,
        id: PollId,
        changes: OptionChanges,
    ) -> Result<Option<Poll>, PollError>;

    /// Removes the poll with its options and votes. `false` if it did not exist.
    async fn delete_poll(&self, id: PollId) -> Result<bool, PollError>;

    /// Insert a vote if the poll exists, is active, still has the option and
    /// the voter has not voted. Guards are reported in that order.
    async fn insert_vote(
        &self,
        poll_id: PollId,
        option_id: OptionId,
        voter_id: UserId,
    ) -> Result<VoteInsert, PollError>;

    async fn find_vote(&self, poll_id: PollId, voter_id: UserId)
        -> Result<Option<Vote>, PollError>;

    /// Raw vote counts grouped by option, including removed options.
    async fn count_votes(&self, poll_id: PollId) -> Result<Vec<(OptionId, u64)>, PollError>;
}

/// Builds the backend named in the storage config.
pub fn create_repository(
    backend: &str,
    db: Option<sea_orm::DatabaseConnection>,
) -> Result<Arc<dyn PollRepository>, PollError> {
    match (backend, db) {
        ("memory", _) => {
            log::info!("Using in-memory poll storage");
            Ok(Arc::new(MemoryStore::new()))
        }
        ("postgres", Some(db)) => {
            log::info!("Using postgres poll storage");
            Ok(Arc::new(PostgresStore::new(db)))
        }
        ("postgres", None) => Err(PollError::TransientStore(
            "postgres backend selected but no database connection".to_string(),
        )),
        (other, _) => Err(PollError::Validation(format!(
            "unknown storage backend \"{}\"",
            other
        ))),
    }
}
