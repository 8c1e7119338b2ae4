//! Postgres storage backend.
//!
//! Relies on `migrations/0001_live_polls.sql`, in particular the
//! `votes_one_per_voter` unique constraint.

use super::{PollRepository, VoteInsert};
use crate::error::PollError;
use crate::models::{
    NewPoll, OptionChanges, OptionId, Poll, PollFilter, PollId, PollOption, UserId, Vote,
};
use crate::orm::{poll_options, polls, votes};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    entity::*, query::*, sea_query::Expr, ConnectionTrait, DatabaseConnection, DbBackend,
    FromQueryResult, Statement, TransactionTrait,
};
use std::collections::HashMap;

/// Conditional insert: no row is produced when the poll is missing or
/// inactive, when the option is not one of its options, or when the voter
/// already has a row for this poll.
const INSERT_VOTE_SQL: &str = r#"
INSERT INTO votes (poll_id, option_id, voter_id)
SELECT $1, $2, $3
WHERE EXISTS (SELECT 1 FROM polls WHERE id = $1 AND is_active)
  AND EXISTS (SELECT 1 FROM poll_options WHERE id = $2 AND poll_id = $1)
ON CONFLICT ON CONSTRAINT votes_one_per_voter DO NOTHING
RETURNING id
"#;

#[derive(Debug, FromQueryResult)]
struct OptionCount {
    option_id: i32,
    count: i64,
}

pub struct PostgresStore {
    db: DatabaseConnection,
}

impl PostgresStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn options_for<C: ConnectionTrait>(
        db: &C,
        poll_ids: Vec<PollId>,
    ) -> Result<HashMap<PollId, Vec<PollOption>>, PollError> {
        let mut by_poll: HashMap<PollId, Vec<PollOption>> = HashMap::new();
        if poll_ids.is_empty() {
            return Ok(by_poll);
        }

        let rows = poll_options::Entity::find()
            .filter(poll_options::Column::PollId.is_in(poll_ids))
            .order_by_asc(poll_options::Column::Id)
            .all(db)
            .await?;

        for row in rows {
            by_poll.entry(row.poll_id).or_default().push(PollOption {
                id: row.id,
                poll_id: row.poll_id,
                text: row.option_text,
            });
        }
        Ok(by_poll)
    }

    async fn load<C: ConnectionTrait>(db: &C, id: PollId) -> Result<Option<Poll>, PollError> {
        let row = match polls::Entity::find_by_id(id).one(db).await? {
            Some(row) => row,
            None => return Ok(None),
        };
        let mut options = Self::options_for(db, vec![id]).await?;
        Ok(Some(to_poll(row, options.remove(&id).unwrap_or_default())))
    }
}

fn to_poll(row: polls::Model, options: Vec<PollOption>) -> Poll {
    Poll {
        id: row.id,
        title: row.title,
        owner_id: row.owner_id,
        is_active: row.is_active,
        created_at: row.created_at,
        updated_at: row.updated_at,
        options,
    }
}

#[async_trait]
impl PollRepository for PostgresStore {
    async fn insert_poll(&self, new: NewPoll) -> Result<Poll, PollError> {
        let now = Utc::now().naive_utc();
        // Dropping the transaction without commit rolls it back, so a failed
        // option insert never leaves a poll without options.
        let txn = self.db.begin().await?;

        let row = polls::ActiveModel {
            title: Set(new.title),
            owner_id: Set(new.owner_id),
            is_active: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut options = Vec::with_capacity(new.options.len());
        for text in new.options {
            let option = poll_options::ActiveModel {
                poll_id: Set(row.id),
                option_text: Set(text),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            options.push(PollOption {
                id: option.id,
                poll_id: option.poll_id,
                text: option.option_text,
            });
        }

        txn.commit().await?;
        Ok(to_poll(row, options))
    }

    async fn find_poll(&self, id: PollId) -> Result<Option<Poll>, PollError> {
        Self::load(&self.db, id).await
    }

    async fn list_polls(&self, filter: PollFilter) -> Result<Vec<Poll>, PollError> {
        let mut query = polls::Entity::find();
        if filter.active_only {
            query = query.filter(polls::Column::IsActive.eq(true));
        }
        if let Some(owner_id) = filter.owner_id {
            query = query.filter(polls::Column::OwnerId.eq(owner_id));
        }
        let rows = query
            .order_by_desc(polls::Column::CreatedAt)
            .order_by_desc(polls::Column::Id)
            .all(&self.db)
            .await?;

        let mut options = Self::options_for(&self.db, rows.iter().map(|r| r.id).collect()).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let opts = options.remove(&row.id).unwrap_or_default();
                to_poll(row, opts)
            })
            .collect())
    }

    async fn set_active(&self, id: PollId, active: bool) -> Result<Option<Poll>, PollError> {
        let result = polls::Entity::update_many()
            .col_expr(polls::Column::IsActive, Expr::value(active))
            .col_expr(polls::Column::UpdatedAt, Expr::value(Utc::now().naive_utc()))
            .filter(polls::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Ok(None);
        }
        Self::load(&self.db, id).await
    }

    async fn update_title(&self, id: PollId, title: String) -> Result<Option<Poll>, PollError> {
        let result = polls::Entity::update_many()
            .col_expr(polls::Column::Title, Expr::value(title))
            .col_expr(polls::Column::UpdatedAt, Expr::value(Utc::now().naive_utc()))
            .filter(polls::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Ok(None);
        }
        Self::load(&self.db, id).await
    }

    async fn apply_option_changes(
        &self,
        id: PollId,
        changes: OptionChanges,
    ) -> Result<Option<Poll>, PollError> {
        let txn = self.db.begin().await?;

        if polls::Entity::find_by_id(id).one(&txn).await?.is_none() {
            return Ok(None);
        }

        if !changes.remove.is_empty() {
            poll_options::Entity::delete_many()
                .filter(poll_options::Column::PollId.eq(id))
                .filter(poll_options::Column::Id.is_in(changes.remove))
                .exec(&txn)
                .await?;
        }

        for (option_id, text) in changes.update {
            poll_options::Entity::update_many()
                .col_expr(poll_options::Column::OptionText, Expr::value(text))
                .filter(poll_options::Column::PollId.eq(id))
                .filter(poll_options::Column::Id.eq(option_id))
                .exec(&txn)
                .await?;
        }

        for text in changes.insert {
            poll_options::ActiveModel {
                poll_id: Set(id),
                option_text: Set(text),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
        }

        polls::Entity::update_many()
            .col_expr(polls::Column::UpdatedAt, Expr::value(Utc::now().naive_utc()))
            .filter(polls::Column::Id.eq(id))
            .exec(&txn)
            .await?;

        let poll = Self::load(&txn, id).await?;
        txn.commit().await?;
        Ok(poll)
    }

    async fn delete_poll(&self, id: PollId) -> Result<bool, PollError> {
        // Options and votes go with the poll through ON DELETE CASCADE.
        let result = polls::Entity::delete_many()
            .filter(polls::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn insert_vote(
        &self,
        poll_id: PollId,
        option_id: OptionId,
        voter_id: UserId,
    ) -> Result<VoteInsert, PollError> {
        let inserted = self
            .db
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                INSERT_VOTE_SQL,
                vec![poll_id.into(), option_id.into(), voter_id.into()],
            ))
            .await?;

        if let Some(row) = inserted {
            let id: i32 = row.try_get("", "id")?;
            return Ok(VoteInsert::Inserted(Vote {
                id,
                poll_id,
                option_id,
                voter_id,
            }));
        }

        // Nothing inserted: work out which guard stopped it, in the order the
        // ledger reports them. The statement decided; these reads only explain.
        match polls::Entity::find_by_id(poll_id).one(&self.db).await? {
            None => return Ok(VoteInsert::PollMissing),
            Some(poll) if !poll.is_active => return Ok(VoteInsert::PollInactive),
            Some(_) => {}
        }
        let option = poll_options::Entity::find_by_id(option_id)
            .filter(poll_options::Column::PollId.eq(poll_id))
            .one(&self.db)
            .await?;
        if option.is_none() {
            return Ok(VoteInsert::OptionMissing);
        }
        match self.find_vote(poll_id, voter_id).await? {
            Some(prior) => Ok(VoteInsert::Duplicate {
                prior_option_id: prior.option_id,
            }),
            None => Err(PollError::TransientStore(
                "vote insert skipped but no guard explains it".to_string(),
            )),
        }
    }

    async fn find_vote(
        &self,
        poll_id: PollId,
        voter_id: UserId,
    ) -> Result<Option<Vote>, PollError> {
        let row = votes::Entity::find()
            .filter(votes::Column::PollId.eq(poll_id))
            .filter(votes::Column::VoterId.eq(voter_id))
            .one(&self.db)
            .await?;
        Ok(row.map(|v| Vote {
            id: v.id,
            poll_id: v.poll_id,
            option_id: v.option_id,
            voter_id: v.voter_id,
        }))
    }

    async fn count_votes(&self, poll_id: PollId) -> Result<Vec<(OptionId, u64)>, PollError> {
        let rows = votes::Entity::find()
            .select_only()
            .column(votes::Column::OptionId)
            .column_as(Expr::col(votes::Column::Id).count(), "count")
            .filter(votes::Column::PollId.eq(poll_id))
            .group_by(votes::Column::OptionId)
            .into_model::<OptionCount>()
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.option_id, r.count.max(0) as u64))
            .collect())
    }
}
