//! Poll and vote endpoints

use crate::auth::Identity;
use crate::error::PollError;
use crate::models::{OptionId, Poll, PollId, PollPatch, Tally, UserId};
use crate::service::LivePoll;
use actix_web::{delete, get, patch, post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub(super) fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(create_poll)
        .service(list_polls)
        .service(view_poll)
        .service(update_poll)
        .service(delete_poll)
        .service(vote_on_poll);
}

#[derive(Deserialize)]
pub struct CreatePollRequest {
    pub title: String,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub active: Option<bool>,
    #[serde(alias = "ownerId")]
    pub owner_id: Option<UserId>,
}

#[derive(Deserialize)]
pub struct VoteRequest {
    #[serde(alias = "optionId")]
    pub option_id: OptionId,
}

#[derive(Serialize)]
pub struct PollDetail {
    pub poll: Poll,
    pub tally: Tally,
    /// Only present for authenticated callers who voted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_vote: Option<OptionId>,
}

#[post("/polls")]
pub async fn create_poll(
    identity: Identity,
    service: web::Data<LivePoll>,
    body: web::Json<CreatePollRequest>,
) -> Result<impl Responder, PollError> {
    let body = body.into_inner();
    let poll = service
        .polls
        .create_poll(&identity, &body.title, body.options)
        .await?;

    Ok(HttpResponse::Created().json(json!({ "id": poll.id })))
}

/// `active=false` lists one owner's polls including hidden ones, so it needs
/// `owner_id` and manager rights.
#[get("/polls")]
pub async fn list_polls(
    identity: Option<Identity>,
    service: web::Data<LivePoll>,
    query: web::Query<ListQuery>,
) -> Result<impl Responder, PollError> {
    let polls = match (query.active.unwrap_or(true), query.owner_id) {
        (true, owner_id) => service.polls.list_active_polls(owner_id).await?,
        (false, Some(owner_id)) => {
            let identity = identity.ok_or(PollError::Unauthenticated)?;
            service.polls.list_polls_for(&identity, owner_id).await?
        }
        (false, None) => {
            return Err(PollError::Validation(
                "owner_id is required when listing inactive polls".to_string(),
            ))
        }
    };

    Ok(HttpResponse::Ok().json(polls))
}

#[get("/polls/{poll_id}")]
pub async fn view_poll(
    identity: Option<Identity>,
    service: web::Data<LivePoll>,
    path: web::Path<PollId>,
) -> Result<impl Responder, PollError> {
    let poll_id = path.into_inner();
    let poll = service.polls.get_poll(poll_id, identity.as_ref()).await?;
    let tally = service.votes.tally(poll_id).await?;
    let my_vote = match identity {
        Some(identity) => service.votes.vote_of(poll_id, identity.user_id).await?,
        None => None,
    };

    Ok(HttpResponse::Ok().json(PollDetail {
        poll,
        tally,
        my_vote,
    }))
}

/// Title, options and `is_active` in one body. Nothing is written unless the
/// whole patch is valid for this caller.
#[patch("/polls/{poll_id}")]
pub async fn update_poll(
    identity: Identity,
    service: web::Data<LivePoll>,
    path: web::Path<PollId>,
    body: web::Json<PollPatch>,
) -> Result<impl Responder, PollError> {
    let poll = service
        .polls
        .update_poll(path.into_inner(), &identity, body.into_inner())
        .await?;

    Ok(HttpResponse::Ok().json(poll))
}

#[delete("/polls/{poll_id}")]
pub async fn delete_poll(
    identity: Identity,
    service: web::Data<LivePoll>,
    path: web::Path<PollId>,
) -> Result<impl Responder, PollError> {
    service
        .polls
        .delete_poll(path.into_inner(), &identity)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/polls/{poll_id}/vote")]
pub async fn vote_on_poll(
    identity: Identity,
    service: web::Data<LivePoll>,
    path: web::Path<PollId>,
    body: web::Json<VoteRequest>,
) -> Result<impl Responder, PollError> {
    let receipt = service
        .votes
        .cast_vote(path.into_inner(), body.option_id, identity.user_id)
        .await?;

    Ok(HttpResponse::Created().json(receipt))
}
