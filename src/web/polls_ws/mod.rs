//! Live poll WebSocket endpoint
//!
//! Client connects to `/polls.ws` with `?poll_id=`, `?owner_id=` or no query
//! (every active poll). The subscription is opened before the upgrade, so
//! authorization and missing polls surface as ordinary HTTP errors. After the
//! upgrade the client receives the snapshot and then deltas as JSON text
//! frames tagged by `"type"`.

pub mod connection;

use crate::auth::Identity;
use crate::error::PollError;
use crate::models::{PollId, UserId};
use crate::notifier::Scope;
use crate::service::LivePoll;
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;

pub use connection::PollSocket;

/// Configure live poll WebSocket routes
pub fn configure(conf: &mut web::ServiceConfig) {
    conf.service(polls_ws);
}

#[derive(Deserialize)]
pub struct ScopeQuery {
    #[serde(alias = "pollId")]
    pub poll_id: Option<PollId>,
    #[serde(alias = "ownerId")]
    pub owner_id: Option<UserId>,
}

impl ScopeQuery {
    pub fn scope(&self) -> Result<Scope, PollError> {
        match (self.poll_id, self.owner_id) {
            (Some(poll_id), None) => Ok(Scope::Poll(poll_id)),
            (None, Some(owner_id)) => Ok(Scope::Owner(owner_id)),
            (None, None) => Ok(Scope::Global),
            (Some(_), Some(_)) => Err(PollError::Validation(
                "subscribe to a poll or an owner, not both".to_string(),
            )),
        }
    }
}

/// WebSocket endpoint for live poll updates
///
/// GET /polls.ws
///
/// Anonymous viewers may watch active polls. Owner scopes and hidden polls
/// need a bearer credential with manager rights.
#[get("/polls.ws")]
pub async fn polls_ws(
    req: HttpRequest,
    stream: web::Payload,
    identity: Option<Identity>,
    query: web::Query<ScopeQuery>,
    service: web::Data<LivePoll>,
) -> Result<HttpResponse, Error> {
    let scope = query.scope()?;
    let subscription = service.notifier.subscribe(scope, identity.as_ref()).await?;

    log::debug!(
        "Socket subscribing to {:?} (user: {:?})",
        scope,
        identity.map(|i| i.user_id)
    );

    ws::start(
        PollSocket::new(subscription, service.realtime()),
        &req,
        stream,
    )
}
