//! Error taxonomy shared by every component.

use crate::models::OptionId;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use sea_orm::DbErr;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// Malformed title or options.
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid bearer credential.
    #[error("a valid credential is required")]
    Unauthenticated,

    /// Caller is neither owner nor admin.
    #[error("you are not allowed to modify this poll")]
    Authorization,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("this poll is not accepting votes")]
    Inactive,

    #[error("that option does not belong to this poll")]
    InvalidOption,

    /// Carries the prior vote so callers can say what was chosen.
    #[error("{}", already_voted_message(.prior_option_text.as_deref()))]
    AlreadyVoted {
        prior_option_id: OptionId,
        prior_option_text: Option<String>,
    },

    /// I/O failure talking to the store. Retryable.
    #[error("store unavailable: {0}")]
    TransientStore(String),

    /// Streaming channel failed. Retryable.
    #[error("realtime channel failed: {0}")]
    Subscription(String),
}

fn already_voted_message(text: Option<&str>) -> String {
    match text {
        Some(text) => format!("you already voted for \"{}\"", text),
        None => "you already voted in this poll".to_string(),
    }
}

impl PollError {
    /// Only I/O and channel failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PollError::TransientStore(_) | PollError::Subscription(_)
        )
    }

    /// Stable machine-readable kind for response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            PollError::Validation(_) => "validation",
            PollError::Unauthenticated => "unauthenticated",
            PollError::Authorization => "forbidden",
            PollError::NotFound(_) => "not_found",
            PollError::Inactive => "inactive",
            PollError::InvalidOption => "invalid_option",
            PollError::AlreadyVoted { .. } => "already_voted",
            PollError::TransientStore(_) => "store_unavailable",
            PollError::Subscription(_) => "subscription_failed",
        }
    }
}

impl From<DbErr> for PollError {
    fn from(err: DbErr) -> Self {
        match err {
            DbErr::RecordNotFound(_) => PollError::NotFound("record"),
            other => PollError::TransientStore(other.to_string()),
        }
    }
}

impl ResponseError for PollError {
    fn status_code(&self) -> StatusCode {
        match self {
            PollError::Validation(_) => StatusCode::BAD_REQUEST,
            PollError::Unauthenticated => StatusCode::UNAUTHORIZED,
            PollError::Authorization => StatusCode::FORBIDDEN,
            PollError::NotFound(_) | PollError::InvalidOption => StatusCode::NOT_FOUND,
            PollError::Inactive | PollError::AlreadyVoted { .. } => StatusCode::CONFLICT,
            PollError::TransientStore(_) | PollError::Subscription(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            PollError::AlreadyVoted {
                prior_option_id,
                prior_option_text,
            } => json!({
                "error": self.kind(),
                "message": self.to_string(),
                "prior_option_id": prior_option_id,
                "prior_option_text": prior_option_text,
            }),
            _ => json!({
                "error": self.kind(),
                "message": self.to_string(),
            }),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}
