//! Live poll service.
//!
//! Three cooperating components over one durable store:
//!
//! - [`polls::PollStore`] owns poll and option lifecycle.
//! - [`votes::VoteLedger`] owns the vote-once invariant and tallies.
//! - [`notifier::ChangeNotifier`] fans poll and vote changes out to subscribers.
//!
//! [`service::LivePoll`] wires them together; [`web`] exposes them over HTTP
//! and WebSocket.

pub mod app_config;
pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod notifier;
pub mod orm;
pub mod polls;
pub mod retry;
pub mod service;
pub mod storage;
pub mod votes;
pub mod web;

pub use error::PollError;
pub use service::LivePoll;
