//! SeaORM entities for the durable store.

pub mod poll_options;
pub mod polls;
pub mod votes;
