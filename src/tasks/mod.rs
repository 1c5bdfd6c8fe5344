//! Background Tasks Module
//!
//! Contains the background task that runs for the lifetime of a cache.
//!
//! # Tasks
//! - Expiration scheduler: sleeps until the next entry is due, then sweeps

mod expiration;

pub(crate) use expiration::{spawn_expiration_task, ShutdownRequest};
