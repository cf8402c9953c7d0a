//! saucer: find where a picture comes from.
//!
//! A request flows cache → coalescer → quota → provider chain, and the
//! result is cached and fanned out to everyone who asked for the same
//! picture while it was in flight.

pub mod backend;
pub mod cache;
pub mod chain;
pub mod coalesce;
pub mod config;
pub mod consts;
pub mod engine;
pub mod error;
pub mod image;
pub mod message;
pub mod quota;
pub mod requester;
pub mod retry;
