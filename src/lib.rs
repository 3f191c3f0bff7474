//! Promo relay: watches source channels for promo codes and re-broadcasts
//! each one, once per window, to every subscribed target channel.

pub mod audit;
pub mod broadcast;
pub mod cache;
pub mod channels;
pub mod config;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod store;
