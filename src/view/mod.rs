//! Read-side view API: ingest, query, stats

pub mod api;
pub mod service;

pub use api::{routes, ViewState};
pub use service::{LogPage, LogQuery, LogQueryService, LogStats, StatsQuery};
