//! Storage backends for captured API log entries
//!
//! Backends are a closed set of variants behind one `save` capability.
//! Each consumes single entries and persists them independently; none
//! shares mutable state with another. The [`dispatcher::StorageDispatcher`]
//! fans every entry out to all active backends.

pub mod db;
pub mod dispatcher;
pub mod file_writer;
pub mod http;
pub mod local_file;
pub mod object;

pub use db::DbStorage;
pub use dispatcher::StorageDispatcher;
pub use http::HttpStorage;
pub use local_file::LocalFileStorage;
pub use object::ObjectStorage;

use crate::model::LogEntry;
use anyhow::Result;

/// One active storage destination.
pub enum Storage {
    LocalFile(LocalFileStorage),
    Object(ObjectStorage),
    Db(DbStorage),
    Http(HttpStorage),
}

impl Storage {
    /// Backend identity used in failure logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LocalFile(_) => "local_file",
            Self::Object(_) => "object",
            Self::Db(_) => "db",
            Self::Http(_) => "http",
        }
    }

    pub async fn save(&self, entry: &LogEntry) -> Result<()> {
        match self {
            Self::LocalFile(s) => s.save(entry).await,
            Self::Object(s) => s.save(entry).await,
            Self::Db(s) => s.save(entry).await,
            Self::Http(s) => s.save(entry).await,
        }
    }

    /// Flush buffered work and stop background tasks.
    pub async fn shutdown(&self) {
        match self {
            Self::LocalFile(s) => s.shutdown().await,
            Self::Object(s) => s.shutdown().await,
            Self::Db(_) => {}
            Self::Http(s) => s.shutdown().await,
        }
    }
}
