mod error;
mod history_repository;

pub use error::{RepositoryError, RepositoryResult};
pub use history_repository::{HistoryRepository, JsonHistoryRepository};
