//! Account persistence: repository trait, PostgreSQL and in-memory implementations.

pub mod account_memory;
pub mod account_pg;
pub(crate) mod account_pg_batch;
pub(crate) mod account_pg_helpers;
pub(crate) mod account_pg_query;
pub(crate) mod account_pg_targeted;
pub mod repository;

pub use account_memory::{InMemoryAccountRepository, MemorySubscription, RepoCall};
pub use account_pg::PostgresAccountRepository;
pub use repository::{AccountRepository, RecoveryCandidate, RepoResult, RepositoryError};
