/// Errors surfaced by [`crate::Database`] operations.
///
/// Matches the taxonomy in the token store contract: unknown rows are
/// `NotFound`, not an exception; a decrypt failure on stored ciphertext is
/// `Corrupt` and is never silently discarded.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("corrupt token record: {0}")]
    Corrupt(String),

    #[error("internal error: {0}")]
    Internal(String),
}
