use flowidx_primitives::WorkerKind;

/// Errors raised by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    /// The database does not carry the expected `raw` schema. The indexer
    /// refuses to run against a legacy single-table database.
    #[error("database is missing the `raw` schema; not a v2 database")]
    SchemaMissing,
    /// A fetched row failed to decode into its domain type.
    #[error("malformed row in {table}: {reason}")]
    MalformedRow {
        /// Table the row came from.
        table: &'static str,
        /// What was wrong.
        reason: String,
    },
    /// A lease transition was attempted on a lease the store does not hold.
    #[error("no lease for worker {worker} at from_height {from_height}")]
    LeaseNotFound {
        /// Worker kind.
        worker: WorkerKind,
        /// Start of the leased range.
        from_height: u64,
    },
}

impl StoreError {
    /// Shorthand for [`StoreError::MalformedRow`].
    pub fn malformed(table: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedRow { table, reason: reason.into() }
    }
}
