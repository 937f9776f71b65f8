use thiserror::Error;

/// Fatal failures raised while building a table.
///
/// Non-fatal outcomes (duplicate key, sentinel key) are reported through
/// `bool`/`Option` return values instead. A table that returned one of these
/// errors is not recoverable; callers typically record the failing insert
/// and discard the table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The probe walk exceeded the configured step bound.
    #[error("maximum probing step count ({0}) exceeded")]
    ProbingStepsExceeded(usize),

    /// The probe sequence returned to its origin with every bucket on the
    /// way full.
    #[error("building {0} failed: detected cycle during probing, all buckets along the way are full")]
    ProbingCycle(String),

    /// A displaced entry resurfaced as the key that started the insert.
    #[error("insertion failed, infinite displacement loop detected")]
    DisplacementLoop,

    /// A cuckoo eviction chain exceeded the kick-cycle cap.
    #[error("maximum kick cycle length ({0}) reached")]
    KickCycleExceeded(usize),

    /// A previous insert already failed this table; the in-flight entry was
    /// not placed.
    #[error("table build has already failed")]
    AlreadyFailed,
}
