use super::error::StatsError;

/// Result type returned by statistics sources.
pub type StatsResult<T> = std::result::Result<T, StatsError>;
