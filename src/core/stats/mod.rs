//! Statistics sources and their normalization.

pub mod error;
pub mod normalizer;
pub mod report;
pub mod traits;
pub mod types;

pub use error::StatsError;
pub use normalizer::{group_by_type, normalize, report_to_object, CategorizedStats, DirectionalStats};
pub use report::{StatRecord, StatsReport};
pub use traits::{PeerConnection, StateKind};
pub use types::StatsResult;
