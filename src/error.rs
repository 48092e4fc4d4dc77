//! Error taxonomy shared by the kinematics, event model and persistence layers

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong in this crate
#[derive(Debug, Error)]
pub enum Error {
    /// A construction or transformation would yield a physically
    /// inconsistent state (spacelike beyond tolerance, superluminal boost...)
    #[error("invalid kinematics: {0}")]
    InvalidKinematics(String),

    /// A coordinate is mathematically undefined for this 4-vector
    #[error("{coordinate} is undefined: {reason}")]
    UndefinedCoordinate {
        /// Name of the coordinate which was requested
        coordinate: &'static str,
        /// Why it cannot be computed
        reason: &'static str,
    },

    /// An event or ensemble attribute was looked up but never set
    #[error("attribute not found: {0}")]
    AttributeNotFound(String),

    /// The object store failed to read or write data
    #[error("persistence error: {context}")]
    Persistence {
        /// What was being done when the failure occured
        context: String,
        /// Underlying failure, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A transaction was invalidated by a concurrent commit
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// The requested ensemble or event does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Stored data cannot be turned back into a valid entity
    #[error("corrupt data: {0}")]
    CorruptData(String),
}
//
impl Error {
    /// Build a persistence error with an underlying cause
    pub fn persistence(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Persistence {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    /// Build a persistence error that has no underlying cause
    pub fn persistence_msg(context: impl Into<String>) -> Self {
        Self::Persistence {
            context: context.into(),
            source: None,
        }
    }

    /// Build an undefined coordinate error
    pub(crate) fn undefined(coordinate: &'static str, reason: &'static str) -> Self {
        Self::UndefinedCoordinate { coordinate, reason }
    }
}
