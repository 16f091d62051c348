//! Error types for pipeline evaluation.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias for pipeline evaluation.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Boxed cause carried by [`PipelineError::Transform`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Terminal failure of a [`Single`](crate::Single) or [`Stream`](crate::Stream).
///
/// Errors are cheap to clone so a failing source can be replayed to
/// every subscriber.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// A present value was required but none was supplied.
    #[error("absent value: {0}")]
    AbsentValue(String),

    /// A user-supplied transform, predicate, or combiner failed.
    #[error("transform failed: {0}")]
    Transform(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A zip input failed, so the combination could not be produced.
    #[error("unresolved dependency: {0}")]
    UnresolvedDependency(#[source] Box<PipelineError>),
}

impl PipelineError {
    /// Wrap an arbitrary cause as a [`PipelineError::Transform`].
    pub fn transform(cause: impl Into<BoxError>) -> Self {
        Self::Transform(Arc::from(cause.into()))
    }

    /// Mark `cause` as the reason a combinator could not resolve.
    ///
    /// Already-unresolved errors are passed through so nested zips
    /// report the original failure once.
    pub fn unresolved(cause: PipelineError) -> Self {
        match cause {
            Self::UnresolvedDependency(_) => cause,
            other => Self::UnresolvedDependency(Box::new(other)),
        }
    }
}
