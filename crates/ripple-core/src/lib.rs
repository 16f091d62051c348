//! ripple-core — lazy single-value and multi-value pipelines.
//!
//! [`Single`] describes work producing zero or one value; [`Stream`]
//! describes an ordered, possibly unbounded, sequence. Both are immutable
//! descriptions: building and chaining them has no side effects, and all
//! work happens per subscription, driven by whichever executor polls it.
//!
//! ```
//! use ripple_core::{Single, zip3};
//!
//! # futures_util::FutureExt::now_or_never(async {
//! let greeting = zip3(Single::just("This"), Single::just("is"), Single::just("a test"))
//!     .map(|(a, b, c)| format!("{a} {b} {c}"));
//! assert_eq!(greeting.block().await.unwrap().as_deref(), Some("This is a test"));
//! # });
//! ```

pub mod config;
pub mod error;
pub mod group;
pub mod key_count;
pub mod single;
pub mod stream;

pub use config::{ApiConfig, ConfigError, RippleConfig, ServerConfig};
pub use error::{BoxError, PipelineError, PipelineResult};
pub use group::GroupedStream;
pub use key_count::KeyCount;
pub use single::{Resolution, Single, zip_all, zip3};
pub use stream::Stream;
