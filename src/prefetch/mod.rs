//! Predictive chunk loading.
//!
//! [`IntentPredictor`] turns movement samples into per-subject chunk
//! predictions, [`ByteBoundedCache`] keeps recently used chunks decoded in
//! memory, and [`PrefetchEngine`] connects the two to the storage stack with
//! a small worker pool.

mod cache;
mod engine;
mod predictor;

pub use cache::{ByteBoundedCache, ChunkCache};
pub use engine::{PrefetchConfig, PrefetchEngine, PrefetchStatus};
pub use predictor::{Intent, IntentPredictor, MovementMode, PredictorConfig, SubjectId};
