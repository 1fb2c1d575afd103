pub mod autopilot;
pub mod codec;
pub mod constants;
pub mod convert;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod prefetch;
pub mod region;
pub mod world;

pub use autopilot::{HealthFeed, ResourceAutopilot, ResourceGrade};
pub use codec::{CodecSet, CompressionKind};
pub use convert::{ConversionManager, ConversionMode};
pub use engine::{EngineConfig, EngineStatus, StrataEngine};
pub use error::{StorageError, StorageResult};
pub use prefetch::{IntentPredictor, MovementMode, PrefetchEngine};
pub use region::{LegacyRegionStore, RegionStore, StoreFormat};
pub use world::{ChunkEntry, ChunkPos, RegionPos};
