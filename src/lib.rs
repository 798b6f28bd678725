pub mod admin;
pub mod config;
pub mod decorator;
pub mod error;
pub mod index;
pub mod indexing;
pub mod models;
pub mod segment;
pub mod system;
pub mod tokenizer;

pub use admin::{AdminStats, IndexAdmin};
pub use config::{AnalyzerConfig, IndexConfig, IndexProfile, MAX_BATCH_SIZE};
pub use decorator::{DecoratorCache, IdentityDecorator, ReaderDecorator};
pub use error::{Result, RtIndexError};
pub use indexing::{AsyncConsumer, DataConsumer, IndexManager, IndexStatus};
pub use models::*;
pub use segment::{CompositeReader, SegmentReader, Uid, Version, DELETED_UID};
pub use system::{IndexSystem, ReaderSnapshot};
pub use tokenizer::{Analyzer, SharedAnalyzer, Tokenizer, WhitespaceAnalyzer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
