use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, RtIndexError};
use crate::segment::MergePolicyConfig;

/// Upper bound for the number of events the disk loader may hold
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Batch size used by the front-door consumer
pub const DEFAULT_CONSUMER_BATCH_SIZE: usize = 100;

/// Analyzer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub lowercase: bool,
    pub remove_stopwords: bool,
    pub stem: bool,
    pub min_token_length: usize,
    pub max_token_length: usize,
    pub language: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            lowercase: true,
            remove_stopwords: true,
            stem: true,
            min_token_length: 2,
            max_token_length: 50,
            language: "english".to_string(),
        }
    }
}

impl AnalyzerConfig {
    /// Lowercasing only, no stemming or stopwords
    pub fn plain() -> Self {
        Self {
            remove_stopwords: false,
            stem: false,
            min_token_length: 1,
            ..Default::default()
        }
    }
}

/// Configuration for an index system rooted at one directory
#[derive(Clone, Debug)]
pub struct IndexConfig {
    pub index_dir: PathBuf,
    /// Stage writes in memory segments so they are searchable before the disk commit
    pub realtime: bool,
    /// Pending event count that triggers a disk flush
    pub batch_size: usize,
    /// Pending event count at which producers are blocked
    pub max_batch_size: usize,
    /// Maximum time events wait before a disk flush
    pub batch_delay: Duration,
    /// Batch size of the front-door consumer
    pub consumer_batch_size: usize,
    pub analyzer: AnalyzerConfig,
    pub merge: MergePolicyConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("./index"),
            realtime: true,
            batch_size: 1_000,
            max_batch_size: MAX_BATCH_SIZE,
            batch_delay: Duration::from_secs(1),
            consumer_batch_size: DEFAULT_CONSUMER_BATCH_SIZE,
            analyzer: AnalyzerConfig::default(),
            merge: MergePolicyConfig::default(),
        }
    }
}

/// Configuration profiles for different workloads
#[derive(Clone, Debug, PartialEq)]
pub enum IndexProfile {
    LowLatency,
    Balanced,
    HighThroughput,
}

impl IndexProfile {
    /// Disk batch size for this profile
    pub fn batch_size(&self) -> usize {
        match self {
            IndexProfile::LowLatency => 100,
            IndexProfile::Balanced => 1_000,
            IndexProfile::HighThroughput => 5_000,
        }
    }

    /// Disk batch delay for this profile
    pub fn batch_delay(&self) -> Duration {
        match self {
            IndexProfile::LowLatency => Duration::from_millis(200),
            IndexProfile::Balanced => Duration::from_secs(1),
            IndexProfile::HighThroughput => Duration::from_secs(5),
        }
    }

    /// Apply this profile to an IndexConfig
    pub fn apply_to(&self, config: &mut IndexConfig) {
        config.batch_size = self.batch_size();
        config.batch_delay = self.batch_delay();
    }

    /// Parse a profile name, accepting dashes or underscores
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "low-latency" | "low_latency" => Some(IndexProfile::LowLatency),
            "balanced" => Some(IndexProfile::Balanced),
            "high-throughput" | "high_throughput" => Some(IndexProfile::HighThroughput),
            _ => None,
        }
    }
}

impl IndexConfig {
    /// Create a configuration for the given index directory
    pub fn new(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
            ..Default::default()
        }
    }

    /// Apply a performance profile to this configuration
    pub fn with_profile(mut self, profile: IndexProfile) -> Self {
        profile.apply_to(&mut self);
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn with_consumer_batch_size(mut self, batch_size: usize) -> Self {
        self.consumer_batch_size = batch_size;
        self
    }

    pub fn with_analyzer(mut self, analyzer: AnalyzerConfig) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_merge_policy(mut self, merge: MergePolicyConfig) -> Self {
        self.merge = merge;
        self
    }

    /// Clamp batch sizes into their legal ranges and reject unusable settings
    pub fn validate(mut self) -> Result<Self> {
        if self.index_dir.as_os_str().is_empty() {
            return Err(RtIndexError::InvalidConfig(
                "index_dir must not be empty".to_string(),
            ));
        }
        if self.analyzer.min_token_length > self.analyzer.max_token_length {
            return Err(RtIndexError::InvalidConfig(format!(
                "min_token_length {} exceeds max_token_length {}",
                self.analyzer.min_token_length, self.analyzer.max_token_length
            )));
        }
        self.batch_size = self.batch_size.max(1);
        self.max_batch_size = self.max_batch_size.clamp(self.batch_size, MAX_BATCH_SIZE.max(self.batch_size));
        self.consumer_batch_size = self.consumer_batch_size.max(1);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let config = IndexConfig::default();
        assert!(config.realtime);
        assert_eq!(config.max_batch_size, MAX_BATCH_SIZE);
        assert_eq!(config.consumer_batch_size, 100);

        let analyzer = AnalyzerConfig::default();
        assert!(analyzer.lowercase);
        assert!(analyzer.remove_stopwords);
    }

    #[test]
    fn test_profiles() {
        assert_eq!(IndexProfile::LowLatency.batch_size(), 100);
        assert_eq!(
            IndexProfile::HighThroughput.batch_delay(),
            Duration::from_secs(5)
        );
        assert_eq!(
            IndexProfile::parse("high-throughput"),
            Some(IndexProfile::HighThroughput)
        );
        assert_eq!(IndexProfile::parse("durable"), None);
    }

    #[test]
    fn test_builder() {
        let config = IndexConfig::new("/tmp/idx")
            .with_profile(IndexProfile::LowLatency)
            .with_realtime(false)
            .with_consumer_batch_size(10);

        assert_eq!(config.index_dir, PathBuf::from("/tmp/idx"));
        assert_eq!(config.batch_size, 100);
        assert!(!config.realtime);
        assert_eq!(config.consumer_batch_size, 10);
    }

    #[test]
    fn test_validate_clamps() {
        let config = IndexConfig::new("/tmp/idx")
            .with_batch_size(0)
            .with_max_batch_size(1_000_000)
            .with_consumer_batch_size(0)
            .validate()
            .unwrap();
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.max_batch_size, MAX_BATCH_SIZE);
        assert_eq!(config.consumer_batch_size, 1);

        let bad = IndexConfig::new("")
            .validate();
        assert!(matches!(bad, Err(RtIndexError::InvalidConfig(_))));
    }
}
