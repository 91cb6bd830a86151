//! Tunables for profiling, caching, comparison and explanation.
//!
//! Every operation takes its configuration explicitly; the defaults mirror
//! what the command line uses when no flags are given.

use std::{path::PathBuf, time::Duration};

use crate::{
    error::{InsightError, Result},
    explain::UnitPattern,
};

pub const DEFAULT_CACHE_DIR: &str = ".csv_insight_cache";
pub const LINEAGE_SUBDIR: &str = "lineage";

#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    /// Bits in each column's cardinality bitmap.
    pub bitmap_bits: usize,
    /// Distinct values tracked exactly before spilling into `__OTHER__`.
    pub top_value_cap: usize,
    pub top_n: usize,
    pub outlier_sample_cap: usize,
    pub value_sample_cap: usize,
    pub date_hit_ratio: f64,
    pub category_unique_ratio: f64,
    /// Fixed seed for the reservoirs; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            bitmap_bits: 65_536,
            top_value_cap: 5_000,
            top_n: 5,
            outlier_sample_cap: 20_000,
            value_sample_cap: 300,
            date_hit_ratio: 0.7,
            category_unique_ratio: 0.2,
            seed: Some(0x5eed_c0de),
        }
    }
}

impl ProfilerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bitmap_bits == 0 {
            return Err(InsightError::invalid_config(
                "bitmap_bits must be greater than zero",
            ));
        }
        if self.top_n == 0 {
            return Err(InsightError::invalid_config(
                "top_n must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Every setting that shapes a profile, joined for use in cache keys.
    pub fn cache_tag(&self) -> String {
        let seed = self
            .seed
            .map_or_else(|| "os".to_string(), |s| s.to_string());
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.bitmap_bits,
            self.top_value_cap,
            self.top_n,
            self.outlier_sample_cap,
            self.value_sample_cap,
            self.date_hit_ratio,
            self.category_unique_ratio,
            seed
        )
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
    /// Entries older than this are purged; zero disables expiry.
    pub ttl: Duration,
    /// LRU eviction ceiling for the sum of entry sizes; zero disables it.
    pub max_total_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_CACHE_DIR),
            ttl: Duration::from_secs(60 * 60 * 24),
            max_total_bytes: 256 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn lineage_dir(&self) -> PathBuf {
        self.dir.join(LINEAGE_SUBDIR)
    }
}

#[derive(Debug, Clone)]
pub struct CompareConfig {
    pub num_bins: usize,
    pub epsilon: f64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            num_bins: 10,
            epsilon: 1e-9,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExplainConfig {
    pub top_k: usize,
    pub missing_ratio_threshold: f64,
    pub dominant_ratio_threshold: f64,
    pub unit_coverage_threshold: f64,
    pub recent_change_threshold: f64,
    pub min_series_len: usize,
    pub unit_pattern: UnitPattern,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            missing_ratio_threshold: 0.2,
            dominant_ratio_threshold: 0.65,
            unit_coverage_threshold: 0.2,
            recent_change_threshold: 0.5,
            min_series_len: 6,
            unit_pattern: UnitPattern::default(),
        }
    }
}
