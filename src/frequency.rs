use std::collections::HashMap;

pub const OTHER_BUCKET: &str = "__OTHER__";

/// Exact per-value counts for up to `cap` distinct values. Values first seen
/// after the cap is reached only bump the overflow counter.
#[derive(Debug, Clone)]
pub struct BoundedCounter {
    cap: usize,
    counts: HashMap<String, u64>,
    overflow: u64,
}

impl BoundedCounter {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            counts: HashMap::new(),
            overflow: 0,
        }
    }

    pub fn observe(&mut self, value: &str) {
        if let Some(count) = self.counts.get_mut(value) {
            *count += 1;
            return;
        }
        if self.counts.len() < self.cap {
            self.counts.insert(value.to_string(), 1);
        } else {
            self.overflow += 1;
        }
    }

    pub fn tracked(&self) -> usize {
        self.counts.len()
    }

    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    pub fn is_capped(&self) -> bool {
        self.overflow > 0
    }

    pub fn count(&self, value: &str) -> Option<u64> {
        self.counts.get(value).copied()
    }

    /// Top `n` entries by count desc then value asc, with any overflow merged
    /// in as a synthetic [`OTHER_BUCKET`] entry before truncation.
    pub fn top(&self, n: usize) -> Vec<(String, u64)> {
        let mut items = self
            .counts
            .iter()
            .map(|(value, count)| (value.clone(), *count))
            .collect::<Vec<_>>();
        if self.overflow > 0 {
            items.push((OTHER_BUCKET.to_string(), self.overflow));
        }
        items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        items.truncate(n);
        items
    }
}
