//! Folded-stack profile accumulated between uploads

use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::SystemTime;

/// Sample counts keyed by `;`-separated stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    stacks: BTreeMap<String, u64>,
}

impl Profile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stack: &str, count: u64) {
        if count == 0 || stack.is_empty() {
            return;
        }
        *self.stacks.entry(stack.to_string()).or_insert(0) += count;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    #[must_use]
    pub fn total_samples(&self) -> u64 {
        self.stacks.values().sum()
    }

    #[must_use]
    pub fn count(&self, stack: &str) -> u64 {
        self.stacks.get(stack).copied().unwrap_or(0)
    }

    /// Render as `stack count` lines, sorted by stack.
    #[must_use]
    pub fn to_folded(&self) -> String {
        let mut out = String::new();
        for (stack, count) in &self.stacks {
            // Writing to a String cannot fail
            let _ = writeln!(out, "{stack} {count}");
        }
        out
    }
}

/// One profile window ready to be sent to the collector.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub name: String,
    pub spy_name: String,
    pub sample_rate: u32,
    pub from: SystemTime,
    pub until: SystemTime,
    pub profile: Profile,
}
