//! Instruction-frequency statistics and run summaries.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Occurrences of each instruction tag. Keys serialize in sorted order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagCounts(BTreeMap<String, u64>);

impl TagCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<S: AsRef<str>>(&mut self, tag: S) {
        *self.0.entry(tag.as_ref().to_string()).or_default() += 1;
    }

    pub fn extend<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for tag in tags {
            self.add(tag);
        }
    }

    /// Adds `other` into `self`. Merging is commutative and associative.
    pub fn merge(&mut self, other: &TagCounts) {
        for (tag, count) in &other.0 {
            *self.0.entry(tag.clone()).or_default() += count;
        }
    }

    pub fn get(&self, tag: &str) -> u64 {
        self.0.get(tag).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(tag, count)| (tag.as_str(), *count))
    }
}

impl<S: AsRef<str>> FromIterator<S> for TagCounts {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut counts = TagCounts::new();
        counts.extend(iter);
        counts
    }
}

/// On-disk statistics file: `{"inst_counts": {...}}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsDocument {
    pub inst_counts: TagCounts,
}

impl StatsDocument {
    /// Pretty JSON with four-space indentation and a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)?;
        out.push(b'\n');
        String::from_utf8(out).map_err(|err| {
            HarnessError::io(
                "statistics are not valid UTF-8",
                std::io::Error::new(std::io::ErrorKind::InvalidData, err),
            )
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)
            .map_err(|err| HarnessError::io(format!("write {}", path.display()), err))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| HarnessError::io(format!("read {}", path.display()), err))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Sums the counts of several statistics files.
    pub fn combine<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut combined = Self::default();
        for path in paths {
            let doc = Self::read(path.as_ref())?;
            combined.inst_counts.merge(&doc.inst_counts);
        }
        Ok(combined)
    }
}

/// Where a failing trial ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureRecord {
    pub index: usize,
    pub dir: PathBuf,
    pub timed_out: bool,
}

/// Aggregate result of a scheduler run.
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    pub trials: usize,
    pub passes: usize,
    /// Trials with at least one engine run that timed out, or that exceeded the trial timeout.
    pub timeouts: usize,
    pub failures: Vec<FailureRecord>,
    pub stats: TagCounts,
    /// Packets times iterations over every completed trial.
    pub packets_executed: u64,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.passes == self.trials
    }

    /// Executed packets per second of wall-clock time.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.packets_executed as f64 / secs
        } else {
            0.0
        }
    }

    pub fn stats_document(&self) -> StatsDocument {
        StatsDocument {
            inst_counts: self.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_serialize_sorted_with_four_space_indent() {
        let doc = StatsDocument {
            inst_counts: ["S2_asl", "A2_add", "A2_add"].into_iter().collect(),
        };
        assert_eq!(
            doc.to_json().unwrap(),
            "{\n    \"inst_counts\": {\n        \"A2_add\": 2,\n        \"S2_asl\": 1\n    }\n}\n"
        );
    }

    #[test]
    fn combine_sums_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        fs::write(&a, r#"{"inst_counts": {"A2_add": 3, "J2_jump": 1}}"#).unwrap();
        fs::write(&b, r#"{"inst_counts": {"A2_add": 2}}"#).unwrap();

        let combined = StatsDocument::combine(&[a, b]).unwrap();
        assert_eq!(combined.inst_counts.get("A2_add"), 5);
        assert_eq!(combined.inst_counts.get("J2_jump"), 1);
        assert_eq!(combined.inst_counts.total(), 6);
    }

    #[test]
    fn report_summary() {
        let report = RunReport {
            trials: 4,
            passes: 4,
            packets_executed: 1000,
            elapsed: Duration::from_secs(4),
            ..RunReport::default()
        };
        assert!(report.passed());
        assert_eq!(report.throughput(), 250.0);
        assert_eq!(RunReport::default().throughput(), 0.0);
    }
}
