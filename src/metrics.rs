
use std::collections::BTreeMap;
use std::fmt::Display;
use std::io;
use std::io::Write;

/// Paired seen/error counters over an arbitrary key, used to break down
/// corrections by read position, original base, quality value, and sequence
/// context. Keys report in sorted order.
pub struct SampleErrorCounts<K: Ord> {
    counts: BTreeMap<K, (u64, u64)>
}

impl<K: Ord> Default for SampleErrorCounts<K> {
    fn default() -> Self {
        Self {
            counts: BTreeMap::new()
        }
    }
}

impl<K: Ord + Display> SampleErrorCounts<K> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Records one observation of `key`.
    pub fn increment_sample(&mut self, key: K) {
        self.counts.entry(key).or_insert((0, 0)).0 += 1;
    }

    /// Records one corrected error at `key`.
    pub fn increment_error(&mut self, key: K) {
        self.counts.entry(key).or_insert((0, 0)).1 += 1;
    }

    /// Returns the (seen, errors) pair for `key`.
    pub fn get(&self, key: &K) -> (u64, u64) {
        *self.counts.get(key).unwrap_or(&(0, 0))
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Writes the counter table as tab-separated text.
    /// # Arguments
    /// * `writer` - the report destination
    /// * `title` - heading line for the table
    /// * `label` - column name for the key
    pub fn write_report(&self, writer: &mut dyn Write, title: &str, label: &str) -> io::Result<()> {
        writeln!(writer, "{}", title)?;
        writeln!(writer, "{}\tcount\terrors", label)?;
        for (key, (seen, errors)) in &self.counts {
            writeln!(writer, "{}\t{}\t{}", key, seen, errors)?;
        }
        Ok(())
    }
}
