
extern crate log;

use bio::io::fasta;
use log::info;
use std::collections::HashMap;
use std::io;

use crate::correction::{CorrectionResult, SequenceRecord};
use crate::metrics::SampleErrorCounts;

/// length of the sequence context recorded ahead of each base
const PRECEDING_MER_LEN: usize = 2;

/// Aggregate counters reported once all reads are processed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorrectionSummary {
    pub kmer_qc_passed: u64,
    pub overlap_qc_passed: u64,
    pub qc_fail: u64,
    pub reads_kept: u64,
    pub reads_discarded: u64,
    pub total_bases: u64,
    pub total_errors: u64
}

/// Consumes correction results on the aggregator thread: classifies each read,
/// routes it to the corrected or discard sink, and accumulates the optional
/// per-base error metrics. Results may arrive out of submission order; they are
/// buffered and drained in order, the same trick the ordered FASTA writers in
/// this family of tools use.
pub struct CorrectionPostProcessor<W: io::Write> {
    corrected_writer: fasta::Writer<W>,
    discard_writer: Option<fasta::Writer<W>>,
    collect_metrics: bool,
    position_metrics: SampleErrorCounts<usize>,
    original_base_metrics: SampleErrorCounts<char>,
    quality_metrics: SampleErrorCounts<char>,
    preceding_metrics: SampleErrorCounts<String>,
    total_bases: u64,
    total_errors: u64,
    reads_kept: u64,
    reads_discarded: u64,
    kmer_qc_passed: u64,
    overlap_qc_passed: u64,
    qc_fail: u64,
    /// contains results we aren't ready to write yet
    map_store: HashMap<u64, (SequenceRecord, CorrectionResult)>,
    /// the index for the next result to write
    current_index: u64
}

impl<W: io::Write> CorrectionPostProcessor<W> {
    /// Creates a post-processor over the output sinks.
    /// # Arguments
    /// * `corrected` - sink for QC-pass reads (and failures when no discard sink exists)
    /// * `discard` - optional sink for QC-fail reads
    /// * `collect_metrics` - enables the per-base error breakdowns
    pub fn new(corrected: W, discard: Option<W>, collect_metrics: bool) -> Self {
        Self {
            corrected_writer: fasta::Writer::new(corrected),
            discard_writer: discard.map(fasta::Writer::new),
            collect_metrics,
            position_metrics: SampleErrorCounts::new(),
            original_base_metrics: SampleErrorCounts::new(),
            quality_metrics: SampleErrorCounts::new(),
            preceding_metrics: SampleErrorCounts::new(),
            total_bases: 0,
            total_errors: 0,
            reads_kept: 0,
            reads_discarded: 0,
            kmer_qc_passed: 0,
            overlap_qc_passed: 0,
            qc_fail: 0,
            map_store: HashMap::new(),
            current_index: 0
        }
    }

    /// Accepts a result by submission index, buffering it until every earlier
    /// result has been written.
    pub fn write_ordered(
        &mut self,
        read_index: u64,
        read: SequenceRecord,
        result: CorrectionResult
    ) -> io::Result<()> {
        if read_index < self.current_index {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "Read index is smaller than next expected index"
            ));
        }
        if self.map_store.insert(read_index, (read, result)).is_some() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "Read index was already present in the map_store"
            ));
        }
        self.drain_map_store()
    }

    fn drain_map_store(&mut self) -> io::Result<()> {
        while let Some((read, result)) = self.map_store.remove(&self.current_index) {
            self.process(&read, &result)?;
            self.current_index += 1;
        }
        Ok(())
    }

    /// Classifies one result and writes the read to the appropriate sink.
    pub fn process(&mut self, read: &SequenceRecord, result: &CorrectionResult) -> io::Result<()> {
        let qc_pass = if result.kmer_qc {
            self.kmer_qc_passed += 1;
            true
        } else if result.overlap_qc {
            self.overlap_qc_passed += 1;
            true
        } else {
            self.qc_fail += 1;
            false
        };

        //metrics only describe the reads that were actually corrected
        if self.collect_metrics && qc_pass {
            self.collect_read_metrics(read, result);
        }

        let record = fasta::Record::with_attrs(&read.id, None, result.corrected_seq.as_bytes());
        if qc_pass || self.discard_writer.is_none() {
            self.corrected_writer.write_record(&record)?;
            self.reads_kept += 1;
        } else {
            self.discard_writer.as_mut().unwrap().write_record(&record)?;
            self.reads_discarded += 1;
        }
        Ok(())
    }

    fn collect_read_metrics(&mut self, read: &SequenceRecord, result: &CorrectionResult) {
        let original = read.seq.as_bytes();
        let corrected = result.corrected_seq.as_bytes();
        //positional comparison is meaningless when the consensus changed length
        if original.len() != corrected.len() {
            return;
        }

        for i in 0..original.len() {
            self.total_bases += 1;

            let original_base = original[i] as char;
            self.position_metrics.increment_sample(i);
            self.original_base_metrics.increment_sample(original_base);

            let quality_char = read.qual.as_ref().map(|q| q.as_bytes()[i] as char);
            if let Some(qc) = quality_char {
                self.quality_metrics.increment_sample(qc);
            }

            let preceding = if i > PRECEDING_MER_LEN {
                Some(read.seq[i - PRECEDING_MER_LEN..i].to_string())
            } else {
                None
            };
            if let Some(mer) = &preceding {
                self.preceding_metrics.increment_sample(mer.clone());
            }

            if original[i] != corrected[i] {
                self.total_errors += 1;
                self.position_metrics.increment_error(i);
                self.original_base_metrics.increment_error(original_base);
                if let Some(qc) = quality_char {
                    self.quality_metrics.increment_error(qc);
                }
                if let Some(mer) = preceding {
                    self.preceding_metrics.increment_error(mer);
                }
            }
        }
    }

    /// Returns the aggregate counters accumulated so far.
    pub fn summary(&self) -> CorrectionSummary {
        CorrectionSummary {
            kmer_qc_passed: self.kmer_qc_passed,
            overlap_qc_passed: self.overlap_qc_passed,
            qc_fail: self.qc_fail,
            reads_kept: self.reads_kept,
            reads_discarded: self.reads_discarded,
            total_bases: self.total_bases,
            total_errors: self.total_errors
        }
    }

    /// Flushes the sinks, logs the QC tallies, and returns the summary.
    pub fn finalize(&mut self) -> io::Result<CorrectionSummary> {
        if !self.map_store.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "Results are still buffered awaiting earlier read indices"
            ));
        }
        self.corrected_writer.flush()?;
        if let Some(writer) = self.discard_writer.as_mut() {
            writer.flush()?;
        }

        info!("Reads passed kmer QC check: {}", self.kmer_qc_passed);
        info!("Reads passed overlap QC check: {}", self.overlap_qc_passed);
        info!("Reads failed QC: {}", self.qc_fail);
        if self.collect_metrics && self.total_bases > 0 {
            info!(
                "Corrected {} out of {} bases ({:.6})",
                self.total_errors,
                self.total_bases,
                self.total_errors as f64 / self.total_bases as f64
            );
        }
        Ok(self.summary())
    }

    /// Writes the per-key metric tables as a text report.
    pub fn write_metrics(&self, writer: &mut dyn io::Write) -> io::Result<()> {
        self.position_metrics
            .write_report(writer, "Bases corrected by position", "pos")?;
        writeln!(writer)?;
        self.original_base_metrics
            .write_report(writer, "Original base that was corrected", "base")?;
        writeln!(writer)?;
        self.preceding_metrics
            .write_report(writer, "kmer preceding the corrected base", "kmer")?;
        writeln!(writer)?;
        self.quality_metrics
            .write_report(writer, "Bases corrected by quality value", "quality")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{Builder, NamedTempFile};

    fn make_pair(
        id: &str,
        original: &str,
        corrected: &str,
        kmer_qc: bool,
        overlap_qc: bool
    ) -> (SequenceRecord, CorrectionResult) {
        let read = SequenceRecord {
            id: id.to_string(),
            seq: original.to_string(),
            qual: Some("I".repeat(original.len())),
            idx: 0
        };
        let result = CorrectionResult {
            corrected_seq: corrected.to_string(),
            kmer_qc,
            overlap_qc,
            num_prefix_overlaps: 0,
            num_suffix_overlaps: 0
        };
        (read, result)
    }

    #[test]
    fn test_classification_and_routing() {
        let corrected_file: NamedTempFile =
            Builder::new().prefix("corrected_").suffix(".fa").tempfile().unwrap();
        let discard_file: NamedTempFile =
            Builder::new().prefix("discard_").suffix(".fa").tempfile().unwrap();
        let corrected_path = corrected_file.path().to_str().unwrap().to_string();
        let discard_path = discard_file.path().to_str().unwrap().to_string();

        let summary = {
            let mut post = CorrectionPostProcessor::new(&corrected_file, Some(&discard_file), false);

            let (read, result) = make_pair("a", "ACGT", "ACGT", true, false);
            post.process(&read, &result).unwrap();
            let (read, result) = make_pair("b", "ACGT", "ACCT", false, true);
            post.process(&read, &result).unwrap();
            let (read, result) = make_pair("c", "ACGT", "ACGT", false, false);
            post.process(&read, &result).unwrap();

            post.finalize().unwrap()
        };

        assert_eq!(summary.kmer_qc_passed, 1);
        assert_eq!(summary.overlap_qc_passed, 1);
        assert_eq!(summary.qc_fail, 1);
        assert_eq!(summary.reads_kept, 2);
        assert_eq!(summary.reads_discarded, 1);

        let corrected_out = fs::read_to_string(corrected_path).unwrap();
        assert_eq!(corrected_out, ">a\nACGT\n>b\nACCT\n");
        let discard_out = fs::read_to_string(discard_path).unwrap();
        assert_eq!(discard_out, ">c\nACGT\n");
    }

    #[test]
    fn test_no_discard_sink_keeps_failures() {
        let corrected_file: NamedTempFile =
            Builder::new().prefix("corrected_").suffix(".fa").tempfile().unwrap();
        let corrected_path = corrected_file.path().to_str().unwrap().to_string();

        let summary = {
            let mut post: CorrectionPostProcessor<&NamedTempFile> =
                CorrectionPostProcessor::new(&corrected_file, None, false);
            let (read, result) = make_pair("a", "ACGT", "ACGT", false, false);
            post.process(&read, &result).unwrap();
            post.finalize().unwrap()
        };

        assert_eq!(summary.qc_fail, 1);
        assert_eq!(summary.reads_kept, 1);
        assert_eq!(summary.reads_discarded, 0);

        let corrected_out = fs::read_to_string(corrected_path).unwrap();
        assert_eq!(corrected_out, ">a\nACGT\n");
    }

    #[test]
    fn test_ordered_drain() {
        let corrected_file: NamedTempFile =
            Builder::new().prefix("corrected_").suffix(".fa").tempfile().unwrap();
        let corrected_path = corrected_file.path().to_str().unwrap().to_string();

        {
            let mut post: CorrectionPostProcessor<&NamedTempFile> =
                CorrectionPostProcessor::new(&corrected_file, None, false);

            //submit out of order: b -> c -> a
            let (read, result) = make_pair("b", "ACGT", "ACGT", true, false);
            post.write_ordered(1, read, result).unwrap();
            let (read, result) = make_pair("c", "ACGT", "ACGT", true, false);
            post.write_ordered(2, read, result).unwrap();
            let (read, result) = make_pair("a", "ACGT", "ACGT", true, false);
            post.write_ordered(0, read, result).unwrap();

            post.finalize().unwrap();
        }

        let corrected_out = fs::read_to_string(corrected_path).unwrap();
        assert_eq!(corrected_out, ">a\nACGT\n>b\nACGT\n>c\nACGT\n");
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let corrected_file: NamedTempFile =
            Builder::new().prefix("corrected_").suffix(".fa").tempfile().unwrap();
        let mut post: CorrectionPostProcessor<&NamedTempFile> =
            CorrectionPostProcessor::new(&corrected_file, None, false);

        let (read, result) = make_pair("b", "ACGT", "ACGT", true, false);
        post.write_ordered(1, read, result).unwrap();
        let (read, result) = make_pair("dup", "ACGT", "ACGT", true, false);
        assert!(post.write_ordered(1, read, result).is_err());
    }

    #[test]
    fn test_metrics_collection() {
        let corrected_file: NamedTempFile =
            Builder::new().prefix("corrected_").suffix(".fa").tempfile().unwrap();
        let mut post: CorrectionPostProcessor<&NamedTempFile> =
            CorrectionPostProcessor::new(&corrected_file, None, true);

        //one corrected base at position 4, quality 'I', preceded by "GT"
        let (read, result) = make_pair("a", "ACGTACGT", "ACGTTCGT", true, false);
        post.process(&read, &result).unwrap();
        //QC failures contribute nothing
        let (read, result) = make_pair("b", "ACGTACGT", "ACGTACGT", false, false);
        post.process(&read, &result).unwrap();

        let summary = post.summary();
        assert_eq!(summary.total_bases, 8);
        assert_eq!(summary.total_errors, 1);

        let mut buffer: Vec<u8> = Vec::new();
        post.write_metrics(&mut buffer).unwrap();
        let report = String::from_utf8(buffer).unwrap();
        assert!(report.contains("Bases corrected by position"));
        assert!(report.contains("4\t1\t1"));
        assert!(report.contains("GT\t1\t1"));
        assert!(report.contains("I\t8\t1"));
    }
}
