
/*!
# Short-Read Error Corrector
This library provides the building blocks srec uses to correct sequencing errors in short reads:
a BWT/FM-index built over the read collection, a k-mer support corrector, two overlap-consensus
correctors, and the post-processing that routes reads to the corrected or discard outputs.
Reads are corrected against the collection they came from, so the only input is the read file itself.

## Example
```rust
use srec::correction::{CorrectionAlgorithm, CorrectionParameters, ErrorCorrector, SequenceRecord};
use srec::overlapper::ExhaustiveOverlapper;
use srec::read_index::ReadIndex;
use std::sync::Arc;

//five agreeing reads dominate the erroneous base in the query
let reads = vec!["ACGTATGTACGT"; 5];
let index = Arc::new(ReadIndex::from_reads(&reads));
let provider = Arc::new(ExhaustiveOverlapper::new(index.clone()));
let params = CorrectionParameters {
    algorithm: CorrectionAlgorithm::Kmer,
    kmer_length: 5,
    ..Default::default()
};
let corrector = ErrorCorrector::new(index, provider, Default::default(), params);

let read = SequenceRecord {
    id: "read0".to_string(),
    seq: "ACGTAAGTACGT".to_string(), //error at position 5
    qual: None,
    idx: 0
};
let result = corrector.correct(&read);
assert!(result.kmer_qc);
assert_eq!(result.corrected_seq, "ACGTATGTACGT");
```
*/

/// Contains the correction algorithms and their per-read dispatch
pub mod correction;
/// Contains the quality-dependent k-mer support thresholds
pub mod correction_thresholds;
/// Contains the seen/error counter tables behind the metrics report
pub mod metrics;
/// Contains the overlap pile used by the legacy overlap corrector
pub mod multi_overlap;
/// Contains the multiple alignment and its column consensus
pub mod multiple_alignment;
/// Contains the overlap alignment routines and the overlap provider trait
pub mod overlapper;
/// Contains the result classification, output sinks, and metric accumulation
pub mod post_process;
/// Contains the BWT/FM-index built over the read collection
pub mod read_index;
/// Contains inline helpers for DNA strings and quality characters
pub mod string_util;
