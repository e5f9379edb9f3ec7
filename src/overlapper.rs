
use std::sync::Arc;

use crate::read_index::ReadIndex;
use crate::string_util;

/// alignment score for a matching column
const MATCH_SCORE: i64 = 2;
/// alignment score for a mismatching column
const MISMATCH_SCORE: i64 = -6;
/// alignment score for a gap column
const GAP_SCORE: i64 = -3;
/// stand-in for unreachable cells; low enough that no path goes through them
const UNREACHABLE: i64 = i64::MIN / 4;

/// identity floor for overlaps admitted into the exhaustive provider's blocks
const PROVIDER_MIN_IDENTITY: f64 = 90.0;

/// An inclusive coordinate range on one of the two aligned sequences.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoordRange {
    /// first aligned position, 0-based
    pub start: usize,
    /// last aligned position, 0-based inclusive
    pub end: usize
}

/// One run of alignment operations: `M` consumes both sequences, `I` consumes
/// only the second, `D` consumes only the first.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CigarOp {
    pub op: u8,
    pub len: usize
}

/// A pairwise overlap alignment between two sequences, the aligned coordinate
/// ranges on each, and the column statistics needed for the length/identity
/// acceptance checks.
#[derive(Clone, Debug)]
pub struct SequenceOverlap {
    /// aligned range on the first sequence
    pub match_a: CoordRange,
    /// aligned range on the second sequence
    pub match_b: CoordRange,
    pub cigar: Vec<CigarOp>,
    /// mismatching plus gap columns
    pub edit_distance: usize,
    /// matching columns
    pub num_matches: usize,
    /// total alignment columns
    pub total_columns: usize
}

impl SequenceOverlap {
    /// An overlap with no aligned columns; fails every acceptance check.
    pub fn empty() -> Self {
        Self {
            match_a: CoordRange { start: 0, end: 0 },
            match_b: CoordRange { start: 0, end: 0 },
            cigar: Vec::new(),
            edit_distance: 0,
            num_matches: 0,
            total_columns: 0
        }
    }

    /// Returns the number of columns in the overlap alignment.
    #[inline]
    pub fn overlap_length(&self) -> usize {
        self.total_columns
    }

    /// Returns the percent identity of the alignment on a 0-100 scale.
    #[inline]
    pub fn percent_identity(&self) -> f64 {
        if self.total_columns == 0 {
            0.0
        } else {
            100.0 * self.num_matches as f64 / self.total_columns as f64
        }
    }

    /// Renders the cigar as the usual run-length string, e.g. `12M1D5M`.
    pub fn cigar_string(&self) -> String {
        let mut ret = String::new();
        for op in &self.cigar {
            ret.push_str(&format!("{}{}", op.len, op.op as char));
        }
        ret
    }
}

/// Computes the best overlap alignment between two sequences with the full
/// O(MN) dynamic program. Leading and trailing gaps on either sequence are
/// free, so suffix-prefix overlaps and containments both score naturally.
/// # Arguments
/// * `a` - the first sequence
/// * `b` - the second sequence
/// # Examples
/// ```rust
/// use srec::overlapper::compute_overlap;
/// let overlap = compute_overlap("GGGGACGTACGT", "ACGTACGTTTTT");
/// assert_eq!(overlap.overlap_length(), 8);
/// assert_eq!(overlap.percent_identity(), 100.0);
/// ```
pub fn compute_overlap(a: &str, b: &str) -> SequenceOverlap {
    overlap_dp(a, b, None)
}

/// Computes an overlap alignment restricted to diagonals within `band` of the
/// seed diagonal implied by a shared k-mer at `pos_a`/`pos_b`. Used when the
/// seed occurs once in each sequence and the full dynamic program would be
/// wasted effort.
/// # Arguments
/// * `a` - the first sequence
/// * `b` - the second sequence
/// * `pos_a` - seed position in `a`
/// * `pos_b` - seed position in `b`
/// * `band` - maximum diagonal drift from the seed
pub fn extend_match(a: &str, b: &str, pos_a: usize, pos_b: usize, band: usize) -> SequenceOverlap {
    overlap_dp(a, b, Some((pos_a as i64 - pos_b as i64, band as i64)))
}

fn overlap_dp(a: &str, b: &str, band: Option<(i64, i64)>) -> SequenceOverlap {
    let ab = a.as_bytes();
    let bb = b.as_bytes();
    let m = ab.len();
    let n = bb.len();
    if m == 0 || n == 0 {
        return SequenceOverlap::empty();
    }

    let in_band = |i: i64, j: i64| -> bool {
        match band {
            None => true,
            Some((diag, width)) => ((i - j) - diag).abs() <= width
        }
    };

    //dp over (m+1) x (n+1); both leading edges are free starts
    let width = n + 1;
    let mut dp: Vec<i64> = vec![UNREACHABLE; (m + 1) * width];
    for j in 0..=n {
        if in_band(0, j as i64) {
            dp[j] = 0;
        }
    }
    for i in 0..=m {
        if in_band(i as i64, 0) {
            dp[i * width] = 0;
        }
    }

    for i in 1..=m {
        for j in 1..=n {
            if !in_band(i as i64, j as i64) {
                continue;
            }
            let sub = if ab[i - 1] == bb[j - 1] { MATCH_SCORE } else { MISMATCH_SCORE };
            let mut best = UNREACHABLE;
            let diag = dp[(i - 1) * width + (j - 1)];
            if diag != UNREACHABLE && diag + sub > best {
                best = diag + sub;
            }
            let up = dp[(i - 1) * width + j];
            if up != UNREACHABLE && up + GAP_SCORE > best {
                best = up + GAP_SCORE;
            }
            let left = dp[i * width + (j - 1)];
            if left != UNREACHABLE && left + GAP_SCORE > best {
                best = left + GAP_SCORE;
            }
            dp[i * width + j] = best;
        }
    }

    //the overlap must end on a trailing edge of either sequence
    let mut best_score = UNREACHABLE;
    let mut end = (0, 0);
    for j in 0..=n {
        if in_band(m as i64, j as i64) && dp[m * width + j] > best_score {
            best_score = dp[m * width + j];
            end = (m, j);
        }
    }
    for i in 0..=m {
        if in_band(i as i64, n as i64) && dp[i * width + n] > best_score {
            best_score = dp[i * width + n];
            end = (i, n);
        }
    }
    if best_score <= 0 {
        return SequenceOverlap::empty();
    }

    //traceback to a leading edge, preferring diagonal steps like the forward pass
    let (mut i, mut j) = end;
    let mut ops: Vec<u8> = Vec::new();
    let mut num_matches = 0;
    while i > 0 && j > 0 {
        let cur = dp[i * width + j];
        let sub = if ab[i - 1] == bb[j - 1] { MATCH_SCORE } else { MISMATCH_SCORE };
        let diag = dp[(i - 1) * width + (j - 1)];
        let up = dp[(i - 1) * width + j];
        if diag != UNREACHABLE && diag + sub == cur {
            ops.push(b'M');
            if ab[i - 1] == bb[j - 1] {
                num_matches += 1;
            }
            i -= 1;
            j -= 1;
        } else if up != UNREACHABLE && up + GAP_SCORE == cur {
            ops.push(b'D');
            i -= 1;
        } else {
            ops.push(b'I');
            j -= 1;
        }
    }
    ops.reverse();

    let total_columns = ops.len();
    if total_columns == 0 {
        return SequenceOverlap::empty();
    }
    let mut cigar: Vec<CigarOp> = Vec::new();
    for &op in &ops {
        match cigar.last_mut() {
            Some(last) if last.op == op => last.len += 1,
            _ => cigar.push(CigarOp { op, len: 1 })
        }
    }

    SequenceOverlap {
        match_a: CoordRange { start: i, end: end.0 - 1 },
        match_b: CoordRange { start: j, end: end.1 - 1 },
        cigar,
        edit_distance: total_columns - num_matches,
        num_matches,
        total_columns
    }
}

/// One member of an overlap block: an oriented sequence with its overlap
/// against the query.
#[derive(Clone, Debug)]
pub struct BlockMember {
    pub seq: String,
    pub overlap: SequenceOverlap
}

/// A group of reads overlapping the query. `size` is the span of the block's
/// interval in the underlying index; the members carry the actual alignments.
#[derive(Clone, Debug)]
pub struct OverlapBlock {
    pub size: usize,
    pub members: Vec<BlockMember>
}

/// Source of overlap blocks for a query read. The production implementation
/// consults the read collection; tests substitute counting or canned providers.
pub trait OverlapProvider {
    /// Returns the overlap blocks for `seq`, excluding the read at `read_idx`.
    fn overlap_read(&self, seq: &str, read_idx: usize, min_overlap: usize) -> Vec<OverlapBlock>;
}

/// Reference `OverlapProvider` that aligns the query against every other read
/// in the collection on both strands. Quadratic over the collection, which is
/// acceptable for the modest read sets this crate targets.
pub struct ExhaustiveOverlapper {
    index: Arc<ReadIndex>
}

impl ExhaustiveOverlapper {
    /// Creates a provider over the given read collection.
    pub fn new(index: Arc<ReadIndex>) -> Self {
        Self { index }
    }
}

impl OverlapProvider for ExhaustiveOverlapper {
    fn overlap_read(&self, seq: &str, read_idx: usize, min_overlap: usize) -> Vec<OverlapBlock> {
        let mut blocks: Vec<OverlapBlock> = Vec::new();
        for candidate in 0..self.index.num_reads() {
            if candidate == read_idx {
                continue;
            }
            let forward = self.index.extract_string(candidate);
            let reverse = string_util::reverse_complement(&forward);

            let overlap_fwd = compute_overlap(seq, &forward);
            let overlap_rev = compute_overlap(seq, &reverse);
            let (member_seq, overlap) = if overlap_fwd.overlap_length() >= overlap_rev.overlap_length() {
                (forward, overlap_fwd)
            } else {
                (reverse, overlap_rev)
            };

            if overlap.overlap_length() >= min_overlap && overlap.percent_identity() >= PROVIDER_MIN_IDENTITY {
                blocks.push(OverlapBlock {
                    size: 1,
                    members: vec![BlockMember { seq: member_seq, overlap }]
                });
            }
        }
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_index::ReadIndex;

    #[test]
    fn test_perfect_suffix_prefix_overlap() {
        let overlap = compute_overlap("GGGGACGTACGT", "ACGTACGTTTTT");
        assert_eq!(overlap.overlap_length(), 8);
        assert_eq!(overlap.num_matches, 8);
        assert_eq!(overlap.edit_distance, 0);
        assert_eq!(overlap.percent_identity(), 100.0);
        assert_eq!(overlap.match_a, CoordRange { start: 4, end: 11 });
        assert_eq!(overlap.match_b, CoordRange { start: 0, end: 7 });
        assert_eq!(overlap.cigar_string(), "8M");
    }

    #[test]
    fn test_mismatch_overlap() {
        let overlap = compute_overlap("GGGGACGTACGT", "ACGAACGTTTTT");
        assert_eq!(overlap.overlap_length(), 8);
        assert_eq!(overlap.num_matches, 7);
        assert_eq!(overlap.edit_distance, 1);
        assert_eq!(overlap.percent_identity(), 87.5);
    }

    #[test]
    fn test_containment_overlap() {
        let overlap = compute_overlap("TTACGTACGTTT", "ACGTACGT");
        assert_eq!(overlap.overlap_length(), 8);
        assert_eq!(overlap.percent_identity(), 100.0);
        assert_eq!(overlap.match_a, CoordRange { start: 2, end: 9 });
        assert_eq!(overlap.match_b, CoordRange { start: 0, end: 7 });
    }

    #[test]
    fn test_no_overlap() {
        let overlap = compute_overlap("AAAAAAA", "CCCCCCC");
        assert_eq!(overlap.overlap_length(), 0);
        assert_eq!(overlap.percent_identity(), 0.0);
    }

    #[test]
    fn test_banded_matches_full_on_clean_seed() {
        let a = "GGGGACGTACGT";
        let b = "ACGTACGTTTTT";
        let full = compute_overlap(a, b);
        let banded = extend_match(a, b, 4, 0, 20);
        assert_eq!(banded.match_a, full.match_a);
        assert_eq!(banded.match_b, full.match_b);
        assert_eq!(banded.overlap_length(), full.overlap_length());
        assert_eq!(banded.num_matches, full.num_matches);
    }

    #[test]
    fn test_gapped_overlap() {
        //second sequence is missing one base inside the shared region
        let overlap = compute_overlap("GGACGTTACGACC", "ACGTACGACCTTT");
        assert!(overlap.cigar.iter().any(|op| op.op == b'D' || op.op == b'I'));
        assert_eq!(overlap.edit_distance, 1);
    }

    #[test]
    fn test_exhaustive_provider() {
        let reads = ["GGGGACGTACGTAAGGCCTT", "ACGTACGTAAGGCCTTTTTT", "CATCATCATCATCATCATCA"];
        let index = Arc::new(ReadIndex::from_reads(&reads));
        let provider = ExhaustiveOverlapper::new(index);

        let blocks = provider.overlap_read(reads[0], 0, 15);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].size, 1);
        assert_eq!(blocks[0].members[0].seq, reads[1].to_string());
        assert_eq!(blocks[0].members[0].overlap.overlap_length(), 16);

        //nothing overlaps the unrelated read
        let blocks = provider.overlap_read(reads[2], 2, 15);
        assert!(blocks.is_empty());
    }
}
