
use crate::multiple_alignment::project_onto_base;
use crate::overlapper::{OverlapBlock, SequenceOverlap};

/// candidate symbols for a column call
const CALL_SYMBOLS: [u8; 5] = [b'A', b'C', b'G', b'N', b'T'];

/// non-root rows that must cover every root column for the pile to pass QC
const MIN_QC_DEPTH: usize = 2;

struct PileRow {
    projected: Vec<Option<u8>>,
    covers_start: bool,
    covers_end: bool
}

/// A pile of overlapping reads stacked on a root read, used by the legacy
/// overlap corrector. Unlike `MultipleAlignment`, the pile tracks which rows
/// reach the root's ends and supports the conflict-aware consensus and the
/// coverage QC check.
pub struct MultiOverlap {
    root: Vec<u8>,
    rows: Vec<PileRow>
}

impl MultiOverlap {
    /// Creates an empty pile over the given root sequence.
    pub fn new(root: &str) -> Self {
        Self {
            root: root.as_bytes().to_vec(),
            rows: Vec::new()
        }
    }

    /// Builds a pile from the overlap blocks returned by an overlap provider.
    pub fn from_blocks(root: &str, blocks: &[OverlapBlock]) -> Self {
        let mut pile = MultiOverlap::new(root);
        for block in blocks {
            for member in &block.members {
                pile.add_overlap(&member.seq, &member.overlap);
            }
        }
        pile
    }

    /// Adds one overlapping read to the pile.
    /// # Arguments
    /// * `seq` - the overlapping sequence, oriented like the root
    /// * `overlap` - its overlap against the root
    pub fn add_overlap(&mut self, seq: &str, overlap: &SequenceOverlap) {
        let projected = project_onto_base(self.root.len(), seq, overlap);
        self.rows.push(PileRow {
            projected,
            covers_start: overlap.match_a.start == 0,
            covers_end: overlap.match_a.end + 1 == self.root.len()
        });
    }

    /// Returns the number of overlaps reaching the root's start and end,
    /// respectively. A containment counts on both sides.
    pub fn count_overlaps(&self) -> (usize, usize) {
        let prefix = self.rows.iter().filter(|r| r.covers_start).count();
        let suffix = self.rows.iter().filter(|r| r.covers_end).count();
        (prefix, suffix)
    }

    /// Calls a consensus over the root columns, refusing to change columns
    /// with too much dissent. Per column the call is the likelihood argmax
    /// under a uniform per-base error rate `p_error`; when the evidence
    /// against the call (column depth minus its count) exceeds
    /// `conflict_cutoff` the column is conflicted and keeps the root base.
    /// The result always has the root's length.
    /// # Arguments
    /// * `p_error` - per-base error probability used for the likelihoods
    /// * `conflict_cutoff` - maximum tolerated dissenting bases per column
    pub fn consensus_conflict(&self, p_error: f64, conflict_cutoff: usize) -> String {
        let lp_agree = (1.0 - p_error).ln();
        let lp_disagree = (p_error / 3.0).ln();

        let mut called: Vec<u8> = Vec::with_capacity(self.root.len());
        for col in 0..self.root.len() {
            let mut counts: [usize; 256] = [0; 256];
            counts[self.root[col] as usize] += 1;
            let mut depth = 1;
            for row in &self.rows {
                if let Some(b) = row.projected[col] {
                    counts[b as usize] += 1;
                    depth += 1;
                }
            }

            let likelihood = |count: usize| -> f64 {
                count as f64 * lp_agree + (depth - count) as f64 * lp_disagree
            };
            let root_base = self.root[col];
            let mut call = root_base;
            let mut best = likelihood(counts[call as usize]);
            let mut tied = false;
            for &symbol in CALL_SYMBOLS.iter() {
                if symbol == root_base {
                    continue;
                }
                let score = likelihood(counts[symbol as usize]);
                if score > best {
                    best = score;
                    call = symbol;
                    tied = false;
                } else if score == best && call != root_base {
                    tied = true;
                }
            }
            //a dead heat between two non-root candidates is unresolvable
            if tied {
                call = root_base;
            }

            let conflicts = depth - counts[call as usize];
            called.push(if conflicts > conflict_cutoff { self.root[col] } else { call });
        }
        String::from_utf8(called).unwrap()
    }

    /// Replaces the root sequence ahead of the QC check; the replacement must
    /// have the same length as the pile's columns.
    pub fn update_root_seq(&mut self, seq: &str) {
        assert_eq!(seq.len(), self.root.len());
        self.root = seq.as_bytes().to_vec();
    }

    /// Returns true if every root column is covered by at least `MIN_QC_DEPTH`
    /// overlapping rows.
    pub fn qc_check(&self) -> bool {
        for col in 0..self.root.len() {
            let depth = self.rows.iter().filter(|r| r.projected[col].is_some()).count();
            if depth < MIN_QC_DEPTH {
                return false;
            }
        }
        true
    }

    /// Renders the pile for diagnostic output, one line per row, with `.` in
    /// unaligned cells.
    pub fn pileup_string(&self) -> String {
        let mut lines: Vec<String> = Vec::with_capacity(1 + self.rows.len());
        lines.push(String::from_utf8(self.root.clone()).unwrap());
        for row in &self.rows {
            let rendered: String = row
                .projected
                .iter()
                .map(|cell| cell.map_or('.', |b| b as char))
                .collect();
            lines.push(rendered);
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlapper::compute_overlap;

    const P_ERROR: f64 = 0.01;

    fn build_pile(root: &str, others: &[&str]) -> MultiOverlap {
        let mut pile = MultiOverlap::new(root);
        for other in others {
            let overlap = compute_overlap(root, other);
            pile.add_overlap(other, &overlap);
        }
        pile
    }

    #[test]
    fn test_count_overlaps() {
        let root = "GGGGACGTACGTCCCC";
        //one suffix overlap, one prefix overlap, one containment
        let suffix_read = "ACGTCCCCAAAAAAAA";
        let prefix_read = "TTTTTTTTGGGGACGT";
        let contained = root;
        let pile = build_pile(root, &[suffix_read, prefix_read, contained]);

        let (prefix, suffix) = pile.count_overlaps();
        assert_eq!(prefix, 2);
        assert_eq!(suffix, 2);
    }

    #[test]
    fn test_consensus_corrects_with_agreement() {
        let root = "ACGTTCGTAAGGCCTT";
        let truth = "ACGTACGTAAGGCCTT";
        let pile = build_pile(root, &[truth, truth, truth]);

        let consensus = pile.consensus_conflict(P_ERROR, 5);
        assert_eq!(consensus, truth.to_string());
    }

    #[test]
    fn test_consensus_conflict_cutoff_veto() {
        let root = "ACGTTCGTAAGGCCTT";
        let truth = "ACGTACGTAAGGCCTT";
        //three votes for the change, but a cutoff of 1 is exceeded by the
        //root's own dissenting base plus nothing else, so push dissent higher
        //by stacking disagreeing rows
        let other = "ACGTGCGTAAGGCCTT";
        let pile = build_pile(root, &[truth, truth, other, other]);

        //dissent against any call is at least 2, so a cutoff of 1 freezes the
        //disputed column at the root base
        let strict = pile.consensus_conflict(P_ERROR, 1);
        assert_eq!(strict, root.to_string());

        //a looser cutoff lets the likelihood winner through; the 2-2 tie on
        //the disputed column keeps the root base anyway
        let loose = pile.consensus_conflict(P_ERROR, 5);
        assert_eq!(loose, root.to_string());

        //with a third agreeing row the call flips
        let pile = build_pile(root, &[truth, truth, truth, other]);
        let consensus = pile.consensus_conflict(P_ERROR, 5);
        assert_eq!(consensus, truth.to_string());
    }

    #[test]
    fn test_qc_check() {
        let root = "GGGGACGTACGTCCCC";
        //only partially covered: the two rows cover the tail only
        let suffix_read = "ACGTCCCCAAAAAAAA";
        let mut pile = build_pile(root, &[suffix_read, suffix_read]);
        assert!(!pile.qc_check());

        //full double coverage passes
        pile = build_pile(root, &[root, root]);
        assert!(pile.qc_check());

        //single coverage is not enough
        pile = build_pile(root, &[root]);
        assert!(!pile.qc_check());
    }

    #[test]
    fn test_update_root_seq() {
        let root = "ACGTTCGTAAGGCCTT";
        let truth = "ACGTACGTAAGGCCTT";
        let mut pile = build_pile(root, &[truth, truth, truth]);
        let consensus = pile.consensus_conflict(P_ERROR, 5);
        pile.update_root_seq(&consensus);
        assert!(pile.qc_check());
    }
}
