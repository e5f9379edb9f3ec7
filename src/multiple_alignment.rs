
use crate::overlapper::SequenceOverlap;

/// the candidate symbols considered when calling a consensus column
const CALL_SYMBOLS: [u8; 5] = [b'A', b'C', b'G', b'N', b'T'];

/// Projects an overlapping sequence onto the coordinates of the base sequence
/// it was aligned against. Only `M` columns deposit a base; inserted bases are
/// skipped and deleted columns stay empty.
pub fn project_onto_base(base_len: usize, seq: &str, overlap: &SequenceOverlap) -> Vec<Option<u8>> {
    let seq_bytes = seq.as_bytes();
    let mut row: Vec<Option<u8>> = vec![None; base_len];
    let mut base_pos = overlap.match_a.start;
    let mut seq_pos = overlap.match_b.start;
    for op in &overlap.cigar {
        match op.op {
            b'M' => {
                for _ in 0..op.len {
                    row[base_pos] = Some(seq_bytes[seq_pos]);
                    base_pos += 1;
                    seq_pos += 1;
                }
            }
            b'D' => {
                base_pos += op.len;
            }
            b'I' => {
                seq_pos += op.len;
            }
            _ => unreachable!("unknown cigar op {}", op.op as char)
        }
    }
    row
}

/// A stack of sequences projected onto a base sequence. Row 0 is the base
/// read itself at column offset 0; each added overlap contributes one row of
/// bases in base-read column coordinates.
pub struct MultipleAlignment {
    base: Vec<u8>,
    rows: Vec<Vec<Option<u8>>>
}

impl Default for MultipleAlignment {
    fn default() -> Self {
        Self {
            base: Vec::new(),
            rows: Vec::new()
        }
    }
}

impl MultipleAlignment {
    pub fn new() -> Self {
        Default::default()
    }

    /// Initializes row 0 with the base sequence all other rows project onto.
    pub fn add_base(&mut self, seq: &str) {
        assert!(self.base.is_empty());
        self.base = seq.as_bytes().to_vec();
    }

    /// Appends a row for an overlapping sequence.
    /// # Arguments
    /// * `seq` - the overlapping sequence, already oriented like the base
    /// * `overlap` - its pairwise overlap against the base sequence
    pub fn add_overlap(&mut self, seq: &str, overlap: &SequenceOverlap) {
        assert!(!self.base.is_empty());
        self.rows.push(project_onto_base(self.base.len(), seq, overlap));
    }

    /// Returns the number of rows, the base row included.
    pub fn num_rows(&self) -> usize {
        1 + self.rows.len()
    }

    /// Calls a consensus over the base columns. Each column takes the
    /// plurality base of the rows aligned there (ties keep the base row's
    /// base) provided the plurality reaches `min_support`; otherwise the base
    /// row's base is kept. Leading and trailing columns whose total depth
    /// falls short of `min_support` are trimmed away, so a sparsely covered
    /// alignment can produce a shortened or empty consensus. With
    /// `min_support` 0 the call is a plain plurality vote over the full
    /// length.
    /// # Arguments
    /// * `max_depth` - maximum number of rows considered per column
    /// * `min_support` - support needed to call a column away from the base
    /// # Examples
    /// ```rust
    /// use srec::multiple_alignment::MultipleAlignment;
    /// let mut ma = MultipleAlignment::new();
    /// ma.add_base("ACGT");
    /// assert_eq!(ma.consensus(10000, 0), "ACGT".to_string());
    /// assert_eq!(ma.consensus(10000, 3), "".to_string());
    /// ```
    pub fn consensus(&self, max_depth: usize, min_support: usize) -> String {
        assert!(!self.base.is_empty());
        let considered = self.rows.len().min(max_depth.saturating_sub(1));

        let mut called: Vec<u8> = Vec::with_capacity(self.base.len());
        let mut depths: Vec<usize> = Vec::with_capacity(self.base.len());
        for col in 0..self.base.len() {
            let mut counts: [usize; 256] = [0; 256];
            counts[self.base[col] as usize] += 1;
            let mut depth = 1;
            for row in &self.rows[..considered] {
                if let Some(b) = row[col] {
                    counts[b as usize] += 1;
                    depth += 1;
                }
            }

            let mut call = self.base[col];
            let mut best = counts[call as usize];
            for &symbol in CALL_SYMBOLS.iter() {
                if counts[symbol as usize] > best {
                    best = counts[symbol as usize];
                    call = symbol;
                }
            }

            called.push(if best >= min_support { call } else { self.base[col] });
            depths.push(depth);
        }

        //trim the ends that lack the required coverage
        let first = match depths.iter().position(|&d| d >= min_support) {
            Some(first) => first,
            None => return String::new()
        };
        let last = depths.iter().rposition(|&d| d >= min_support).unwrap();
        String::from_utf8(called[first..=last].to_vec()).unwrap()
    }

    /// Renders the stack for diagnostic output, one line per row, with `.`
    /// in unaligned cells.
    pub fn pileup_string(&self) -> String {
        let mut lines: Vec<String> = Vec::with_capacity(self.num_rows());
        lines.push(String::from_utf8(self.base.clone()).unwrap());
        for row in &self.rows {
            let rendered: String = row
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

    #[test]
    fn test_single_row_identity() {
        let mut ma = MultipleAlignment::new();
        ma.add_base("ACGTACGT");
        assert_eq!(ma.consensus(10000, 0), "ACGTACGT".to_string());
    }

    #[test]
    fn test_single_row_trims_to_empty() {
        let mut ma = MultipleAlignment::new();
        ma.add_base("ACGTACGT");
        assert_eq!(ma.consensus(10000, 3), "".to_string());
    }

    #[test]
    fn test_plurality_correction() {
        //base has an error at position 4 relative to three agreeing rows
        let base = "ACGTTCGTACGTACGT";
        let other = "ACGTACGTACGTACGT";
        let mut ma = MultipleAlignment::new();
        ma.add_base(base);
        for _ in 0..3 {
            let overlap = compute_overlap(base, other);
            ma.add_overlap(other, &overlap);
        }
        assert_eq!(ma.num_rows(), 4);
        assert_eq!(ma.consensus(10000, 0), other.to_string());
        assert_eq!(ma.consensus(10000, 3), other.to_string());
    }

    #[test]
    fn test_min_support_veto() {
        //a single disagreeing row cannot outvote the base at min_support 3
        let base = "ACGTTCGTACGTACGT";
        let other = "ACGTACGTACGTACGT";
        let mut ma = MultipleAlignment::new();
        ma.add_base(base);
        let overlap = compute_overlap(base, other);
        ma.add_overlap(other, &overlap);

        //plurality at position 4 is a 1-1 tie, which keeps the base
        assert_eq!(ma.consensus(10000, 0), base.to_string());
        //with a support requirement the full-depth columns survive trimming
        //but the disputed call still stays with the base
        assert_eq!(ma.consensus(10000, 2), base.to_string());
    }

    #[test]
    fn test_max_depth_caps_rows() {
        let base = "ACGTTCGTACGTACGT";
        let other = "ACGTACGTACGTACGT";
        let mut ma = MultipleAlignment::new();
        ma.add_base(base);
        for _ in 0..3 {
            let overlap = compute_overlap(base, other);
            ma.add_overlap(other, &overlap);
        }
        //a depth cap of 1 leaves only the base row
        assert_eq!(ma.consensus(1, 0), base.to_string());
    }

    #[test]
    fn test_partial_coverage_trim() {
        //the overlapping row only covers the tail half of the base
        let base = "GGGGACGTACGT";
        let other = "ACGTACGTTTTT";
        let mut ma = MultipleAlignment::new();
        ma.add_base(base);
        let overlap = compute_overlap(base, other);
        ma.add_overlap(other, &overlap);
        ma.add_overlap(other, &overlap);

        //columns 0..4 have depth 1 and are trimmed at min_support 2
        assert_eq!(ma.consensus(10000, 2), "ACGTACGT".to_string());
    }

    #[test]
    fn test_pileup_string() {
        let base = "GGGGACGTACGT";
        let other = "ACGTACGTTTTT";
        let mut ma = MultipleAlignment::new();
        ma.add_base(base);
        let overlap = compute_overlap(base, other);
        ma.add_overlap(other, &overlap);
        let pileup = ma.pileup_string();
        let lines: Vec<&str> = pileup.split('\n').collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], base);
        assert_eq!(lines[1], "....ACGTACGT");
    }
}
