
extern crate log;

use log::info;
use needletail::parse_fastx_file;

/// number of distinct symbols tracked by the index: `$ A C G N T`
pub const ALPHABET_SIZE: usize = 6;
/// spacing of the sampled occurrence counts
const OCC_CHECKPOINT: usize = 64;

/// contains ASCII symbol to alphabet rank encoding
static SYMBOL_RANK: [u8; ALPHABET_SIZE_TABLE] = build_symbol_rank();
const ALPHABET_SIZE_TABLE: usize = 256;

/// builds up the SYMBOL_RANK const for us
const fn build_symbol_rank() -> [u8; ALPHABET_SIZE_TABLE] {
    let mut ret: [u8; ALPHABET_SIZE_TABLE] = [4; ALPHABET_SIZE_TABLE];

    ret[b'$' as usize] = 0;
    ret[b'A' as usize] = 1;
    ret[b'C' as usize] = 2;
    ret[b'G' as usize] = 3;
    ret[b'N' as usize] = 4;
    ret[b'T' as usize] = 5;

    ret
}

/// Basic struct for containing a range in a BWT. Bounds are inclusive; a range
/// with `upper < lower` is empty/invalid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BwtInterval {
    /// the lower bound, inclusive
    pub lower: i64,
    /// the upper bound, inclusive
    pub upper: i64
}

impl BwtInterval {
    /// Returns true if the interval contains at least one element.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.lower <= self.upper
    }

    /// Returns the number of elements in the interval.
    #[inline]
    pub fn size(&self) -> usize {
        if self.is_valid() {
            (self.upper - self.lower + 1) as usize
        } else {
            0
        }
    }
}

/// A BWT + FM-index built over a collection of short reads. Each read is
/// terminated by its own sentinel; sentinels order below the bases and between
/// themselves by read index, so the sentinel suffixes occupy the first
/// `num_reads` ranks in read order. The index supports the backward-search,
/// occurrence, and string-extraction queries used by the correctors, plus the
/// lexicographic-rank lookup that resolves a sentinel hit to its read id.
///
/// The index is read-only after construction and safe to share across worker
/// threads behind an `Arc`.
pub struct ReadIndex {
    bwt: Vec<u8>,
    /// prefix symbol counts sampled every `OCC_CHECKPOINT` positions
    occ_checkpoints: Vec<[u64; ALPHABET_SIZE]>,
    /// total occurrences of each symbol
    total_counts: [u64; ALPHABET_SIZE],
    /// number of symbols lexicographically smaller, the classic `C` array
    start_index: [u64; ALPHABET_SIZE],
    /// read id terminated by the k-th sentinel in BWT order
    lex_rank_to_id: Vec<usize>,
    num_reads: usize
}

impl ReadIndex {
    /// Builds the index from a collection of read sequences. Read `r` is
    /// addressable afterwards as id `r`.
    /// # Arguments
    /// * `reads` - the read sequences; all must be non-empty
    /// # Examples
    /// ```rust
    /// use srec::read_index::ReadIndex;
    /// let index = ReadIndex::from_reads(&["ACGT", "CCGG"]);
    /// assert_eq!(index.count("CG"), 2);
    /// assert_eq!(index.extract_string(1), "CCGG".to_string());
    /// ```
    pub fn from_reads(reads: &[&str]) -> ReadIndex {
        let num_reads = reads.len();
        let total_len: usize = reads.iter().map(|r| r.len() + 1).sum();
        assert!(reads.iter().all(|r| !r.is_empty()));

        //enumerate every per-read suffix, including the empty sentinel suffix
        let mut suffixes: Vec<(u32, u32)> = Vec::with_capacity(total_len);
        for (r, read) in reads.iter().enumerate() {
            for p in 0..=read.len() {
                suffixes.push((r as u32, p as u32));
            }
        }

        //byte-order comparison realizes $ < A < C < G < N < T because the
        //sentinel terminates the slice; identical suffixes order by read index
        suffixes.sort_unstable_by(|a, b| {
            let sa = &reads[a.0 as usize].as_bytes()[a.1 as usize..];
            let sb = &reads[b.0 as usize].as_bytes()[b.1 as usize..];
            sa.cmp(sb).then_with(|| a.0.cmp(&b.0))
        });

        //the BWT character of a suffix is its in-read predecessor; position 0
        //wraps to the read's own sentinel
        let mut bwt: Vec<u8> = Vec::with_capacity(total_len);
        let mut lex_rank_to_id: Vec<usize> = Vec::with_capacity(num_reads);
        for &(r, p) in suffixes.iter() {
            let read = reads[r as usize].as_bytes();
            if p == 0 {
                bwt.push(b'$');
                lex_rank_to_id.push(r as usize);
            } else {
                bwt.push(read[p as usize - 1]);
            }
        }

        let mut index = ReadIndex {
            bwt,
            occ_checkpoints: Vec::new(),
            total_counts: [0; ALPHABET_SIZE],
            start_index: [0; ALPHABET_SIZE],
            lex_rank_to_id,
            num_reads
        };
        index.build_occ();
        info!("Constructed read index: {} reads, {} symbols", num_reads, total_len);
        index
    }

    /// Loads every sequence in a FASTA/FASTQ file (plain or gzipped) and builds
    /// the index over them, in file order.
    /// # Arguments
    /// * `filename` - the FASTX file to index
    pub fn from_fastx_file(filename: &str) -> Result<ReadIndex, Box<dyn std::error::Error>> {
        let mut sequences: Vec<String> = Vec::new();
        let mut fastx_reader = parse_fastx_file(filename)?;
        while let Some(raw_record) = fastx_reader.next() {
            let record = raw_record?;
            let seq = String::from_utf8(record.seq().to_ascii_uppercase())?;
            sequences.push(seq);
        }
        info!("Loaded {} reads from \"{}\" for indexing", sequences.len(), filename);
        let refs: Vec<&str> = sequences.iter().map(|s| s.as_str()).collect();
        Ok(ReadIndex::from_reads(&refs))
    }

    fn build_occ(&mut self) {
        let num_checkpoints = (self.bwt.len() as f64 / OCC_CHECKPOINT as f64).ceil() as usize;
        self.occ_checkpoints = Vec::with_capacity(num_checkpoints);
        let mut running: [u64; ALPHABET_SIZE] = [0; ALPHABET_SIZE];
        for (i, &b) in self.bwt.iter().enumerate() {
            if i % OCC_CHECKPOINT == 0 {
                self.occ_checkpoints.push(running);
            }
            running[SYMBOL_RANK[b as usize] as usize] += 1;
        }
        self.total_counts = running;

        let mut sum_offset: u64 = 0;
        for i in 0..ALPHABET_SIZE {
            self.start_index[i] = sum_offset;
            sum_offset += self.total_counts[i];
        }
    }

    /// Returns the number of reads in the collection.
    #[inline]
    pub fn num_reads(&self) -> usize {
        self.num_reads
    }

    /// Returns the total length of the BWT, sentinels included.
    #[inline]
    pub fn len(&self) -> usize {
        self.bwt.len()
    }

    /// Returns true if the index holds no reads.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_reads == 0
    }

    /// Returns the BWT character at `index`. Sentinels are reported as `$`.
    #[inline]
    pub fn bwt_char(&self, index: i64) -> u8 {
        self.bwt[index as usize]
    }

    /// Returns the number of symbols lexicographically smaller than `symbol`,
    /// the `C` component of the LF-mapping.
    #[inline]
    pub fn pc(&self, symbol: u8) -> i64 {
        self.start_index[SYMBOL_RANK[symbol as usize] as usize] as i64
    }

    /// Returns the number of occurrences of `symbol` in `bwt[0..=index]`.
    /// An index of `-1` yields 0, so `pc(b) + occ(b, i - 1)` is the LF step.
    /// # Arguments
    /// * `symbol` - the symbol to count
    /// * `index` - the inclusive upper position
    pub fn occ(&self, symbol: u8, index: i64) -> i64 {
        if index < 0 {
            return 0;
        }
        let idx = index as usize;
        let rank = SYMBOL_RANK[symbol as usize] as usize;
        let block = idx / OCC_CHECKPOINT;
        let mut count = self.occ_checkpoints[block][rank];
        for &b in &self.bwt[block * OCC_CHECKPOINT..=idx] {
            if SYMBOL_RANK[b as usize] as usize == rank {
                count += 1;
            }
        }
        count as i64
    }

    /// Performs backward search for a k-mer, returning its (possibly invalid)
    /// interval in the BWT.
    /// # Arguments
    /// * `kmer` - the pattern to look up
    /// # Examples
    /// ```rust
    /// use srec::read_index::ReadIndex;
    /// let index = ReadIndex::from_reads(&["ACGT", "CCGG"]);
    /// let interval = index.find_interval("CG");
    /// assert!(interval.is_valid());
    /// assert_eq!(interval.size(), 2);
    /// assert!(!index.find_interval("TG").is_valid());
    /// ```
    pub fn find_interval(&self, kmer: &str) -> BwtInterval {
        let mut ret = BwtInterval {
            lower: 0,
            upper: self.bwt.len() as i64 - 1
        };
        for &c in kmer.as_bytes().iter().rev() {
            ret = BwtInterval {
                lower: self.pc(c) + self.occ(c, ret.lower - 1),
                upper: self.pc(c) + self.occ(c, ret.upper) - 1
            };
            if !ret.is_valid() {
                return ret;
            }
        }
        ret
    }

    /// Returns the number of occurrences of `kmer` on the forward strand.
    #[inline]
    pub fn count(&self, kmer: &str) -> usize {
        self.find_interval(kmer).size()
    }

    /// Resolves the LF rank of a sentinel hit to the id of the read it
    /// terminates. Valid inputs are in `[0, num_reads)`.
    /// # Arguments
    /// * `rank` - the rank produced by stepping through a `$` character
    #[inline]
    pub fn lookup_lex_rank(&self, rank: i64) -> usize {
        self.lex_rank_to_id[rank as usize]
    }

    /// Reconstructs the sequence of read `read_id` by walking the LF-mapping
    /// backwards from the read's sentinel suffix.
    /// # Arguments
    /// * `read_id` - the read to extract
    pub fn extract_string(&self, read_id: usize) -> String {
        assert!(read_id < self.num_reads);
        //the sentinel suffixes occupy ranks [0, num_reads) in read order
        let mut index = read_id as i64;
        let mut ret: Vec<u8> = Vec::new();
        loop {
            let b = self.bwt_char(index);
            if b == b'$' {
                break;
            }
            ret.push(b);
            index = self.pc(b) + self.occ(b, index - 1);
        }
        ret.reverse();
        String::from_utf8(ret).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, GzBuilder};
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn build_simple_index() -> ReadIndex {
        ReadIndex::from_reads(&["ACGT", "CCGG"])
    }

    #[test]
    fn test_symbol_totals() {
        let index = build_simple_index();
        //$ A C G N T over "ACGT" + "CCGG"
        let expected_totals: [u64; ALPHABET_SIZE] = [2, 1, 3, 3, 0, 1];
        assert_eq!(index.total_counts, expected_totals);
        assert_eq!(index.len(), 10);
        assert_eq!(index.num_reads(), 2);

        //C array
        assert_eq!(index.pc(b'$'), 0);
        assert_eq!(index.pc(b'A'), 2);
        assert_eq!(index.pc(b'C'), 3);
        assert_eq!(index.pc(b'G'), 6);
        assert_eq!(index.pc(b'N'), 9);
        assert_eq!(index.pc(b'T'), 9);
    }

    #[test]
    fn test_count_kmers() {
        let index = build_simple_index();

        //1-mers
        assert_eq!(index.count("A"), 1);
        assert_eq!(index.count("C"), 3);
        assert_eq!(index.count("G"), 3);
        assert_eq!(index.count("T"), 1);

        //2-mers
        assert_eq!(index.count("AC"), 1);
        assert_eq!(index.count("CG"), 2);
        assert_eq!(index.count("GT"), 1);
        assert_eq!(index.count("CC"), 1);
        assert_eq!(index.count("GG"), 1);
        assert_eq!(index.count("TG"), 0);

        //full reads and absent patterns
        assert_eq!(index.count("ACGT"), 1);
        assert_eq!(index.count("CCGG"), 1);
        assert_eq!(index.count("TTTT"), 0);
    }

    #[test]
    fn test_find_interval() {
        let index = build_simple_index();
        let interval = index.find_interval("CG");
        assert!(interval.is_valid());
        assert_eq!(interval.size(), 2);

        let invalid = index.find_interval("GA");
        assert!(!invalid.is_valid());
        assert_eq!(invalid.size(), 0);
    }

    #[test]
    fn test_extract_and_lex_rank() {
        let reads = ["ACGT", "CCGG", "TTACG", "ACGT"];
        let index = ReadIndex::from_reads(&reads);
        for (i, read) in reads.iter().enumerate() {
            assert_eq!(index.extract_string(i), read.to_string());
        }

        //walking backwards from inside any read must resolve to that read
        for expected_id in 0..reads.len() {
            //start at the read's sentinel rank and LF-walk the whole read
            let mut index_pos = expected_id as i64;
            loop {
                let b = index.bwt_char(index_pos);
                index_pos = index.pc(b) + index.occ(b, index_pos - 1);
                if b == b'$' {
                    assert_eq!(index.lookup_lex_rank(index_pos), expected_id);
                    break;
                }
            }
        }
    }

    #[test]
    fn test_occ_across_checkpoints() {
        //force multiple checkpoint blocks with a larger collection
        let read = "ACGTACGTACGTACGTACGTACGTACGTACGT";
        let reads: Vec<&str> = vec![read; 8];
        let index = ReadIndex::from_reads(&reads);
        assert!(index.len() > OCC_CHECKPOINT);

        assert_eq!(index.count("ACGTACGT"), 8 * 7); //7 occurrences per read
        assert_eq!(index.count(read), 8);
        let total = index.len() as i64;
        assert_eq!(index.occ(b'A', total - 1) + index.occ(b'C', total - 1)
            + index.occ(b'G', total - 1) + index.occ(b'T', total - 1)
            + index.occ(b'$', total - 1), total);
    }

    fn write_strings_to_fqgz(data: Vec<&str>) -> NamedTempFile {
        let file: NamedTempFile = Builder::new().prefix("temp_data_").suffix(".fq.gz").tempfile().unwrap();
        let mut gz = GzBuilder::new().write(file, Compression::default());
        for (i, s) in data.iter().enumerate() {
            writeln!(gz, "@seq_{}\n{}\n+\n{}", i, s, "F".repeat(s.len())).unwrap();
        }

        //have to keep the file handle or everything blows up
        gz.finish().unwrap()
    }

    #[test]
    fn test_load_from_fastx() {
        let data: Vec<&str> = vec!["CCGT", "ACG", "TTACGTT"];
        let file = write_strings_to_fqgz(data.clone());
        let index = ReadIndex::from_fastx_file(file.path().to_str().unwrap()).unwrap();

        assert_eq!(index.num_reads(), 3);
        for (i, read) in data.iter().enumerate() {
            assert_eq!(index.extract_string(i), read.to_string());
        }
        assert_eq!(index.count("ACG"), 2);
    }
}
