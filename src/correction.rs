
extern crate log;

use log::info;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::correction_thresholds::QualityThresholds;
use crate::multi_overlap::MultiOverlap;
use crate::multiple_alignment::MultipleAlignment;
use crate::overlapper::{self, OverlapProvider};
use crate::read_index::ReadIndex;
use crate::string_util;

/// intervals spanning this many entries or more are skipped during seeding;
/// k-mers that common are repeats and would flood the premap
pub const MAX_INTERVAL_SIZE: usize = 500;
/// diagonal band width used when a seed k-mer is unique in both sequences
const OVERLAP_BAND_WIDTH: usize = 20;
/// row cap handed to the consensus calls of the index-driven corrector
const CONSENSUS_MAX_DEPTH: usize = 10000;
/// support required by the final-round consensus of the index-driven corrector
const CONSENSUS_MIN_SUPPORT: usize = 3;
/// per-base error rate assumed by the legacy conflict consensus
const LEGACY_P_ERROR: f64 = 0.01;
/// phred score assumed for reads without a quality string
const DEFAULT_PHRED: u8 = 40;

/// selects which correction pipeline handles a read
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CorrectionAlgorithm {
    /// iterative single-base repair from k-mer support
    Kmer,
    /// seed-and-extend consensus through the read index
    Overlap,
    /// k-mer first, overlap fallback on QC failure
    Hybrid
}

/// stores options for running the correction algorithms
#[derive(Clone, Debug)]
pub struct CorrectionParameters {
    pub algorithm: CorrectionAlgorithm,
    pub kmer_length: usize,
    pub num_kmer_rounds: usize,
    pub num_overlap_rounds: usize,
    pub min_overlap: usize,
    /// minimum overlap identity on a 0-1 scale
    pub min_identity: f64,
    /// dissenting-base bound for the legacy conflict consensus
    pub conflict_cutoff: usize,
    /// overlap-count bound above which the legacy corrector bypasses a read
    pub depth_filter: usize,
    pub print_overlaps: bool
}

impl Default for CorrectionParameters {
    fn default() -> Self {
        Self {
            algorithm: CorrectionAlgorithm::Hybrid,
            kmer_length: 31,
            num_kmer_rounds: 10,
            num_overlap_rounds: 5,
            min_overlap: 45,
            min_identity: 0.95,
            conflict_cutoff: 5,
            depth_filter: 10000,
            print_overlaps: false
        }
    }
}

/// a read queued for correction
#[derive(Clone, Debug)]
pub struct SequenceRecord {
    pub id: String,
    pub seq: String,
    pub qual: Option<String>,
    /// position of the read in the indexed collection; used to keep the read
    /// from overlapping itself
    pub idx: usize
}

impl SequenceRecord {
    /// Returns the phred score of the base at `pos`, or a high default when
    /// the read carries no quality string.
    #[inline]
    pub fn phred_score(&self, pos: usize) -> u8 {
        match &self.qual {
            Some(qual) => string_util::phred_from_char(qual.as_bytes()[pos]),
            None => DEFAULT_PHRED
        }
    }
}

/// the outcome of correcting a single read
#[derive(Clone, Debug)]
pub struct CorrectionResult {
    pub corrected_seq: String,
    pub kmer_qc: bool,
    pub overlap_qc: bool,
    pub num_prefix_overlaps: usize,
    pub num_suffix_overlaps: usize
}

impl CorrectionResult {
    fn unchanged(seq: &str) -> Self {
        Self {
            corrected_seq: seq.to_string(),
            kmer_qc: false,
            overlap_qc: false,
            num_prefix_overlaps: 0,
            num_suffix_overlaps: 0
        }
    }
}

/// Memoizes FM-index count queries for the duration of one read's correction.
struct KmerCountCache<'a> {
    index: &'a ReadIndex,
    cache: HashMap<String, usize>
}

impl<'a> KmerCountCache<'a> {
    fn new(index: &'a ReadIndex) -> Self {
        Self {
            index,
            cache: HashMap::new()
        }
    }

    fn count(&mut self, kmer: &str) -> usize {
        if let Some(&count) = self.cache.get(kmer) {
            return count;
        }
        let count = self.index.count(kmer);
        self.cache.insert(kmer.to_string(), count);
        count
    }
}

/// Corrects reads against a shared read index and overlap provider. One
/// instance serves a whole run; per-read state lives inside each call, so a
/// corrector wrapped in an `Arc` can feed any number of worker threads.
pub struct ErrorCorrector {
    index: Arc<ReadIndex>,
    overlap_provider: Arc<dyn OverlapProvider + Send + Sync>,
    thresholds: QualityThresholds,
    params: CorrectionParameters
}

impl ErrorCorrector {
    /// Creates a corrector over shared services.
    pub fn new(
        index: Arc<ReadIndex>,
        overlap_provider: Arc<dyn OverlapProvider + Send + Sync>,
        thresholds: QualityThresholds,
        params: CorrectionParameters
    ) -> Self {
        assert!(params.kmer_length >= 1);
        Self {
            index,
            overlap_provider,
            thresholds,
            params
        }
    }

    /// Corrects one read, logging QC failures when overlap printing is on.
    pub fn process(&self, read: &SequenceRecord) -> CorrectionResult {
        let result = self.correct(read);
        if !result.kmer_qc && !result.overlap_qc && self.params.print_overlaps {
            info!("{} failed error correction QC", read.id);
        }
        result
    }

    /// Runs the configured correction pipeline on one read.
    pub fn correct(&self, read: &SequenceRecord) -> CorrectionResult {
        match self.params.algorithm {
            CorrectionAlgorithm::Kmer => self.kmer_correction(read),
            CorrectionAlgorithm::Overlap => self.overlap_correction_indexed(read),
            CorrectionAlgorithm::Hybrid => {
                let result = self.kmer_correction(read);
                if !result.kmer_qc {
                    self.overlap_correction_legacy(read)
                } else {
                    result
                }
            }
        }
    }

    /// Iteratively repairs the leftmost base not covered by any well-supported
    /// k-mer. Each round either fixes exactly one base or ends the process;
    /// the read passes QC once every base is covered by a solid k-mer. A read
    /// that fails QC is returned unmodified.
    pub fn kmer_correction(&self, read: &SequenceRecord) -> CorrectionResult {
        let k = self.params.kmer_length;
        let n = read.seq.len();
        if n < k {
            return CorrectionResult::unchanged(&read.seq);
        }
        let nk = n - k + 1;

        //the support threshold of a k-mer depends on its weakest base
        let mut min_phred: Vec<u8> = Vec::with_capacity(nk);
        for i in 0..nk {
            let lowest = (i..i + k).map(|j| read.phred_score(j)).min().unwrap();
            min_phred.push(lowest);
        }

        let mut cache = KmerCountCache::new(&self.index);
        let mut working: Vec<u8> = read.seq.as_bytes().to_vec();
        let mut all_solid = false;
        let mut rounds = 0;

        loop {
            //count every k-mer and mark the bases covered by solid ones
            let mut counts: Vec<usize> = Vec::with_capacity(nk);
            let mut solid: Vec<bool> = vec![false; n];
            for i in 0..nk {
                let kmer = std::str::from_utf8(&working[i..i + k]).unwrap();
                let count = cache.count(kmer);
                counts.push(count);
                if count >= self.thresholds.required_support(min_phred[i]) {
                    for flag in solid.iter_mut().skip(i).take(k) {
                        *flag = true;
                    }
                }
            }

            all_solid = solid.iter().all(|&s| s);
            if all_solid || rounds > self.params.num_kmer_rounds {
                break;
            }
            rounds += 1;

            //attempt to repair the leftmost weak base with its leftmost
            //covering k-mer, then with its rightmost
            let target = solid.iter().position(|&s| !s).unwrap();
            let threshold = self.thresholds.required_support(read.phred_score(target));

            let left_k_idx = if target + 1 >= k { target + 1 - k } else { 0 };
            let left_min = std::cmp::max(counts[left_k_idx], threshold);
            let mut corrected =
                self.attempt_kmer_correction(&mut cache, target, left_k_idx, left_min, &working);

            if corrected.is_none() {
                let right_k_idx = std::cmp::min(target, n - k);
                let right_min = std::cmp::max(counts[right_k_idx], threshold);
                corrected =
                    self.attempt_kmer_correction(&mut cache, target, right_k_idx, right_min, &working);
            }

            match corrected {
                Some(base) => working[target] = base,
                None => break
            }
        }

        if all_solid {
            CorrectionResult {
                corrected_seq: String::from_utf8(working).unwrap(),
                kmer_qc: true,
                overlap_qc: false,
                num_prefix_overlaps: 0,
                num_suffix_overlaps: 0
            }
        } else {
            CorrectionResult::unchanged(&read.seq)
        }
    }

    /// Tries to replace the base at `i` using the k-mer starting at `k_idx`.
    /// Returns the replacement base only when exactly one alternative reaches
    /// `min_count`; two qualifying alternatives are ambiguous and never
    /// resolved by picking either.
    fn attempt_kmer_correction(
        &self,
        cache: &mut KmerCountCache,
        i: usize,
        k_idx: usize,
        min_count: usize,
        seq: &[u8]
    ) -> Option<u8> {
        let k = self.params.kmer_length;
        debug_assert!(i >= k_idx && i < k_idx + k);
        let base_idx = i - k_idx;
        let original = seq[i];

        let mut kmer: Vec<u8> = seq[k_idx..k_idx + k].to_vec();
        let mut best: Option<(u8, usize)> = None;
        let mut num_qualifying = 0;
        for &candidate in string_util::DNA_BASES.iter() {
            if candidate == original {
                continue;
            }
            kmer[base_idx] = candidate;
            let count = cache.count(std::str::from_utf8(&kmer).unwrap());
            if count >= min_count {
                num_qualifying += 1;
                match best {
                    Some((_, best_count)) if count <= best_count => {}
                    _ => best = Some((candidate, count))
                }
            }
        }

        if num_qualifying == 1 {
            best.map(|(base, _)| base)
        } else {
            None
        }
    }

    /// Enumerates the reads sharing at least one k-mer with `current`, on
    /// either strand. Every index inside a small-enough FM interval is
    /// recorded in a premap, then LF-backtracked to the sentinel of its
    /// originating read; the premap doubles as a visited set so each BWT
    /// position is walked at most once even when reads share many k-mers.
    /// The query read itself (`self_idx`) is excluded. Keys of the returned
    /// map are `(read id, reverse strand)`; values are the query k-mer
    /// position that seeded the match.
    pub fn find_overlap_seeds(&self, current: &str, self_idx: usize) -> BTreeMap<(usize, bool), usize> {
        let k = self.params.kmer_length;
        let mut matches: BTreeMap<(usize, bool), usize> = BTreeMap::new();
        if current.len() < k {
            return matches;
        }

        //premap: (bwt index, strand) -> (query position, visited)
        let mut premap: HashMap<(i64, bool), (usize, bool)> = HashMap::new();
        let num_kmers = current.len() - k + 1;
        for i in 0..num_kmers {
            let kmer = &current[i..i + k];
            let interval = self.index.find_interval(kmer);
            if interval.is_valid() && interval.size() < MAX_INTERVAL_SIZE {
                for j in interval.lower..=interval.upper {
                    premap.entry((j, false)).or_insert((i, false));
                }
            }

            let rc_kmer = string_util::reverse_complement(kmer);
            let interval = self.index.find_interval(&rc_kmer);
            if interval.is_valid() && interval.size() < MAX_INTERVAL_SIZE {
                for j in interval.lower..=interval.upper {
                    premap.entry((j, true)).or_insert((i, false));
                }
            }
        }

        //backtrack each entry to a sentinel, short-circuiting into paths that
        //were already walked
        let keys: Vec<(i64, bool)> = premap.keys().cloned().collect();
        for key in keys {
            let position = {
                let entry = premap.get_mut(&key).unwrap();
                if entry.1 {
                    continue;
                }
                entry.1 = true;
                entry.0
            };

            let (mut index_pos, reverse) = key;
            loop {
                let b = self.index.bwt_char(index_pos);
                index_pos = self.index.pc(b) + self.index.occ(b, index_pos - 1);

                if let Some(entry) = premap.get_mut(&(index_pos, reverse)) {
                    if entry.1 {
                        //an earlier walk already covered the rest of this path
                        break;
                    }
                    entry.1 = true;
                }

                if b == b'$' {
                    let read_id = self.index.lookup_lex_rank(index_pos);
                    if read_id != self_idx {
                        matches.entry((read_id, reverse)).or_insert(position);
                    }
                    break;
                }
            }
        }
        debug_assert!(premap.values().all(|&(_, visited)| visited));

        matches
    }

    /// Seed-and-extend correction through the read index: enumerate seeds,
    /// refine each into a proper overlap, stack the survivors into a multiple
    /// alignment, and take the column consensus. Intermediate rounds smooth
    /// aggressively; the final round demands real support and an empty
    /// consensus fails the read.
    pub fn overlap_correction_indexed(&self, read: &SequenceRecord) -> CorrectionResult {
        let k = self.params.kmer_length;
        let mut current = read.seq.clone();
        let mut consensus = String::new();

        let num_rounds = self.params.num_overlap_rounds;
        for round in 0..num_rounds {
            let seeds = self.find_overlap_seeds(&current, read.idx);

            let mut alignment = MultipleAlignment::new();
            alignment.add_base(&current);

            for (&(read_id, reverse), &position) in seeds.iter() {
                let mut match_sequence = self.index.extract_string(read_id);
                if reverse {
                    match_sequence = string_util::reverse_complement(&match_sequence);
                }

                //find the seed k-mer in both sequences; a second occurrence in
                //either forces the full dynamic program instead of the band
                let match_kmer = &current[position..position + k];
                let pos_0 = match current.find(match_kmer) {
                    Some(pos) => pos,
                    None => continue
                };
                let pos_1 = match match_sequence.find(match_kmer) {
                    Some(pos) => pos,
                    None => continue
                };
                let secondary = current[pos_0 + 1..].contains(match_kmer)
                    || match_sequence[pos_1 + 1..].contains(match_kmer);

                let overlap = if secondary {
                    overlapper::compute_overlap(&current, &match_sequence)
                } else {
                    overlapper::extend_match(&current, &match_sequence, pos_0, pos_1, OVERLAP_BAND_WIDTH)
                };

                let passed_overlap = overlap.overlap_length() >= self.params.min_overlap;
                let passed_identity = overlap.percent_identity() / 100.0 >= self.params.min_identity;
                if passed_overlap && passed_identity {
                    alignment.add_overlap(&match_sequence, &overlap);
                }
            }

            let last_round = round == num_rounds - 1;
            if last_round {
                consensus = alignment.consensus(CONSENSUS_MAX_DEPTH, CONSENSUS_MIN_SUPPORT);
            } else {
                current = alignment.consensus(CONSENSUS_MAX_DEPTH, 0);
            }

            if self.params.print_overlaps {
                info!("{} round {} pileup:\n{}", read.id, round, alignment.pileup_string());
            }
        }

        if !consensus.is_empty() {
            CorrectionResult {
                corrected_seq: consensus,
                kmer_qc: false,
                overlap_qc: true,
                num_prefix_overlaps: 0,
                num_suffix_overlaps: 0
            }
        } else {
            CorrectionResult::unchanged(&read.seq)
        }
    }

    /// Consensus correction driven by the overlap provider instead of the
    /// index. Rounds run until the consensus stops changing or the round cap
    /// is hit, then the pile votes on QC. Reads buried in pathologically deep
    /// overlap piles bypass correction entirely and pass QC unchanged.
    pub fn overlap_correction_legacy(&self, read: &SequenceRecord) -> CorrectionResult {
        let mut result = CorrectionResult::unchanged(&read.seq);
        let mut current = read.seq.clone();
        let mut rounds = 0;
        let mut qc_pass = false;

        loop {
            let blocks = self
                .overlap_provider
                .overlap_read(&current, read.idx, self.params.min_overlap);

            let sum_overlaps: usize = blocks.iter().map(|b| b.size).sum();
            if self.params.depth_filter > 0 && sum_overlaps > self.params.depth_filter {
                return CorrectionResult {
                    corrected_seq: current,
                    kmer_qc: false,
                    overlap_qc: true,
                    num_prefix_overlaps: sum_overlaps,
                    num_suffix_overlaps: sum_overlaps
                };
            }

            let mut pile = MultiOverlap::from_blocks(&current, &blocks);
            if self.params.print_overlaps {
                info!("{} pileup:\n{}", read.id, pile.pileup_string());
            }

            let (num_prefix, num_suffix) = pile.count_overlaps();
            result.num_prefix_overlaps = num_prefix;
            result.num_suffix_overlaps = num_suffix;

            let consensus = pile.consensus_conflict(LEGACY_P_ERROR, self.params.conflict_cutoff);

            rounds += 1;
            if rounds >= self.params.num_overlap_rounds || consensus == current {
                //converged or out of rounds: let the pile judge the final call
                pile.update_root_seq(&consensus);
                qc_pass = pile.qc_check();
                result.corrected_seq = consensus;
                break;
            }
            current = consensus;
        }

        result.overlap_qc = qc_pass;
        if !qc_pass {
            result.corrected_seq = read.seq.clone();
        }

        if self.params.print_overlaps {
            info!("OS: {}", read.seq);
            info!("CS: {}", result.corrected_seq);
            info!("DS: {}", string_util::diff_string(&read.seq, &result.corrected_seq));
            if let Some(qual) = &read.qual {
                info!("QS: {}", qual);
            }
            info!("QC: {}", if result.overlap_qc { "pass" } else { "fail" });
        }

        result
    }
}
