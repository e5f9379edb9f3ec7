
extern crate clap;
extern crate env_logger;
extern crate exitcode;
extern crate log;
extern crate needletail;

use clap::{value_t, App, Arg};
use log::{error, info};
use needletail::parse_fastx_file;
use std::fs::File;
use std::sync::{mpsc, Arc};
use threadpool::ThreadPool;

use srec::correction::{
    CorrectionAlgorithm, CorrectionParameters, CorrectionResult, ErrorCorrector, SequenceRecord
};
use srec::correction_thresholds::QualityThresholds;
use srec::overlapper::ExhaustiveOverlapper;
use srec::post_process::CorrectionPostProcessor;
use srec::read_index::ReadIndex;

const VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");

fn main() {
    //initialize logging for our benefit later
    env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

    //non-cli parameters
    const JOB_SLOTS: u64 = 10000;
    const UPDATE_INTERVAL: u64 = 10000;

    //this is the CLI block, params that get populated appear before
    let reads_fn: String;
    let corrected_fn: String;
    let mut algorithm_name: String = "hybrid".to_string();
    let mut kmer_length: usize = 31;
    let mut num_kmer_rounds: usize = 10;
    let mut num_overlap_rounds: usize = 5;
    let mut min_overlap: usize = 45;
    let mut min_identity: f64 = 0.95;
    let mut conflict_cutoff: usize = 5;
    let mut depth_filter: usize = 10000;
    let mut threads: usize = 1;
    let print_overlaps: bool;

    let matches = App::new("srec")
        .version(VERSION.unwrap_or("?"))
        .about("Short-read error corrector - corrects reads against an FM-index of the read collection")
        .arg(Arg::with_name("algorithm")
            .short("a")
            .long("algorithm")
            .takes_value(true)
            .help("correction algorithm: kmer, overlap, or hybrid (default: hybrid)"))
        .arg(Arg::with_name("kmer_length")
            .short("k")
            .long("kmer_length")
            .takes_value(true)
            .help("k-mer length used for support checks and seeding (default: 31)"))
        .arg(Arg::with_name("kmer_rounds")
            .long("kmer_rounds")
            .takes_value(true)
            .help("number of k-mer correction rounds (default: 10)"))
        .arg(Arg::with_name("overlap_rounds")
            .long("overlap_rounds")
            .takes_value(true)
            .help("number of overlap correction rounds (default: 5)"))
        .arg(Arg::with_name("min_overlap")
            .short("m")
            .long("min_overlap")
            .takes_value(true)
            .help("minimum accepted overlap length (default: 45)"))
        .arg(Arg::with_name("min_identity")
            .short("i")
            .long("min_identity")
            .takes_value(true)
            .help("minimum accepted overlap identity in [0, 1] (default: 0.95)"))
        .arg(Arg::with_name("conflict_cutoff")
            .short("c")
            .long("conflict_cutoff")
            .takes_value(true)
            .help("maximum dissenting bases tolerated per consensus column (default: 5)"))
        .arg(Arg::with_name("depth_filter")
            .short("d")
            .long("depth_filter")
            .takes_value(true)
            .help("overlap count above which a read bypasses overlap correction (default: 10000)"))
        .arg(Arg::with_name("threads")
            .short("t")
            .long("threads")
            .takes_value(true)
            .help("number of correction threads (default: 1)"))
        .arg(Arg::with_name("discard")
            .long("discard")
            .takes_value(true)
            .help("write QC-fail reads to this FASTA file instead of the corrected output"))
        .arg(Arg::with_name("metrics")
            .long("metrics")
            .takes_value(true)
            .help("collect per-base correction metrics and write them to this file"))
        .arg(Arg::with_name("print_overlaps")
            .short("p")
            .long("print_overlaps")
            .help("log overlap pileups and per-read QC outcomes"))
        .arg(Arg::with_name("READS")
            .help("The FASTX file with reads to correct; the index is built over these same reads")
            .required(true)
            .index(1))
        .arg(Arg::with_name("CORRECTED")
            .help("The FASTA file to write corrected reads to")
            .required(true)
            .index(2))
        .get_matches();

    //pull out required values
    reads_fn = matches.value_of("READS").unwrap().to_string();
    corrected_fn = matches.value_of("CORRECTED").unwrap().to_string();

    //now check options
    print_overlaps = matches.is_present("print_overlaps");
    algorithm_name = matches.value_of("algorithm").unwrap_or(&algorithm_name).to_string();
    kmer_length = value_t!(matches.value_of("kmer_length"), usize).unwrap_or(kmer_length);
    num_kmer_rounds = value_t!(matches.value_of("kmer_rounds"), usize).unwrap_or(num_kmer_rounds);
    num_overlap_rounds = value_t!(matches.value_of("overlap_rounds"), usize).unwrap_or(num_overlap_rounds);
    min_overlap = value_t!(matches.value_of("min_overlap"), usize).unwrap_or(min_overlap);
    min_identity = value_t!(matches.value_of("min_identity"), f64).unwrap_or(min_identity);
    conflict_cutoff = value_t!(matches.value_of("conflict_cutoff"), usize).unwrap_or(conflict_cutoff);
    depth_filter = value_t!(matches.value_of("depth_filter"), usize).unwrap_or(depth_filter);
    threads = value_t!(matches.value_of("threads"), usize).unwrap_or(threads);
    let discard_fn: Option<String> = matches.value_of("discard").map(|s| s.to_string());
    let metrics_fn: Option<String> = matches.value_of("metrics").map(|s| s.to_string());

    let algorithm = match algorithm_name.as_str() {
        "kmer" => CorrectionAlgorithm::Kmer,
        "overlap" => CorrectionAlgorithm::Overlap,
        "hybrid" => CorrectionAlgorithm::Hybrid,
        other => {
            error!("Unknown --algorithm value: \"{}\"", other);
            std::process::exit(exitcode::DATAERR);
        }
    };
    if kmer_length < 1 {
        error!("--kmer_length must be at least 1");
        std::process::exit(exitcode::DATAERR);
    }
    if !(0.0..=1.0).contains(&min_identity) {
        error!("--min_identity must be within the range [0, 1]");
        std::process::exit(exitcode::DATAERR);
    }
    if threads < 1 {
        error!("--threads must be at least 1");
        std::process::exit(exitcode::DATAERR);
    }

    info!("Input parameters (required):");
    info!("\tReads: \"{}\"", reads_fn);
    match File::open(&reads_fn) {
        Ok(_) => {}
        Err(e) => {
            error!("Failed to open reads file: {:?}", e);
            std::process::exit(exitcode::NOINPUT);
        }
    };

    info!("\tOutput corrected reads: \"{}\"", corrected_fn);
    let corrected_file: File = match File::create(&corrected_fn) {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to create output corrected reads file: {:?}", e);
            std::process::exit(exitcode::NOINPUT);
        }
    };
    let discard_file: Option<File> = match &discard_fn {
        Some(discard_fn) => {
            info!("\tDiscarded reads: \"{}\"", discard_fn);
            match File::create(discard_fn) {
                Ok(file) => Some(file),
                Err(e) => {
                    error!("Failed to create discard reads file: {:?}", e);
                    std::process::exit(exitcode::NOINPUT);
                }
            }
        }
        None => None
    };

    info!("Execution Parameters:");
    info!("\talgorithm: {}", algorithm_name);
    info!("\tthreads: {}", threads);
    info!("Correction Parameters:");
    info!("\tk-mer length: {}", kmer_length);
    info!("\tk-mer rounds: {}", num_kmer_rounds);
    info!("\toverlap rounds: {}", num_overlap_rounds);
    info!("\tminimum overlap: {}", min_overlap);
    info!("\tminimum identity: {}", min_identity);
    info!("\tconflict cutoff: {}", conflict_cutoff);
    info!("\tdepth filter: {}", depth_filter);

    let params = CorrectionParameters {
        algorithm,
        kmer_length,
        num_kmer_rounds,
        num_overlap_rounds,
        min_overlap,
        min_identity,
        conflict_cutoff,
        depth_filter,
        print_overlaps
    };

    //load the whole collection; the index is built over the same reads we correct
    info!("Loading reads...");
    let mut reads: Vec<SequenceRecord> = Vec::new();
    match parse_fastx_file(&reads_fn) {
        Ok(mut fastx_reader) => {
            while let Some(raw_record) = fastx_reader.next() {
                let record = match raw_record {
                    Ok(record) => record,
                    Err(e) => {
                        error!("Invalid record while parsing reads file: {:?}", e);
                        std::process::exit(exitcode::IOERR);
                    }
                };
                let idx = reads.len();
                reads.push(SequenceRecord {
                    id: String::from_utf8(record.id().to_vec()).unwrap(),
                    seq: String::from_utf8(record.seq().to_ascii_uppercase()).unwrap(),
                    qual: record.qual().map(|q| String::from_utf8(q.to_vec()).unwrap()),
                    idx
                });
            }
        }
        Err(e) => {
            error!("Failed to open reads file: {:?}", e);
            std::process::exit(exitcode::IOERR);
        }
    }
    info!("Loaded {} reads", reads.len());
    if reads.is_empty() {
        error!("No reads found in input file");
        std::process::exit(exitcode::DATAERR);
    }

    info!("Building read index...");
    let seqs: Vec<&str> = reads.iter().map(|r| r.seq.as_str()).collect();
    let index = Arc::new(ReadIndex::from_reads(&seqs));
    drop(seqs);

    let thresholds: QualityThresholds = Default::default();
    let provider = Arc::new(ExhaustiveOverlapper::new(index.clone()));
    let corrector = Arc::new(ErrorCorrector::new(index, provider, thresholds, params));
    let mut post_processor =
        CorrectionPostProcessor::new(corrected_file, discard_file, metrics_fn.is_some());

    //we need to set up the multiprocessing components now
    let pool = ThreadPool::new(threads);
    let (tx, rx) = mpsc::channel();

    let mut jobs_queued: u64 = 0;
    let mut results_received: u64 = 0;

    info!("Starting read correction processes...");
    for read in reads {
        //if we've filled our queue, then we should wait until we get some results back
        if jobs_queued - results_received >= JOB_SLOTS {
            let (read_index, read, result): (u64, SequenceRecord, CorrectionResult) =
                rx.recv().unwrap();
            match post_processor.write_ordered(read_index, read, result) {
                Ok(()) => {}
                Err(e) => {
                    error!("Failed while writing read correction: {:?}", e);
                    std::process::exit(exitcode::IOERR);
                }
            };
            results_received += 1;
            if results_received % UPDATE_INTERVAL == 0 {
                info!("Processed {} reads...", results_received);
            }
        }

        //clone the transmit channel and submit the pool job
        let tx = tx.clone();
        let corrector = corrector.clone();
        let job_index = jobs_queued;
        pool.execute(move || {
            let result = corrector.process(&read);
            tx.send((job_index, read, result))
                .expect("channel will be there waiting for the pool");
        });
        jobs_queued += 1;
    }

    while results_received < jobs_queued {
        let (read_index, read, result): (u64, SequenceRecord, CorrectionResult) = rx.recv().unwrap();
        match post_processor.write_ordered(read_index, read, result) {
            Ok(()) => {}
            Err(e) => {
                error!("Failed while writing read correction: {:?}", e);
                std::process::exit(exitcode::IOERR);
            }
        };
        results_received += 1;
        if results_received % UPDATE_INTERVAL == 0 {
            info!("Processed {} reads...", results_received);
        }
    }

    let summary = match post_processor.finalize() {
        Ok(summary) => summary,
        Err(e) => {
            error!("Failed while finalizing outputs: {:?}", e);
            std::process::exit(exitcode::IOERR);
        }
    };

    if let Some(metrics_fn) = metrics_fn {
        info!("Writing metrics to \"{}\"", metrics_fn);
        let mut metrics_file: File = match File::create(&metrics_fn) {
            Ok(file) => file,
            Err(e) => {
                error!("Failed to create metrics file: {:?}", e);
                std::process::exit(exitcode::IOERR);
            }
        };
        match post_processor.write_metrics(&mut metrics_file) {
            Ok(()) => {}
            Err(e) => {
                error!("Failed while writing metrics: {:?}", e);
                std::process::exit(exitcode::IOERR);
            }
        };
    }

    info!(
        "Finished processing {} total reads ({} kept, {} discarded)",
        results_received, summary.reads_kept, summary.reads_discarded
    );
}
