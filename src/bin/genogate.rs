//! genogate command line
//!
//! genogate search --seq [-s] seq \[--threshold [-t] f\] \[--score\] \[--catalogue [-c] id\]...
//!
//! - --seq : the sequence (possibly fasta formatted) or @file to read it from a file
//! - --threshold : fraction of query k-mers a genome must contain, default 0.4
//! - --score : ask for engine scores
//! - --catalogue : restrict the search to a catalogue, can be repeated
//!
//! The configuration is read from the yaml file named by GENOGATE_CONFIG. The json response is printed
//! on stdout. A rejected or failed request prints {field, message} and exits with code 2, engine
//! diagnostics only go to the log.
//!
//! genogate index --genomes [-g] dir --output [-o] name \[--glob pattern\] \[--kmer [-k] k\] \[--clobber\]
//!
//! Builds the k-mer catalogue of the genomes in dir. The manifest name.genogate.json is what the
//! configuration must point to.
//!
//! genogate ingest --pages [-p] first_page.json --store [-s] store.jsonl
//!
//! Fills the metadata store from api pages dumped in the directory of the first page.

use clap::{Arg, ArgAction, ArgMatches, Command};

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use cpu_time::ProcessTime;
use env_logger::Builder;

use genogate::dna::kmerindex::{build_catalogue, IndexBuildParams};
use genogate::gateway::{Gateway, SearchRequest, DEFAULT_THRESHOLD};
use genogate::metadata::{ingest, DirPageSource};
use genogate::utils::parameters::DEFAULT_KMER_SIZE;

/// exit code of a rejected request
const CLIENT_ERROR_EXIT : i32 = 2;

// install a logger facility
pub fn init_log() -> u64 {
    Builder::from_default_env().init();
    log::info!("logger initialized");
    1
}

fn read_sequence(arg : &str) -> Result<String, anyhow::Error> {
    match arg.strip_prefix('@') {
        Some(path) => {
            let seq = std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("cannot read sequence file {} : {}", path, e))?;
            Ok(seq)
        }
        None => Ok(arg.to_string()),
    }
}

fn parse_search(matches : &ArgMatches) -> Result<(), anyhow::Error> {
    log::debug!("in parse_search");
    // clap guarantees required args
    let seq_arg = matches.get_one::<String>("seq").ok_or_else(|| anyhow::anyhow!("--seq is mandatory"))?;
    let threshold = *matches.get_one::<f64>("threshold").unwrap_or(&DEFAULT_THRESHOLD);
    let want_score = matches.get_flag("score");
    let catalogues : Vec<String> = matches.get_many::<String>("catalogue").map(|c| c.cloned().collect()).unwrap_or_default();
    //
    let mut request = SearchRequest::new(&read_sequence(seq_arg)?).threshold(threshold).score(want_score);
    if !catalogues.is_empty() {
        request.catalogues_filter = Some(catalogues);
    }
    //
    let gateway = Gateway::from_env()?;
    let start_t = SystemTime::now();
    let cpu_start = ProcessTime::now();
    match gateway.search(&request) {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            log::info!(
                "search : cpu time(s) {:.3}, elapsed time(s) {:.3}",
                cpu_start.elapsed().as_secs_f32(),
                start_t.elapsed().map(|d| d.as_secs_f32()).unwrap_or(0.)
            );
            Ok(())
        }
        Err(e) => {
            if e.is_engine_fault() {
                if let Some(cause) = e.get_cause() {
                    log::error!("search failed : {}", cause);
                }
            }
            let answer = serde_json::json!({ "field": e.get_field(), "message": e.get_message() });
            println!("{}", answer);
            std::process::exit(CLIENT_ERROR_EXIT);
        }
    }
} // end of parse_search

fn parse_index(matches : &ArgMatches) -> Result<(), anyhow::Error> {
    log::debug!("in parse_index");
    let genomes_dir = matches.get_one::<String>("genomes").ok_or_else(|| anyhow::anyhow!("--genomes is mandatory"))?;
    if !Path::new(genomes_dir).is_dir() {
        anyhow::bail!("error not a directory : {:?}", genomes_dir);
    }
    let output = matches.get_one::<String>("output").ok_or_else(|| anyhow::anyhow!("--output is mandatory"))?;
    let mut params = IndexBuildParams::new(genomes_dir, output);
    if let Some(glob_filter) = matches.get_one::<String>("glob") {
        params.glob_filter = glob_filter.clone();
    }
    params.kmer_size = *matches.get_one::<usize>("kmer_size").unwrap_or(&DEFAULT_KMER_SIZE);
    params.clobber = matches.get_flag("clobber");
    log::info!("index parameters : {:?}", params);
    //
    let start_t = SystemTime::now();
    let cpu_start = ProcessTime::now();
    let manifest = build_catalogue(&params)?;
    let cpu_time = cpu_start.elapsed().as_secs();
    let elapsed_t = start_t.elapsed().map(|d| d.as_secs()).unwrap_or(0);
    log::info!("index : cpu time(s) {}, elapsed time(s) {}", cpu_time, elapsed_t);
    println!("catalogue manifest written in {}", manifest.display());
    Ok(())
} // end of parse_index

fn parse_ingest(matches : &ArgMatches) -> Result<(), anyhow::Error> {
    log::debug!("in parse_ingest");
    let first = PathBuf::from(matches.get_one::<String>("pages").ok_or_else(|| anyhow::anyhow!("--pages is mandatory"))?);
    let store = PathBuf::from(matches.get_one::<String>("store").ok_or_else(|| anyhow::anyhow!("--store is mandatory"))?);
    let dir = match first.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let first_name = first.file_name().ok_or_else(|| anyhow::anyhow!("not a page file : {:?}", first))?.to_string_lossy().to_string();
    //
    let nb_records = ingest(&mut DirPageSource::new(dir), &first_name, &store)?;
    println!("{} genome records written in {}", nb_records, store.display());
    Ok(())
} // end of parse_ingest

fn main() -> Result<(), anyhow::Error> {
    let _ = init_log();
    //
    let search_cmd = Command::new("search")
        .about("Search a DNA sequence against the configured genome catalogues")
        .arg(
            Arg::new("seq")
                .short('s')
                .long("seq")
                .value_name("SEQ")
                .help("sequence to search, or @file to read it from file")
                .required(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("threshold")
                .short('t')
                .long("threshold")
                .value_name("THRESHOLD")
                .help("fraction of query k-mers a genome must contain, default 0.4")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(Arg::new("score").long("score").help("ask for engine scores").action(ArgAction::SetTrue))
        .arg(
            Arg::new("catalogue")
                .short('c')
                .long("catalogue")
                .value_name("CATALOGUE")
                .help("restrict search to this catalogue, can be repeated")
                .action(ArgAction::Append),
        );

    let index_cmd = Command::new("index")
        .about("Build the k-mer catalogue of a directory of genomes")
        .arg(
            Arg::new("genomes")
                .short('g')
                .long("genomes")
                .value_name("DIR")
                .help("directory containing the genomes of the catalogue")
                .required(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("OUTPUT")
                .help("output name of the catalogue")
                .required(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("glob")
                .long("glob")
                .value_name("PATTERN")
                .help("glob filter for genome files, default **/*.fna")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("kmer_size")
                .short('k')
                .long("kmer")
                .value_name("KMER_SIZE")
                .help("k-mer size, default 31")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(Arg::new("clobber").long("clobber").help("overwrite an existing catalogue").action(ArgAction::SetTrue));

    let ingest_cmd = Command::new("ingest")
        .about("Fill the genome metadata store from api pages")
        .arg(
            Arg::new("pages")
                .short('p')
                .long("pages")
                .value_name("FIRST_PAGE")
                .help("first json page, next pages are looked for in its directory")
                .required(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("store")
                .short('s')
                .long("store")
                .value_name("STORE")
                .help("json lines metadata store to write")
                .required(true)
                .action(ArgAction::Set),
        );
    //
    // the global command
    //
    let matches = Command::new("genogate")
        .version("0.1.0")
        .about("Search gateway for k-mer indexed genome catalogues")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(search_cmd)
        .subcommand(index_cmd)
        .subcommand(ingest_cmd)
        .get_matches();
    //
    match matches.subcommand() {
        Some(("search", sub_m)) => parse_search(sub_m),
        Some(("index", sub_m)) => parse_index(sub_m),
        Some(("ingest", sub_m)) => parse_ingest(sub_m),
        _ => anyhow::bail!("unknown subcommand"),
    }
} // end of main
