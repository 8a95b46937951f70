use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;

mod compression;
mod driver;
mod entities;
mod facts;
mod graph;
mod prefixes;
mod taxonomy;
mod terms;
mod triples;
mod tsv;

use compression::{is_compressed, open_input};
use driver::{stream_entities, visit_dump, DumpStats};
use facts::{concatenate_segments, segment_suffix, FactSegment, FactsVisitor};
use prefixes::PrefixTable;
use taxonomy::{
    build_clean_taxonomy, merge_shards, taxonomy_links, write_taxonomy_files, TaxonomyVisitor,
};

#[derive(Parser, Debug)]
#[command(name = "wikidata-extraktor")]
#[command(author, version, about = "Extract per-entity facts and the class taxonomy from Wikidata truthy dumps", long_about = None)]
struct Args {
    /// Input dump in N-Triples format (.nt; .bz2/.gz/.lz4 fall back to a
    /// single streaming reader)
    input: String,

    /// What to extract: taxonomy or facts
    #[arg(short = 'e', long, default_value = "taxonomy")]
    extract: String,

    /// Directory for output files
    #[arg(short = 'o', long, default_value = ".")]
    output_dir: PathBuf,

    /// Number of parallel dump readers (capped at one per 10 MB of input)
    #[arg(short = 'w', long, default_value = "8")]
    workers: usize,

    /// Keep only facts with these predicates (comma-separated, e.g. wdt:P31,wdt:P279)
    #[arg(long)]
    predicate: Option<String>,

    /// Output compression for fact files: none, gzip, lz4
    #[arg(long, default_value = "none")]
    compress: String,

    /// Write the run report as JSON to this file
    #[arg(long)]
    stats_json: Option<PathBuf>,

    /// Show per-shard progress on stderr
    #[arg(short = 'p', long)]
    progress: bool,
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("subjects() requires a graph with an inverse index")]
    NoInverseIndex,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Final counts of a run, printed for the operator and optionally written
/// as JSON so dump cleanliness can be tracked across runs.
#[derive(Serialize)]
struct RunReport {
    input: String,
    mode: String,
    workers: usize,
    entities: u64,
    format_warnings: u64,
    bad_statements: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    facts: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    classes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    taxonomy_links: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    loops_removed: Option<u64>,
}

impl RunReport {
    fn new(args: &Args, stats: &DumpStats) -> Self {
        RunReport {
            input: args.input.clone(),
            mode: args.extract.clone(),
            workers: stats.workers,
            entities: stats.entities,
            format_warnings: stats.format_warnings,
            bad_statements: stats.bad_statements,
            facts: None,
            classes: None,
            taxonomy_links: None,
            loops_removed: None,
        }
    }
}

fn main() -> Result<(), ExtractError> {
    let args = Args::parse();

    let default_level = if args.progress { "info" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let prefixes = Arc::new(PrefixTable::wikidata());
    std::fs::create_dir_all(&args.output_dir)?;

    let allow: Option<HashSet<String>> = args
        .predicate
        .as_ref()
        .map(|s| s.split(',').map(|p| p.trim().to_string()).collect());

    let report = match args.extract.as_str() {
        "taxonomy" => run_taxonomy(&args, prefixes, allow)?,
        "facts" => run_facts(&args, prefixes, allow)?,
        other => {
            return Err(ExtractError::Parse(format!(
                "Unknown extraction mode: {} (expected taxonomy or facts)",
                other
            )))
        }
    };

    eprintln!(
        "Done: {} entities, {} format warnings, {} malformed statements",
        report.entities, report.format_warnings, report.bad_statements
    );

    if let Some(path) = &args.stats_json {
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &report)?;
    }

    Ok(())
}

fn run_taxonomy(
    args: &Args,
    prefixes: Arc<PrefixTable>,
    allow: Option<HashSet<String>>,
) -> Result<RunReport, ExtractError> {
    let (shards, stats) = if is_compressed(&args.input) {
        let reader = open_input(&args.input)?;
        let (shard, stats) = stream_entities(reader, TaxonomyVisitor::new(), prefixes, allow)?;
        (vec![shard], DumpStats::single(stats))
    } else {
        let run = visit_dump(
            args.input.as_ref(),
            |_| TaxonomyVisitor::new(),
            args.workers,
            prefixes,
            allow,
        )?;
        (run.results, run.stats)
    };

    let raw = merge_shards(shards);
    let clean = build_clean_taxonomy(&raw);
    write_taxonomy_files(&clean, &raw, &args.output_dir)?;

    eprintln!(
        "Taxonomy: {} classes, {} links, {} loops removed",
        clean.up.len(),
        taxonomy_links(&clean),
        clean.loops_removed
    );

    let mut report = RunReport::new(args, &stats);
    report.classes = Some(clean.up.len());
    report.taxonomy_links = Some(taxonomy_links(&clean));
    report.loops_removed = Some(clean.loops_removed);
    Ok(report)
}

fn run_facts(
    args: &Args,
    prefixes: Arc<PrefixTable>,
    allow: Option<HashSet<String>>,
) -> Result<RunReport, ExtractError> {
    let (segments, stats) = if is_compressed(&args.input) {
        let reader = open_input(&args.input)?;
        let visitor = FactsVisitor::new(&args.output_dir, 0, &args.compress);
        let (segment, stats) = stream_entities(reader, visitor, prefixes, allow)?;
        (vec![segment?], DumpStats::single(stats))
    } else {
        let run = visit_dump(
            args.input.as_ref(),
            |index| FactsVisitor::new(&args.output_dir, index, &args.compress),
            args.workers,
            prefixes,
            allow,
        )?;
        let segments: Vec<FactSegment> = run.results.into_iter().collect::<Result<_, _>>()?;
        (segments, run.stats)
    };

    let target = args
        .output_dir
        .join(format!("wiki_facts.tsv{}", segment_suffix(&args.compress)));
    let facts = concatenate_segments(&segments, &target)?;

    eprintln!("Facts: {} written to {}", facts, target.display());

    let mut report = RunReport::new(args, &stats);
    report.facts = Some(facts);
    Ok(report)
}
