use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::entities::EntityReader;
use crate::graph::Graph;
use crate::prefixes::PrefixTable;
use crate::ExtractError;

/// Every item block in a truthy dump has a line ending with this marker;
/// shard workers realign on it so that no shard starts mid-entity.
const ITEM_MARKER: &[u8] = b"<http://wikiba.se/ontology#Item> .";

/// Never spawn more than roughly one worker per this many bytes.
const BYTES_PER_WORKER: u64 = 10_000_000;

/// Per-worker read buffer (1 MB)
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Called once per entity graph; constructed per shard by a factory, so no
/// state is shared between workers. Construction must stay cheap and free
/// of I/O, any output resource is opened on first use and released by
/// `finish`, which runs exactly once per shard on every exit path.
pub trait EntityVisitor {
    type Output;

    fn visit(&mut self, graph: &mut Graph);

    fn finish(self) -> Self::Output;
}

/// Parse counters for one shard.
#[derive(Clone, Copy, Default, Debug, Serialize)]
pub struct ShardStats {
    pub entities: u64,
    pub format_warnings: u64,
    pub bad_statements: u64,
}

/// Aggregated counters for a whole dump pass, reported to the operator so
/// dump cleanliness can be gauged.
#[derive(Clone, Copy, Default, Debug, Serialize)]
pub struct DumpStats {
    pub workers: usize,
    pub entities: u64,
    pub format_warnings: u64,
    pub bad_statements: u64,
}

impl DumpStats {
    /// Counters of a one-reader streaming pass.
    pub fn single(shard: ShardStats) -> Self {
        let mut stats = DumpStats {
            workers: 1,
            ..Default::default()
        };
        stats.absorb(&shard);
        stats
    }

    fn absorb(&mut self, shard: &ShardStats) {
        self.entities += shard.entities;
        self.format_warnings += shard.format_warnings;
        self.bad_statements += shard.bad_statements;
    }
}

/// Per-shard visitor outputs (in shard order) plus aggregated counters.
pub struct DumpRun<T> {
    pub results: Vec<T>,
    pub stats: DumpStats,
}

#[derive(Clone, Copy, Debug)]
struct Shard {
    index: usize,
    start: u64,
    len: u64,
}

fn effective_workers(file_size: u64, requested: usize) -> usize {
    let cap = (file_size / BYTES_PER_WORKER) as usize + 1;
    requested.min(cap).max(1)
}

/// Scan forward to just past the next line ending with the item marker.
/// Returns the number of bytes consumed; at end of file the shard is empty.
fn align_to_entity<R: BufRead>(reader: &mut R) -> io::Result<u64> {
    let mut line = Vec::new();
    let mut consumed = 0u64;
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(consumed);
        }
        consumed += n as u64;
        let mut end = line.len();
        while end > 0 && line[end - 1].is_ascii_whitespace() {
            end -= 1;
        }
        if line[..end].ends_with(ITEM_MARKER) {
            return Ok(consumed);
        }
    }
}

fn run_shard<V: EntityVisitor>(
    path: &Path,
    shard: Shard,
    mut visitor: V,
    prefixes: Arc<PrefixTable>,
    allow: Option<HashSet<String>>,
) -> Result<(V::Output, ShardStats), ExtractError> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(shard.start))?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let consumed = align_to_entity(&mut reader)?;
    let begin = shard.start + consumed;
    info!("dump reader {} starting at byte {}", shard.index + 1, begin);

    let end = shard.start + shard.len;
    let mut entities = EntityReader::over(reader, begin, prefixes, allow);
    let mut stats = ShardStats::default();
    while let Some(mut graph) = entities.next() {
        visitor.visit(&mut graph);
        stats.entities += 1;
        // past the range end the entity in progress was already drained,
        // anything further belongs to the next shard
        if entities.byte_pos() > end {
            break;
        }
    }
    if let Some(e) = entities.take_io_error() {
        return Err(ExtractError::Io(e));
    }
    stats.format_warnings = entities.format_warnings();
    stats.bad_statements = entities.bad_statements();
    info!(
        "dump reader {} finished at byte {} with {} entities",
        shard.index + 1,
        entities.byte_pos(),
        stats.entities
    );
    Ok((visitor.finish(), stats))
}

/// Visit every Wikidata entity of an uncompressed dump with `workers`
/// parallel readers, each running the factory's visitor over its own byte
/// range. Blocks until all workers are done; results come back in shard
/// order. Failing to open or stat the file aborts the whole run.
pub fn visit_dump<V, F>(
    path: &Path,
    factory: F,
    workers: usize,
    prefixes: Arc<PrefixTable>,
    allow: Option<HashSet<String>>,
) -> Result<DumpRun<V::Output>, ExtractError>
where
    V: EntityVisitor,
    V::Output: Send,
    F: Fn(usize) -> V + Sync,
{
    let file_size = std::fs::metadata(path)?.len();
    let workers = effective_workers(file_size, workers);
    run_partitioned(path, factory, workers, file_size, prefixes, allow)
}

fn run_partitioned<V, F>(
    path: &Path,
    factory: F,
    workers: usize,
    file_size: u64,
    prefixes: Arc<PrefixTable>,
    allow: Option<HashSet<String>>,
) -> Result<DumpRun<V::Output>, ExtractError>
where
    V: EntityVisitor,
    V::Output: Send,
    F: Fn(usize) -> V + Sync,
{
    info!("running {} dump readers over {} bytes", workers, file_size);
    let portion = file_size / workers as u64;
    let shards: Vec<Shard> = (0..workers)
        .map(|index| Shard {
            index,
            start: index as u64 * portion,
            len: if index == workers - 1 {
                file_size - index as u64 * portion
            } else {
                portion
            },
        })
        .collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| ExtractError::Parse(e.to_string()))?;
    let outcomes: Result<Vec<(V::Output, ShardStats)>, ExtractError> = pool.install(|| {
        shards
            .into_par_iter()
            .map(|shard| {
                run_shard(
                    path,
                    shard,
                    factory(shard.index),
                    Arc::clone(&prefixes),
                    allow.clone(),
                )
            })
            .collect()
    });

    let mut stats = DumpStats {
        workers,
        ..Default::default()
    };
    let mut results = Vec::with_capacity(workers);
    for (result, shard_stats) in outcomes? {
        stats.absorb(&shard_stats);
        results.push(result);
    }
    Ok(DumpRun { results, stats })
}

/// Single-reader pass over an already-open byte stream, for inputs that
/// cannot be partitioned by byte range (stdin, compressed dumps). Parses
/// from the first byte, no realignment.
pub fn stream_entities<V, R>(
    reader: R,
    mut visitor: V,
    prefixes: Arc<PrefixTable>,
    allow: Option<HashSet<String>>,
) -> Result<(V::Output, ShardStats), ExtractError>
where
    V: EntityVisitor,
    R: Read,
{
    let mut entities = EntityReader::over(reader, 0, prefixes, allow);
    let mut stats = ShardStats::default();
    while let Some(mut graph) = entities.next() {
        visitor.visit(&mut graph);
        stats.entities += 1;
    }
    if let Some(e) = entities.take_io_error() {
        return Err(ExtractError::Io(e));
    }
    stats.format_warnings = entities.format_warnings();
    stats.bad_statements = entities.bad_statements();
    Ok((visitor.finish(), stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Default)]
    struct SubjectCollector {
        subjects: Vec<String>,
    }

    impl EntityVisitor for SubjectCollector {
        type Output = Vec<String>;

        fn visit(&mut self, graph: &mut Graph) {
            self.subjects
                .push(graph.some_subject().expect("non-empty graph").to_string());
        }

        fn finish(self) -> Vec<String> {
            self.subjects
        }
    }

    fn entity_block(qid: usize) -> String {
        format!(
            "<http://www.wikidata.org/entity/Q{qid}> <http://www.w3.org/1999/02/22-rdf-syntax-ns#type> <http://wikiba.se/ontology#Item> .\n\
             <http://www.wikidata.org/entity/Q{qid}> <http://www.wikidata.org/prop/direct/P31> <http://www.wikidata.org/entity/Q5> .\n\
             <http://www.wikidata.org/entity/Q{qid}> <http://www.w3.org/2000/01/rdf-schema#label> \"Entity {qid}\"@en .\n",
        )
    }

    fn write_fixture(num_entities: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for qid in 0..num_entities {
            file.write_all(entity_block(qid).as_bytes()).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_effective_workers_clamped_by_file_size() {
        assert_eq!(effective_workers(1_000, 8), 1);
        assert_eq!(effective_workers(25_000_000, 8), 3);
        assert_eq!(effective_workers(1_000_000_000, 8), 8);
        assert_eq!(effective_workers(0, 0), 1);
    }

    #[test]
    fn test_no_subject_split_across_shards() {
        let num_entities = 200;
        let file = write_fixture(num_entities);
        let file_size = std::fs::metadata(file.path()).unwrap().len();
        let prefixes = Arc::new(PrefixTable::wikidata());

        let expected: Vec<String> = (0..num_entities).map(|q| format!("wd:Q{}", q)).collect();

        for workers in [1usize, 2, 8] {
            let run = run_partitioned(
                file.path(),
                |_| SubjectCollector::default(),
                workers,
                file_size,
                Arc::clone(&prefixes),
                None,
            )
            .unwrap();
            assert_eq!(run.results.len(), workers);
            let mut seen: Vec<String> = run.results.into_iter().flatten().collect();
            seen.sort_by(|a, b| {
                let qa: usize = a[4..].parse().unwrap();
                let qb: usize = b[4..].parse().unwrap();
                qa.cmp(&qb)
            });
            assert_eq!(seen, expected, "workers={}", workers);
            assert_eq!(run.stats.entities, num_entities as u64);
        }
    }

    #[test]
    fn test_alignment_same_from_boundary_and_one_byte_earlier() {
        let file = write_fixture(5);
        // Offset of the third entity's first line
        let block_len = entity_block(0).len() as u64;
        let boundary = block_len * 2;

        let mut aligned = Vec::new();
        for start in [boundary, boundary - 1] {
            let mut f = File::open(file.path()).unwrap();
            f.seek(SeekFrom::Start(start)).unwrap();
            let mut reader = BufReader::new(f);
            let consumed = align_to_entity(&mut reader).unwrap();
            aligned.push(start + consumed);
        }
        assert_eq!(aligned[0], aligned[1]);
    }

    #[test]
    fn test_alignment_at_eof_yields_empty_shard() {
        let file = write_fixture(2);
        let size = std::fs::metadata(file.path()).unwrap().len();
        let mut f = File::open(file.path()).unwrap();
        // Seek into the final label line, after the last marker
        f.seek(SeekFrom::Start(size - 10)).unwrap();
        let mut reader = BufReader::new(f);
        let consumed = align_to_entity(&mut reader).unwrap();
        assert_eq!(size - 10 + consumed, size);
    }

    #[test]
    fn test_visit_dump_missing_file_is_fatal() {
        let prefixes = Arc::new(PrefixTable::wikidata());
        let result = visit_dump(
            Path::new("/nonexistent/dump.nt"),
            |_| SubjectCollector::default(),
            4,
            prefixes,
            None,
        );
        assert!(matches!(result, Err(ExtractError::Io(_))));
    }

    #[test]
    fn test_stream_entities_sees_first_entity_completely() {
        let input = entity_block(7);
        let prefixes = Arc::new(PrefixTable::wikidata());
        let (subjects, stats) =
            stream_entities(input.as_bytes(), SubjectCollector::default(), prefixes, None)
                .unwrap();
        assert_eq!(subjects, vec!["wd:Q7".to_string()]);
        assert_eq!(stats.entities, 1);
        assert_eq!(stats.format_warnings, 0);
    }
}
