use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::compression::OUTPUT_BUFFER_SIZE;
use crate::driver::EntityVisitor;
use crate::graph::Graph;
use crate::tsv::TsvWriter;
use crate::ExtractError;

/// File name suffix for a given output compression.
pub fn segment_suffix(compression: &str) -> &'static str {
    match compression {
        "gzip" | "gz" => ".gz",
        "lz4" => ".lz4",
        _ => "",
    }
}

/// One worker's fact output. `path` is `None` when the shard produced no
/// facts and therefore no file.
pub struct FactSegment {
    pub path: Option<PathBuf>,
    pub facts: u64,
}

/// Streams every triple of every visited entity graph into a worker-unique
/// TSV segment. The segment file is opened on the first fact, never at
/// construction time, so factories stay cheap on every worker.
pub struct FactsVisitor {
    writer: TsvWriter,
    failed: Option<io::Error>,
}

impl FactsVisitor {
    pub fn new(output_dir: &Path, shard_index: usize, compression: &str) -> Self {
        let path = output_dir.join(format!(
            "facts_part_{:04}.tsv{}",
            shard_index,
            segment_suffix(compression)
        ));
        FactsVisitor {
            writer: TsvWriter::create(path),
            failed: None,
        }
    }
}

impl EntityVisitor for FactsVisitor {
    type Output = Result<FactSegment, ExtractError>;

    fn visit(&mut self, graph: &mut Graph) {
        if self.failed.is_some() {
            return;
        }
        for triple in graph.iter() {
            if let Err(e) =
                self.writer
                    .write_fact(&triple.subject, &triple.predicate, &triple.object)
            {
                self.failed = Some(e);
                return;
            }
        }
    }

    fn finish(self) -> Result<FactSegment, ExtractError> {
        if let Some(e) = self.failed {
            return Err(ExtractError::Io(e));
        }
        let facts = self.writer.facts_written();
        let path = self.writer.finish()?;
        Ok(FactSegment { path, facts })
    }
}

/// Append the segments to `target` in the order given (shard order) and
/// delete them. The result is subject-grouped but not globally sorted.
pub fn concatenate_segments(
    segments: &[FactSegment],
    target: &Path,
) -> Result<u64, ExtractError> {
    let mut out = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, File::create(target)?);
    let mut total = 0u64;
    for segment in segments {
        let Some(path) = &segment.path else {
            continue;
        };
        let mut reader = File::open(path)?;
        io::copy(&mut reader, &mut out)?;
        fs::remove_file(path)?;
        total += segment.facts;
    }
    out.flush()?;
    info!("{} facts concatenated into {}", total, target.display());
    Ok(total)
}
