use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::compression::{create_compressed_writer, determine_compression, OUTPUT_BUFFER_SIZE};
use crate::terms::Term;

/// Writes facts as `subject<TAB>predicate<TAB>object<TAB>.` lines.
///
/// Construction is cheap and performs no I/O; the output file is created on
/// the first fact. Compression is picked from the file extension. `finish`
/// flushes and closes, and tells the caller whether a file was produced.
pub struct TsvWriter {
    path: PathBuf,
    compression: String,
    out: Option<BufWriter<Box<dyn Write>>>,
    facts: u64,
}

impl TsvWriter {
    pub fn create(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let compression = determine_compression("none", path.to_str());
        TsvWriter {
            path,
            compression,
            out: None,
            facts: 0,
        }
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<Box<dyn Write>>> {
        if self.out.is_none() {
            let file = File::create(&self.path)?;
            self.out = Some(BufWriter::with_capacity(
                OUTPUT_BUFFER_SIZE,
                create_compressed_writer(file, &self.compression),
            ));
        }
        Ok(self.out.as_mut().expect("writer opened above"))
    }

    pub fn write_fact(
        &mut self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
    ) -> io::Result<()> {
        self.facts += 1;
        let out = self.writer()?;
        writeln!(out, "{}\t{}\t{}\t.", subject, predicate, object)
    }

    pub fn facts_written(&self) -> u64 {
        self.facts
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close. Returns the output path, or `None` when no fact was
    /// ever written and therefore no file exists.
    pub fn finish(mut self) -> io::Result<Option<PathBuf>> {
        match self.out.take() {
            Some(mut out) => {
                out.flush()?;
                drop(out);
                Ok(Some(self.path))
            }
            None => Ok(None),
        }
    }
}

/// Iterate the tab-split rows of an uncompressed fact file.
pub fn read_rows(path: &Path) -> io::Result<impl Iterator<Item = io::Result<Vec<String>>>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(reader.lines().map(|line| {
        line.map(|l| l.split('\t').map(str::to_string).collect())
    }))
}
