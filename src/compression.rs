use std::io::{self, BufRead, BufReader, Write};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use lz4_flex::frame::{FrameDecoder as Lz4Decoder, FrameEncoder as Lz4Encoder};

/// Default output buffer size (8 MB)
pub const OUTPUT_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// True if the path names a compressed dump. Compressed inputs cannot be
/// partitioned by byte range and fall back to a single streaming reader.
pub fn is_compressed(path: &str) -> bool {
    let path_lower = path.to_lowercase();
    path_lower.ends_with(".bz2") || path_lower.ends_with(".gz") || path_lower.ends_with(".lz4")
}

/// Determine output compression from CLI option or output file extension
pub fn determine_compression(compress_arg: &str, output_path: Option<&str>) -> String {
    // If --compress is explicitly set to something other than "none", use it
    if compress_arg != "none" {
        return compress_arg.to_string();
    }

    // Otherwise, auto-detect from output file extension
    if let Some(path) = output_path {
        let path_lower = path.to_lowercase();
        if path_lower.ends_with(".lz4") {
            return "lz4".to_string();
        } else if path_lower.ends_with(".gz") {
            return "gzip".to_string();
        }
    }

    "none".to_string()
}

/// Create a writer with optional compression
pub fn create_compressed_writer<W: Write + 'static>(
    writer: W,
    compression: &str,
) -> Box<dyn Write> {
    match compression {
        "lz4" => Box::new(Lz4Encoder::new(writer)),
        "gzip" | "gz" => Box::new(GzEncoder::new(writer, flate2::Compression::default())),
        _ => Box::new(writer),
    }
}

/// Open an input dump with transparent decompression
pub fn open_input(path: &str) -> io::Result<Box<dyn BufRead + Send>> {
    let file = std::fs::File::open(path)?;
    if path.ends_with(".bz2") {
        Ok(Box::new(BufReader::new(BzDecoder::new(file))))
    } else if path.ends_with(".gz") {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else if path.ends_with(".lz4") {
        Ok(Box::new(BufReader::new(Lz4Decoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_is_compressed() {
        assert!(is_compressed("latest-truthy.nt.bz2"));
        assert!(is_compressed("latest-truthy.nt.gz"));
        assert!(is_compressed("latest-truthy.nt.LZ4"));
        assert!(!is_compressed("latest-truthy.nt"));
    }

    #[test]
    fn test_determine_compression_from_arg() {
        // Explicit --compress overrides everything
        assert_eq!(determine_compression("lz4", None), "lz4");
        assert_eq!(determine_compression("gzip", None), "gzip");
        assert_eq!(determine_compression("lz4", Some("facts.tsv")), "lz4");
        assert_eq!(determine_compression("gzip", Some("facts.tsv.lz4")), "gzip");
    }

    #[test]
    fn test_determine_compression_from_extension() {
        assert_eq!(determine_compression("none", Some("facts.tsv.lz4")), "lz4");
        assert_eq!(determine_compression("none", Some("facts.tsv.gz")), "gzip");
        assert_eq!(determine_compression("none", Some("facts.tsv.GZ")), "gzip");
    }

    #[test]
    fn test_determine_compression_none() {
        assert_eq!(determine_compression("none", None), "none");
        assert_eq!(determine_compression("none", Some("facts.tsv")), "none");
    }

    #[test]
    fn test_lz4_roundtrip() {
        let test_data = b"wd:Q42\twdt:P31\twd:Q5\t.\n";

        let mut compressed = Vec::new();
        {
            let mut encoder = Lz4Encoder::new(&mut compressed);
            encoder.write_all(test_data).unwrap();
            encoder.finish().unwrap();
        }

        // LZ4 frame magic
        assert_eq!(&compressed[0..4], &[0x04, 0x22, 0x4d, 0x18]);

        let mut decompressed = Vec::new();
        {
            let mut decoder = Lz4Decoder::new(&compressed[..]);
            decoder.read_to_end(&mut decompressed).unwrap();
        }
        assert_eq!(decompressed, test_data);
    }

    #[test]
    fn test_gzip_roundtrip() {
        use flate2::read::GzDecoder as GzDecoderRead;

        let test_data = b"wd:Q42\trdfs:label\t\"Douglas Adams\"\t.\n";

        let mut compressed = Vec::new();
        {
            let mut encoder = GzEncoder::new(&mut compressed, flate2::Compression::default());
            encoder.write_all(test_data).unwrap();
            encoder.finish().unwrap();
        }

        // gzip magic
        assert_eq!(&compressed[0..2], &[0x1f, 0x8b]);

        let mut decompressed = Vec::new();
        {
            let mut decoder = GzDecoderRead::new(&compressed[..]);
            decoder.read_to_end(&mut decompressed).unwrap();
        }
        assert_eq!(decompressed, test_data);
    }

    #[test]
    fn test_create_compressed_writer_variants() {
        for compression in ["lz4", "gzip", "none"] {
            let buffer: Vec<u8> = Vec::new();
            let writer = create_compressed_writer(buffer, compression);
            drop(writer);
        }
    }
}
