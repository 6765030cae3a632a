//! Decompression of raw inputs.
//!
//! Instruments sometimes upload compressed files. The pipeline is handed the inflated file, named
//! without the compression suffix.

use crate::error::IngestError;

use flate2::read::{GzDecoder, ZlibDecoder};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use strum_macros::Display;

/// Compression algorithm
#[derive(Clone, Copy, Debug, Display, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum Compression {
    /// Gzip
    Gzip,
    /// Zlib
    Zlib,
}

impl Compression {
    /// Returns the compression of a file from its name, and the name without the suffix.
    pub fn detect(name: &str) -> Option<(Compression, &str)> {
        if let Some(stem) = name.strip_suffix(".gz") {
            Some((Compression::Gzip, stem))
        } else if let Some(stem) = name.strip_suffix(".zz") {
            Some((Compression::Zlib, stem))
        } else {
            None
        }
    }
}

/// Inflates `input` into `dir` if its name carries a compression suffix.
///
/// Returns the path of the file to hand to the pipeline: either the inflated file or `input`
/// itself.
///
/// # Arguments
///
/// * `input`: Raw input file
/// * `dir`: Directory to write the inflated file to
pub fn inflate_if_compressed(input: &Path, dir: &Path) -> Result<PathBuf, IngestError> {
    let name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let Some((compression, stem)) = Compression::detect(&name) else {
        return Ok(input.to_path_buf());
    };
    if stem.is_empty() {
        return Ok(input.to_path_buf());
    }
    let output = dir.join(stem);
    tracing::debug!("Inflating {} ({})", name, compression);
    let reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(&output)?);
    decompress(compression, reader, &mut writer).map_err(|source| IngestError::Decompression {
        name: name.clone(),
        source,
    })?;
    writer.flush()?;
    Ok(output)
}

/// Decompresses a stream into a writer, returning the number of bytes written.
///
/// # Arguments
///
/// * `compression`: Compression algorithm
/// * `reader`: Compressed data
/// * `writer`: Destination of uncompressed data
pub fn decompress<R: Read, W: Write>(
    compression: Compression,
    reader: R,
    writer: &mut W,
) -> std::io::Result<u64> {
    match compression {
        Compression::Gzip => std::io::copy(&mut GzDecoder::new(reader), writer),
        Compression::Zlib => std::io::copy(&mut ZlibDecoder::new(reader), writer),
    }
}
