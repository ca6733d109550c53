//! Artifact recompression
//!
//! CI produces `.tar.xz` archives tuned for build time; public
//! distribution wants a `.tar.gz` variant and, when enabled, an `.xz`
//! re-encoded at higher effort. Both variants are re-derived from the
//! canonical staged archive; the original is only ever replaced by an
//! atomic rename after a successful re-encode. The whole stage is gated by
//! configuration and skipped entirely when both flags are off.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use flate2::write::GzEncoder;
use flate2::Compression;
use rayon::prelude::*;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::source::StagedArtifact;

/// Recompression settings
#[derive(Debug, Clone, Copy)]
pub struct TransformOptions {
    /// Re-derive `.tar.gz` variants
    pub recompress_gz: bool,

    /// Re-encode the `.tar.xz` archives themselves
    pub recompress_xz: bool,

    /// gzip level, 1-9
    pub gzip_level: u32,

    /// xz preset, 0-9; lower presets keep local iteration fast
    pub xz_preset: u32,
}

/// Errors from the transform stage
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("failed to recompress required artifact {file}: {source}")]
    Required {
        file: String,
        #[source]
        source: io::Error,
    },
}

/// Recompress every staged archive, returning the staged set extended
/// with the produced variants.
///
/// A failure on an optional artifact drops only its variant and keeps the
/// original in the release; a failure on a required artifact is fatal.
pub fn recompress_all(
    staged: Vec<StagedArtifact>,
    options: TransformOptions,
) -> Result<Vec<StagedArtifact>, TransformError> {
    if !options.recompress_gz && !options.recompress_xz {
        return Ok(staged);
    }

    println!(
        "[transform] recompressing {} archives (gz: {}, xz: {})",
        staged.len(),
        options.recompress_gz,
        options.recompress_xz
    );
    let start = Instant::now();

    let result = staged
        .into_par_iter()
        .map(|artifact| {
            let mut out = Vec::with_capacity(2);
            match recompress_one(&artifact, options) {
                Ok(variant) => {
                    out.push(artifact);
                    out.extend(variant);
                }
                Err(source) if artifact.required => {
                    return Err(TransformError::Required {
                        file: artifact.file_name,
                        source,
                    });
                }
                Err(source) => {
                    eprintln!(
                        "[transform] warning: failed to recompress optional artifact {}: {}",
                        artifact.file_name, source
                    );
                    out.push(artifact);
                }
            }
            Ok(out)
        })
        .collect::<Result<Vec<_>, TransformError>>()?;

    println!("[transform] finished in {:.2?}", start.elapsed());
    Ok(result.into_iter().flatten().collect())
}

/// Recompress a single staged archive, returning its gz variant if one
/// was produced.
fn recompress_one(
    artifact: &StagedArtifact,
    options: TransformOptions,
) -> io::Result<Option<StagedArtifact>> {
    let mut variant = None;

    if options.recompress_gz {
        let gz_path = artifact.path.with_extension("gz");
        write_gz(&artifact.path, &gz_path, options.gzip_level)?;
        variant = Some(StagedArtifact {
            component: artifact.component.clone(),
            target: artifact.target.clone(),
            file_name: artifact
                .file_name
                .trim_end_matches(".xz")
                .to_string()
                + ".gz",
            path: gz_path,
            required: artifact.required,
        });
    }

    if options.recompress_xz {
        reencode_xz(&artifact.path, options.xz_preset)?;
    }

    Ok(variant)
}

fn write_gz(xz_path: &Path, gz_path: &Path, level: u32) -> io::Result<()> {
    let mut decoder = XzDecoder::new(BufReader::new(File::open(xz_path)?));
    let mut encoder = GzEncoder::new(
        BufWriter::new(File::create(gz_path)?),
        Compression::new(level),
    );
    io::copy(&mut decoder, &mut encoder)?;
    encoder.finish()?.flush()?;
    Ok(())
}

/// Re-encode an xz archive at `preset`, replacing the original only after
/// the new encoding is fully written.
fn reencode_xz(xz_path: &Path, preset: u32) -> io::Result<()> {
    let recompressed = xz_path.with_extension("xz_recompressed");

    {
        let mut decoder = XzDecoder::new(BufReader::new(File::open(xz_path)?));
        let mut encoder = XzEncoder::new(
            BufWriter::new(File::create(&recompressed)?),
            preset,
        );
        io::copy(&mut decoder, &mut encoder)?;
        encoder.finish()?.flush()?;
    }

    fs::rename(&recompressed, xz_path)?;
    Ok(())
}
