use super::{chunk_name, parse_chunk_name, temp_name, ChunkFile};
use crate::error::Error;
use crate::utils::{format_elapsed, format_mb};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const COPY_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug)]
pub struct Split {
    /// Chunks in ordinal order.
    pub chunks: Vec<ChunkFile>,
    /// True when the source fit in one chunk and was renamed to `._1`.
    /// The source no longer exists under its old name in that case.
    pub renamed_in_place: bool,
    /// BLAKE3 of the source bytes. Not computed for in-place renames.
    pub digest: Option<blake3::Hash>,
}

#[derive(Debug)]
pub struct Reassembly {
    pub chunks: usize,
    pub bytes: u64,
    pub digest: blake3::Hash,
}

/// Split `path` into `chunk_size` pieces next to it.
///
/// Files not larger than `chunk_size` are renamed to ordinal 1 instead, so
/// everything leaving this stage carries a chunk suffix. Deleting the source
/// after a real split is left to the caller.
pub fn split(path: &Path, chunk_size: u64) -> Result<Split, Error> {
    if chunk_size == 0 {
        return Err(Error::InvalidConfig("chunk size must be greater than 0".into()));
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Parse(format!("unusable file name: {}", path.display())))?;
    let dir = parent_dir(path);

    let size = fs::metadata(path)
        .map_err(|e| Error::io_context("reading metadata of", path, e))?
        .len();

    if size <= chunk_size {
        let target = dir.join(chunk_name(file_name, 1));
        fs::rename(path, &target).map_err(|e| Error::io_context("renaming", path, e))?;
        debug!("{} fits in one chunk, renamed to {}", file_name, target.display());
        return Ok(Split {
            chunks: vec![ChunkFile {
                original_name: file_name.to_string(),
                ordinal: 1,
                size_bytes: size,
                path: target,
            }],
            renamed_in_place: true,
            digest: None,
        });
    }

    info!(
        "Splitting {} ({} MB) into {} MB chunks",
        file_name,
        format_mb(size),
        format_mb(chunk_size)
    );
    let start = Instant::now();

    let mut source = File::open(path).map_err(|e| Error::io_context("opening", path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut chunks = Vec::new();
    let mut ordinal = 1u64;

    loop {
        let name = chunk_name(file_name, ordinal);
        let final_path = dir.join(&name);
        let temp_path = dir.join(temp_name(&name));

        let written =
            match write_block(&mut source, &temp_path, chunk_size, &mut hasher, &mut buf) {
                Ok(Some(n)) => n,
                Ok(None) => break,
                Err(err) => {
                    discard_temp(&temp_path);
                    return Err(Error::io_context("writing chunk", &temp_path, err));
                }
            };

        if let Err(err) = fs::rename(&temp_path, &final_path) {
            discard_temp(&temp_path);
            return Err(Error::io_context("promoting chunk", &temp_path, err));
        }

        chunks.push(ChunkFile {
            original_name: file_name.to_string(),
            ordinal,
            size_bytes: written,
            path: final_path,
        });
        ordinal += 1;
    }

    if chunks.is_empty() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{} was empty when read", path.display()),
        )));
    }

    info!(
        "Split {} into {} chunks in {}",
        file_name,
        chunks.len(),
        format_elapsed(start.elapsed())
    );

    Ok(Split {
        chunks,
        renamed_in_place: false,
        digest: Some(hasher.finalize()),
    })
}

/// Concatenate `original_name._1..N` from `dir` into `output`.
///
/// Ordinals must be contiguous from 1; a gap fails before anything is written.
pub fn reassemble(dir: &Path, original_name: &str, output: &Path) -> Result<Reassembly, Error> {
    let mut parts: Vec<(u64, PathBuf)> = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| Error::Io(io::Error::other(e.to_string())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if let Some((original, ordinal)) = parse_chunk_name(name) {
            if original == original_name {
                parts.push((ordinal, entry.path().to_path_buf()));
            }
        }
    }

    if parts.is_empty() {
        return Err(Error::Parse(format!(
            "no chunks of {} found in {}",
            original_name,
            dir.display()
        )));
    }

    parts.sort_by_key(|(ordinal, _)| *ordinal);
    for (expected, (ordinal, _)) in (1u64..).zip(parts.iter()) {
        if *ordinal != expected {
            return Err(Error::Parse(format!(
                "chunk {} of {} is missing",
                chunk_name(original_name, expected),
                original_name
            )));
        }
    }

    info!("Joining {} chunks of {}", parts.len(), original_name);
    let start = Instant::now();

    let output_name = output
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Parse(format!("unusable output name: {}", output.display())))?;
    let temp_path = parent_dir(output).join(temp_name(output_name));

    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut bytes = 0u64;

    let result = (|| -> io::Result<()> {
        let mut out = File::create(&temp_path)?;
        for (_, part) in &parts {
            let mut input = File::open(part)?;
            loop {
                let n = read_some(&mut input, &mut buf)?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
                hasher.update(&buf[..n]);
                bytes += n as u64;
            }
        }
        out.sync_all()?;
        fs::rename(&temp_path, output)
    })();

    if let Err(err) = result {
        discard_temp(&temp_path);
        return Err(Error::io_context("joining into", output, err));
    }

    info!(
        "Joined {} ({} MB) in {}",
        output.display(),
        format_mb(bytes),
        format_elapsed(start.elapsed())
    );

    Ok(Reassembly {
        chunks: parts.len(),
        bytes,
        digest: hasher.finalize(),
    })
}

/// Copies up to `limit` bytes into a fresh file at `temp_path`.
/// Returns `None` without creating the file when the source is exhausted.
fn write_block(
    source: &mut File,
    temp_path: &Path,
    limit: u64,
    hasher: &mut blake3::Hasher,
    buf: &mut [u8],
) -> io::Result<Option<u64>> {
    let want = block_len(buf.len(), limit, 0);
    let first = read_some(source, &mut buf[..want])?;
    if first == 0 {
        return Ok(None);
    }

    let mut out = File::create(temp_path)?;
    out.write_all(&buf[..first])?;
    hasher.update(&buf[..first]);
    let mut written = first as u64;

    while written < limit {
        let want = block_len(buf.len(), limit, written);
        let n = read_some(source, &mut buf[..want])?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        hasher.update(&buf[..n]);
        written += n as u64;
    }

    out.sync_all()?;
    Ok(Some(written))
}

fn block_len(buf_len: usize, limit: u64, written: u64) -> usize {
    (limit - written).min(buf_len as u64) as usize
}

fn read_some(input: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match input.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn discard_temp(temp_path: &Path) {
    if let Err(err) = fs::remove_file(temp_path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!("Could not remove {}: {}", temp_path.display(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_small_file_renamed_to_first_ordinal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.tar");
        fs::write(&path, b"tiny").unwrap();

        let result = split(&path, 10).unwrap();
        assert!(result.renamed_in_place);
        assert!(result.digest.is_none());
        assert_eq!(result.chunks.len(), 1);
        assert!(!path.exists());
        assert_eq!(fs::read(dir.path().join("small.tar._1")).unwrap(), b"tiny");
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("even.tar");
        fs::write(&path, sample(40)).unwrap();

        let result = split(&path, 10).unwrap();
        let ordinals: Vec<u64> = result.chunks.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4]);
        assert!(result.chunks.iter().all(|c| c.size_bytes == 10));
        assert!(!dir.path().join("even.tar._5").exists());
    }

    #[test]
    fn test_split_leaves_source_and_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.tar");
        fs::write(&path, sample(25)).unwrap();

        split(&path, 10).unwrap();
        assert!(path.exists(), "source removal belongs to the caller");
        let temps = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".temp"))
            .count();
        assert_eq!(temps, 0);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.tar");
        fs::write(&path, b"abc").unwrap();
        assert!(matches!(split(&path, 0), Err(Error::InvalidConfig(_))));
        assert!(path.exists());
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = split(&dir.path().join("gone.tar"), 10);
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_reassemble_orders_numerically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("many.tar");
        let data = sample(115);
        fs::write(&path, &data).unwrap();

        let result = split(&path, 10).unwrap();
        assert_eq!(result.chunks.len(), 12);
        fs::remove_file(&path).unwrap();

        let out = dir.path().join("joined.tar");
        let joined = reassemble(dir.path(), "many.tar", &out).unwrap();
        assert_eq!(joined.chunks, 12);
        assert_eq!(joined.bytes, 115);
        assert_eq!(fs::read(&out).unwrap(), data);
        assert_eq!(Some(joined.digest), result.digest);
    }

    #[test]
    fn test_reassemble_reports_gap() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("g.tar._1"), b"a").unwrap();
        fs::write(dir.path().join("g.tar._3"), b"c").unwrap();

        let out = dir.path().join("g.tar");
        let err = reassemble(dir.path(), "g.tar", &out).unwrap_err();
        assert!(matches!(err, Error::Parse(ref msg) if msg.contains("g.tar._2")));
        assert!(!out.exists());
    }

    #[test]
    fn test_reassemble_without_chunks() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("none.tar");
        assert!(matches!(
            reassemble(dir.path(), "none.tar", &out),
            Err(Error::Parse(_))
        ));
    }
}
