// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable per-provider checkpoints.
//!
//! While a provider is running its vectors live in `vectors_<name>.npy.tmp`,
//! an append-only log of frames. Each `append` writes one frame and syncs it
//! before returning:
//!
//! ```text
//! header: b"VECCKPT1"  dim: u32 LE  corpus fingerprint: 32 bytes
//! frame:  rows: u32 LE  rows * dim * f32 LE  blake3(payload): 32 bytes
//! ```
//!
//! The last frame in the file may be incomplete after a crash: short, zeroed,
//! or failing its digest. It is dropped on the next load and the earlier
//! frames are kept. Anything else that does not parse is treated as
//! corruption: the partial file is removed and the provider starts over.
//! A checkpoint written for a different corpus is discarded the same way.
//!
//! `finalize` writes `vectors_<name>.npy` (NumPy v1.0, `<f4`, shape `(N, D)`)
//! to a temporary file and renames it into place, then removes the partial
//! log. The final file is the only signal that a provider is complete.
//!
//! A store assumes a single writer per provider. Nothing here locks; running
//! two processes against the same provider and output directory is unsupported.

use anyhow::{anyhow, bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::errors::VectorizeError;
use crate::utils::{partial_path, vector_path};

const MAGIC: &[u8; 8] = b"VECCKPT1";
const HEADER_LEN: u64 = 44;
const DIGEST_LEN: usize = 32;
const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Vectors recovered from a partial checkpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialVectors {
    /// Recovered prefix, in corpus order
    pub vectors: Vec<Vec<f32>>,
    /// Dimension recorded in the header, if a header existed
    pub dim: Option<usize>,
    /// Whether the partial file existed when loading
    pub existed: bool,
}

impl PartialVectors {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// A completed vector artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalArtifact {
    pub path: PathBuf,
    pub rows: usize,
    pub dim: usize,
}

/// What is on disk for a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Complete { rows: usize, dim: usize },
    Partial { rows: usize },
    Missing,
}

/// Identifies the corpus a checkpoint was written for
pub type Fingerprint = [u8; 32];

/// Checkpoints for every provider in one output directory
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    fingerprint: Fingerprint,
}

impl CheckpointStore {
    /// A store over `dir` that touches nothing until written to.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fingerprint: [0; 32],
        }
    }

    /// Binds the store to one corpus. Partial checkpoints carrying another
    /// fingerprint are not resumed.
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Opens a store, creating the output directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
        Ok(Self::new(dir))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn final_path(&self, provider: &str) -> PathBuf {
        vector_path(&self.dir, provider)
    }

    pub fn partial_path(&self, provider: &str) -> PathBuf {
        partial_path(&self.dir, provider)
    }

    pub fn has_final(&self, provider: &str) -> bool {
        self.final_path(provider).is_file()
    }

    /// Returns the longest valid prefix appended so far.
    ///
    /// Never fails because of the file's content: a torn trailing frame is cut
    /// off, and a corrupt or unreadable file is logged, removed, and reported
    /// as an empty checkpoint.
    pub fn load(&self, provider: &str) -> PartialVectors {
        let path = self.partial_path(provider);
        if !path.exists() {
            return PartialVectors::default();
        }

        match read_partial(&path) {
            Ok(scan) if scan.fingerprint != self.fingerprint => {
                self.recover_corrupt(provider, &path, "written for a different corpus".to_string());
                PartialVectors {
                    existed: true,
                    ..PartialVectors::default()
                }
            }
            Ok(scan) => {
                if scan.torn_bytes > 0 {
                    tracing::warn!(
                        provider,
                        path = %path.display(),
                        torn_bytes = scan.torn_bytes,
                        kept_rows = scan.vectors.len(),
                        "dropping incomplete trailing frame from checkpoint"
                    );
                    if let Err(err) = truncate(&path, scan.valid_len) {
                        self.recover_corrupt(provider, &path, format!("cannot truncate torn frame: {}", err));
                        return PartialVectors {
                            existed: true,
                            ..PartialVectors::default()
                        };
                    }
                }
                PartialVectors {
                    vectors: scan.vectors,
                    dim: Some(scan.dim),
                    existed: true,
                }
            }
            Err(err) => {
                self.recover_corrupt(provider, &path, format!("{:#}", err));
                PartialVectors {
                    existed: true,
                    ..PartialVectors::default()
                }
            }
        }
    }

    fn recover_corrupt(&self, provider: &str, path: &Path, reason: String) {
        let err = VectorizeError::CheckpointCorrupt {
            path: path.to_path_buf(),
            reason,
        };
        tracing::error!(provider, "{}; discarding it and re-embedding from the first row", err);
        if let Err(remove_err) = fs::remove_file(path) {
            if remove_err.kind() != io::ErrorKind::NotFound {
                tracing::error!(provider, path = %path.display(), error = %remove_err, "failed to remove corrupt checkpoint");
            }
        }
    }

    /// Appends vectors as one durable frame.
    pub fn append(&self, provider: &str, vectors: &[Vec<f32>]) -> Result<()> {
        let Some(first) = vectors.first() else {
            return Ok(());
        };
        let dim = first.len();
        if dim == 0 {
            bail!("cannot checkpoint empty vectors");
        }
        if let Some(bad) = vectors.iter().position(|v| v.len() != dim) {
            bail!("vector {} has dimension {}, expected {}", bad, vectors[bad].len(), dim);
        }
        let rows = u32::try_from(vectors.len()).context("batch too large for one frame")?;

        let path = self.partial_path(provider);
        let created = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open checkpoint: {}", path.display()))?;

        if created || file.metadata()?.len() == 0 {
            let mut header = Vec::with_capacity(HEADER_LEN as usize);
            header.extend_from_slice(MAGIC);
            header.extend_from_slice(&u32::try_from(dim)?.to_le_bytes());
            header.extend_from_slice(&self.fingerprint);
            file.write_all(&header)?;
        } else {
            let (stored, fingerprint) = read_header(&path)?;
            if fingerprint != self.fingerprint {
                bail!("checkpoint {} belongs to a different corpus", path.display());
            }
            if stored != dim {
                bail!(
                    "checkpoint {} holds dimension {}, got {}",
                    path.display(),
                    stored,
                    dim
                );
            }
        }

        let mut payload = Vec::with_capacity(vectors.len() * dim * 4);
        for vector in vectors {
            for value in vector {
                payload.extend_from_slice(&value.to_le_bytes());
            }
        }
        let digest = blake3::hash(&payload);

        let mut frame = Vec::with_capacity(4 + payload.len() + DIGEST_LEN);
        frame.extend_from_slice(&rows.to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(digest.as_bytes());
        file.write_all(&frame)
            .with_context(|| format!("Failed to write checkpoint: {}", path.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync checkpoint: {}", path.display()))?;

        if created {
            sync_dir(&self.dir);
        }
        Ok(())
    }

    /// Turns the partial checkpoint into the final artifact.
    ///
    /// Succeeds without doing anything if the final artifact already exists.
    /// Fails, leaving the partial untouched, if it does not hold exactly
    /// `expected_rows` vectors.
    pub fn finalize(&self, provider: &str, expected_rows: usize) -> Result<FinalArtifact, VectorizeError> {
        let final_path = self.final_path(provider);
        let partial = self.partial_path(provider);
        let checkpoint_err = |source: anyhow::Error| VectorizeError::Checkpoint {
            provider: provider.to_string(),
            source,
        };

        if final_path.is_file() {
            let (rows, dim) = read_npy_shape(&final_path).map_err(checkpoint_err)?;
            self.remove_partial(provider);
            return Ok(FinalArtifact {
                path: final_path,
                rows,
                dim,
            });
        }

        let (vectors, dim) = if partial.exists() {
            let scan = read_partial(&partial).map_err(checkpoint_err)?;
            if scan.fingerprint != self.fingerprint {
                return Err(checkpoint_err(anyhow!("checkpoint belongs to a different corpus")));
            }
            (scan.vectors, scan.dim)
        } else {
            (Vec::new(), 0)
        };
        if vectors.len() != expected_rows {
            return Err(checkpoint_err(anyhow!(
                "checkpoint holds {} vectors, expected {}",
                vectors.len(),
                expected_rows
            )));
        }

        let tmp = write_npy_temp(&self.dir, &vectors, dim).map_err(checkpoint_err)?;
        if let Err(err) = tmp.persist(&final_path) {
            if final_path.is_file() {
                tracing::warn!(provider, error = %err.error, "rename lost a race but the final artifact exists");
            } else {
                return Err(VectorizeError::FinalizeConflict {
                    provider: provider.to_string(),
                    source: err.error,
                });
            }
        }
        sync_dir(&self.dir);
        self.remove_partial(provider);

        Ok(FinalArtifact {
            path: final_path,
            rows: vectors.len(),
            dim,
        })
    }

    /// Deletes only the partial checkpoint.
    pub fn discard_partial(&self, provider: &str) -> Result<()> {
        let path = self.partial_path(provider);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    fn remove_partial(&self, provider: &str) {
        let partial = self.partial_path(provider);
        match fs::remove_file(&partial) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(provider, path = %partial.display(), error = %err, "failed to remove finalized checkpoint");
            }
        }
    }

    /// Deletes both final and partial state for a provider.
    pub fn discard(&self, provider: &str) -> Result<()> {
        for path in [self.final_path(provider), self.partial_path(provider)] {
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(provider, path = %path.display(), "discarded"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("Failed to remove {}", path.display()))
                }
            }
        }
        Ok(())
    }

    /// Reads the final artifact back.
    pub fn read_final(&self, provider: &str) -> Result<Vec<Vec<f32>>> {
        read_npy(&self.final_path(provider))
    }

    /// Reports what exists on disk without modifying anything.
    pub fn status(&self, provider: &str) -> ProviderStatus {
        let final_path = self.final_path(provider);
        if final_path.is_file() {
            if let Ok((rows, dim)) = read_npy_shape(&final_path) {
                return ProviderStatus::Complete { rows, dim };
            }
        }
        let partial = self.partial_path(provider);
        if partial.is_file() {
            let rows = read_partial(&partial).map(|s| s.vectors.len()).unwrap_or(0);
            return ProviderStatus::Partial { rows };
        }
        ProviderStatus::Missing
    }
}

struct PartialScan {
    vectors: Vec<Vec<f32>>,
    dim: usize,
    fingerprint: Fingerprint,
    valid_len: u64,
    torn_bytes: u64,
}

fn read_header(path: &Path) -> Result<(usize, Fingerprint)> {
    let mut file = File::open(path)?;
    let mut header = [0u8; HEADER_LEN as usize];
    file.read_exact(&mut header)
        .with_context(|| format!("Failed to read checkpoint header: {}", path.display()))?;
    if &header[..8] != MAGIC {
        bail!("bad checkpoint magic in {}", path.display());
    }
    let dim = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
    Ok((dim, fingerprint_at(&header)))
}

fn fingerprint_at(header: &[u8]) -> Fingerprint {
    let mut fingerprint = [0u8; 32];
    fingerprint.copy_from_slice(&header[12..HEADER_LEN as usize]);
    fingerprint
}

fn read_partial(path: &Path) -> Result<PartialScan> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if bytes.len() < HEADER_LEN as usize {
        bail!("file shorter than header ({} bytes)", bytes.len());
    }
    if &bytes[..8] != MAGIC {
        bail!("bad magic");
    }
    let dim = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    if dim == 0 {
        bail!("header records dimension 0");
    }

    let mut vectors = Vec::new();
    let mut pos = HEADER_LEN as usize;
    while pos < bytes.len() {
        let rest = &bytes[pos..];
        if rest.len() < 4 {
            break;
        }
        let rows = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        if rows == 0 {
            // Never written by append: space allocated by a crashed write.
            break;
        }
        let payload_len = rows
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| anyhow!("frame size overflow at offset {}", pos))?;
        let frame_len = 4 + payload_len + DIGEST_LEN;
        if rest.len() < frame_len {
            break;
        }

        let payload = &rest[4..4 + payload_len];
        let digest = &rest[4 + payload_len..frame_len];
        if blake3::hash(payload).as_bytes() != digest {
            if pos + frame_len == bytes.len() {
                // Last frame: its data blocks did not all reach the disk.
                break;
            }
            bail!("digest mismatch in frame at offset {}", pos);
        }
        vectors.extend(decode_rows(payload, dim));
        pos += frame_len;
    }

    Ok(PartialScan {
        vectors,
        dim,
        fingerprint: fingerprint_at(&bytes),
        valid_len: pos as u64,
        torn_bytes: (bytes.len() - pos) as u64,
    })
}

fn decode_rows(payload: &[u8], dim: usize) -> impl Iterator<Item = Vec<f32>> + '_ {
    payload.chunks_exact(dim * 4).map(|row| {
        row.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    })
}

fn truncate(path: &Path, len: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()
}

/// Makes a create or rename in `dir` durable. Best effort: not every platform
/// allows opening a directory.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

fn npy_header(rows: usize, dim: usize) -> Vec<u8> {
    let dict = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        rows, dim
    );
    // magic(6) + version(2) + header_len(2) + dict + padding + '\n' is a multiple of 64
    let unpadded = NPY_MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    let header_len = dict.len() + padding + 1;

    let mut out = Vec::with_capacity(unpadded + padding);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(b' ').take(padding));
    out.push(b'\n');
    out
}

fn write_npy_temp(dir: &Path, vectors: &[Vec<f32>], dim: usize) -> Result<NamedTempFile> {
    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        writer.write_all(&npy_header(vectors.len(), dim))?;
        for vector in vectors {
            for value in vector {
                writer.write_all(&value.to_le_bytes())?;
            }
        }
        writer.flush()?;
    }
    tmp.as_file().sync_all().context("Failed to sync vector artifact")?;
    Ok(tmp)
}

/// Parses the `.npy` header and returns `(rows, dim, data_offset)`.
fn parse_npy_header(reader: &mut impl Read) -> Result<(usize, usize, usize)> {
    let mut prefix = [0u8; 10];
    reader.read_exact(&mut prefix).context("truncated npy header")?;
    if &prefix[..6] != NPY_MAGIC {
        bail!("not an npy file");
    }
    if prefix[6] != 1 {
        bail!("unsupported npy version {}.{}", prefix[6], prefix[7]);
    }
    let header_len = u16::from_le_bytes([prefix[8], prefix[9]]) as usize;
    let mut dict = vec![0u8; header_len];
    reader.read_exact(&mut dict).context("truncated npy header")?;
    let dict = String::from_utf8_lossy(&dict);

    if !dict.contains("'descr': '<f4'") {
        bail!("unsupported npy dtype in header {}", dict.trim());
    }
    if dict.contains("'fortran_order': True") {
        bail!("fortran-ordered npy files are not supported");
    }
    let shape = dict
        .split("'shape': (")
        .nth(1)
        .and_then(|rest| rest.split(')').next())
        .ok_or_else(|| anyhow!("npy header has no shape"))?;
    let dims: Vec<usize> = shape
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().context("bad npy shape"))
        .collect::<Result<_>>()?;

    let (rows, dim) = match dims.as_slice() {
        [rows, dim] => (*rows, *dim),
        [rows] => (*rows, usize::from(*rows > 0)),
        _ => bail!("unsupported npy shape ({})", shape),
    };
    Ok((rows, dim, 10 + header_len))
}

fn read_npy_shape(path: &Path) -> Result<(usize, usize)> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
    );
    let (rows, dim, _) = parse_npy_header(&mut reader)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok((rows, dim))
}

fn read_npy(path: &Path) -> Result<Vec<Vec<f32>>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
    );
    let (rows, dim, _) = parse_npy_header(&mut reader)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let expected = rows
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| anyhow!("{} declares an impossible shape ({}, {})", path.display(), rows, dim))?;
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    if data.len() != expected {
        bail!(
            "{} holds {} data bytes, expected {}",
            path.display(),
            data.len(),
            expected
        );
    }
    if dim == 0 {
        if rows > 0 {
            bail!("{} holds zero-width vectors", path.display());
        }
        return Ok(Vec::new());
    }
    Ok(decode_rows(&data, dim).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rows(values: &[[f32; 3]]) -> Vec<Vec<f32>> {
        values.iter().map(|r| r.to_vec()).collect()
    }

    fn store() -> (TempDir, CheckpointStore) {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn load_without_partial_is_empty() {
        let (_dir, store) = store();
        let loaded = store.load("m");
        assert!(loaded.is_empty());
        assert!(!loaded.existed);
    }

    #[test]
    fn appends_accumulate_in_order() {
        let (_dir, store) = store();
        store.append("m", &rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]])).unwrap();
        store.append("m", &rows(&[[7.0, 8.0, 9.0]])).unwrap();

        let loaded = store.load("m");
        assert_eq!(loaded.vectors, rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]));
        assert_eq!(loaded.dim, Some(3));
        assert!(store.partial_path("m").exists());
        assert!(!store.has_final("m"));
    }

    #[test]
    fn empty_append_is_noop() {
        let (_dir, store) = store();
        store.append("m", &[]).unwrap();
        assert!(!store.partial_path("m").exists());
    }

    #[test]
    fn append_rejects_dimension_change() {
        let (_dir, store) = store();
        store.append("m", &rows(&[[1.0, 2.0, 3.0]])).unwrap();
        let err = store.append("m", &[vec![1.0, 2.0]]).unwrap_err();
        assert!(err.to_string().contains("dimension"));
        assert_eq!(store.load("m").len(), 1);
    }

    #[test]
    fn torn_trailing_frame_is_dropped() {
        let (_dir, store) = store();
        store.append("m", &rows(&[[1.0, 2.0, 3.0]])).unwrap();
        store.append("m", &rows(&[[4.0, 5.0, 6.0]])).unwrap();

        // Simulate a crash half way through a third frame.
        let path = store.partial_path("m");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&1u32.to_le_bytes()).unwrap();
        file.write_all(&[0u8; 5]).unwrap();
        drop(file);

        let loaded = store.load("m");
        assert_eq!(loaded.vectors, rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));

        // Appending after repair continues cleanly.
        store.append("m", &rows(&[[7.0, 8.0, 9.0]])).unwrap();
        assert_eq!(store.load("m").len(), 3);
    }

    #[test]
    fn zero_filled_tail_keeps_earlier_frames() {
        let (_dir, store) = store();
        store.append("m", &rows(&[[1.0, 2.0, 3.0]])).unwrap();
        store.append("m", &rows(&[[4.0, 5.0, 6.0]])).unwrap();
        let path = store.partial_path("m");
        let synced_len = fs::metadata(&path).unwrap().len();

        // The file grew but the new frame's blocks were never written.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0u8; 48]).unwrap();
        drop(file);

        let loaded = store.load("m");
        assert_eq!(loaded.vectors, rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
        assert_eq!(fs::metadata(&path).unwrap().len(), synced_len);
    }

    #[test]
    fn last_frame_with_bad_digest_is_dropped() {
        let (_dir, store) = store();
        store.append("m", &rows(&[[1.0, 2.0, 3.0]])).unwrap();
        store.append("m", &rows(&[[4.0, 5.0, 6.0]])).unwrap();

        // Payload of the second frame partly zeroed.
        let path = store.partial_path("m");
        let mut bytes = fs::read(&path).unwrap();
        let frame_len = 4 + 12 + DIGEST_LEN;
        let second_payload = HEADER_LEN as usize + frame_len + 4;
        bytes[second_payload..second_payload + 4].fill(0);
        fs::write(&path, bytes).unwrap();

        let loaded = store.load("m");
        assert_eq!(loaded.vectors, rows(&[[1.0, 2.0, 3.0]]));
        assert_eq!(
            fs::metadata(&path).unwrap().len(),
            HEADER_LEN + frame_len as u64
        );
    }

    #[test]
    fn corrupt_frame_restarts_from_zero() {
        let (_dir, store) = store();
        store.append("m", &rows(&[[1.0, 2.0, 3.0]])).unwrap();
        store.append("m", &rows(&[[4.0, 5.0, 6.0]])).unwrap();

        // Damage the first frame; a valid frame follows it.
        let path = store.partial_path("m");
        let mut bytes = fs::read(&path).unwrap();
        let flip = HEADER_LEN as usize + 4;
        bytes[flip] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let loaded = store.load("m");
        assert!(loaded.is_empty());
        assert!(loaded.existed);
        assert!(!path.exists());
    }

    #[test]
    fn checkpoint_from_other_corpus_is_not_resumed() {
        let (dir, store) = store();
        let old = store.clone().with_fingerprint([1; 32]);
        old.append("m", &rows(&[[1.0, 2.0, 3.0]])).unwrap();

        let current = CheckpointStore::new(dir.path()).with_fingerprint([2; 32]);
        assert!(current.append("m", &rows(&[[4.0, 5.0, 6.0]])).is_err());
        assert!(matches!(
            current.finalize("m", 1),
            Err(VectorizeError::Checkpoint { .. })
        ));

        let loaded = current.load("m");
        assert!(loaded.is_empty());
        assert!(loaded.existed);
        assert!(!current.partial_path("m").exists());

        current.append("m", &rows(&[[4.0, 5.0, 6.0]])).unwrap();
        assert_eq!(current.load("m").vectors, rows(&[[4.0, 5.0, 6.0]]));
        assert!(old.load("m").is_empty());
    }

    #[test]
    fn garbage_file_restarts_from_zero() {
        let (_dir, store) = store();
        fs::write(store.partial_path("m"), b"not a checkpoint at all").unwrap();
        assert!(store.load("m").is_empty());
        assert!(!store.partial_path("m").exists());
    }

    #[test]
    fn finalize_writes_npy_and_removes_partial() {
        let (_dir, store) = store();
        let data = rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        store.append("org/m.v1", &data).unwrap();

        let artifact = store.finalize("org/m.v1", 2).unwrap();
        assert_eq!(artifact.rows, 2);
        assert_eq!(artifact.dim, 3);
        assert!(artifact.path.ends_with("vectors_org__m_v1.npy"));
        assert!(!store.partial_path("org/m.v1").exists());
        assert_eq!(store.read_final("org/m.v1").unwrap(), data);
    }

    #[test]
    fn npy_header_is_aligned() {
        let (_dir, store) = store();
        store.append("m", &rows(&[[1.0, 2.0, 3.0]])).unwrap();
        store.finalize("m", 1).unwrap();

        let bytes = fs::read(store.final_path("m")).unwrap();
        assert_eq!(&bytes[..6], NPY_MAGIC);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');
        assert_eq!(bytes.len(), 10 + header_len + 12);
    }

    #[test]
    fn finalize_twice_is_noop() {
        let (_dir, store) = store();
        store.append("m", &rows(&[[1.0, 2.0, 3.0]])).unwrap();
        let first = store.finalize("m", 1).unwrap();
        let second = store.finalize("m", 1).unwrap();
        assert_eq!(first, second);
        let third = store.finalize("m", 1).unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn finalize_after_crash_between_rename_and_cleanup() {
        let (_dir, store) = store();
        store.append("m", &rows(&[[1.0, 2.0, 3.0]])).unwrap();
        store.finalize("m", 1).unwrap();

        // A stale partial that survived the crash.
        store.append("m", &rows(&[[9.0, 9.0, 9.0]])).unwrap();
        let artifact = store.finalize("m", 1).unwrap();
        assert_eq!(artifact.rows, 1);
        assert!(!store.partial_path("m").exists());
        assert_eq!(store.read_final("m").unwrap(), rows(&[[1.0, 2.0, 3.0]]));
    }

    #[test]
    fn finalize_empty_corpus_without_partial() {
        let (_dir, store) = store();
        let artifact = store.finalize("m", 0).unwrap();
        assert_eq!(artifact.rows, 0);
        assert!(store.has_final("m"));
        assert!(store.read_final("m").unwrap().is_empty());
    }

    #[test]
    fn finalize_with_missing_rows_leaves_partial() {
        let (_dir, store) = store();
        store.append("m", &rows(&[[1.0, 2.0, 3.0]])).unwrap();
        let before = fs::read(store.partial_path("m")).unwrap();

        let err = store.finalize("m", 2).unwrap_err();
        assert!(matches!(err, VectorizeError::Checkpoint { .. }));
        assert!(!store.has_final("m"));
        assert_eq!(fs::read(store.partial_path("m")).unwrap(), before);
    }

    #[test]
    fn finalize_leaves_no_temp_files() {
        let (dir, store) = store();
        store.append("m", &rows(&[[1.0, 2.0, 3.0]])).unwrap();
        store.finalize("m", 1).unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["vectors_m.npy".to_string()]);
    }

    #[test]
    fn discard_removes_everything() {
        let (_dir, store) = store();
        store.append("m", &rows(&[[1.0, 2.0, 3.0]])).unwrap();
        store.finalize("m", 1).unwrap();
        store.append("m", &rows(&[[1.0, 2.0, 3.0]])).unwrap();

        store.discard("m").unwrap();
        assert!(!store.has_final("m"));
        assert!(!store.partial_path("m").exists());
        store.discard("m").unwrap();
    }

    #[test]
    fn status_reports_progress() {
        let (_dir, store) = store();
        assert_eq!(store.status("m"), ProviderStatus::Missing);
        store.append("m", &rows(&[[1.0, 2.0, 3.0]])).unwrap();
        assert_eq!(store.status("m"), ProviderStatus::Partial { rows: 1 });
        store.finalize("m", 1).unwrap();
        assert_eq!(store.status("m"), ProviderStatus::Complete { rows: 1, dim: 3 });
    }

    #[test]
    fn npy_reader_rejects_other_dtypes() {
        let (dir, _store) = store();
        let path = dir.path().join("x.npy");
        let mut bytes = npy_header(1, 1);
        let text = String::from_utf8_lossy(&bytes).replace("<f4", "<f8");
        bytes = text.into_bytes();
        bytes.extend_from_slice(&[0u8; 8]);
        fs::write(&path, bytes).unwrap();
        assert!(read_npy(&path).is_err());
    }

    #[test]
    fn npy_reader_rejects_impossible_shape() {
        let (dir, _store) = store();
        let path = dir.path().join("huge.npy");
        let mut bytes = npy_header(usize::MAX / 2, 3);
        bytes.extend_from_slice(&[0u8; 12]);
        fs::write(&path, bytes).unwrap();

        let err = read_npy(&path).unwrap_err();
        assert!(err.to_string().contains("impossible shape"));
    }
}
