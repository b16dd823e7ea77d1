//! File-backed progress cache.
//!
//! One file per puzzle id under a root directory:
//!
//! ```text
//! <root>/<hex(puzzle_id)>.save   = lz4( bincode(SavedProgress) )
//! ```
//!
//! Ids whose hex form would not fit a file name are stored as a hex
//! prefix plus a 64-bit FNV-1a hash of the whole id. Records carry their
//! id, so a load whose stored id differs is treated as a miss.
//!
//! Writes go to a temp file and are renamed into place, so a crash
//! leaves either the old record or the new one.

use std::fs;
use std::path::{Path, PathBuf};

use crossword_core::{CacheError, ProgressCache, SaveSummary, SavedProgress};

const EXTENSION: &str = "save";
/// Longest hex stem written verbatim; well under the common 255-byte limit.
const MAX_HEX_STEM: usize = 200;
const HASHED_PREFIX: usize = 128;

pub struct FileCache {
    root: PathBuf,
    max_saves: Option<usize>,
}

impl FileCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, CacheError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        log::info!("progress cache at {}", root.display());
        Ok(Self { root, max_saves: None })
    }

    /// Refuse new puzzle ids once `max_saves` records exist.
    pub fn with_quota(mut self, max_saves: usize) -> Self {
        self.max_saves = Some(max_saves);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, puzzle_id: &str) -> PathBuf {
        self.root.join(format!("{}.{EXTENSION}", file_stem(puzzle_id)))
    }

    fn record_paths(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn encode(progress: &SavedProgress) -> Result<Vec<u8>, CacheError> {
        let bytes = bincode::serde::encode_to_vec(progress, bincode::config::standard())
            .map_err(|e| CacheError::Encode(e.to_string()))?;
        Ok(lz4_flex::compress_prepend_size(&bytes))
    }

    fn decode(puzzle_id: &str, bytes: &[u8]) -> Result<SavedProgress, CacheError> {
        let decode_err = |reason: String| CacheError::Decode {
            puzzle_id: puzzle_id.to_string(),
            reason,
        };
        let raw = lz4_flex::decompress_size_prepended(bytes).map_err(|e| decode_err(e.to_string()))?;
        let (progress, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
            .map_err(|e| decode_err(e.to_string()))?;
        Ok(progress)
    }
}

fn file_stem(puzzle_id: &str) -> String {
    let hex: String = puzzle_id.bytes().map(|b| format!("{b:02x}")).collect();
    if hex.len() <= MAX_HEX_STEM {
        return hex;
    }
    let hash = puzzle_id
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3));
    format!("{}-{hash:016x}", &hex[..HASHED_PREFIX])
}

impl ProgressCache for FileCache {
    fn load(&self, puzzle_id: &str) -> Result<Option<SavedProgress>, CacheError> {
        let path = self.path_for(puzzle_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let progress = Self::decode(puzzle_id, &bytes)?;
        if progress.puzzle_id != puzzle_id {
            log::warn!("save file for {puzzle_id} holds {}", progress.puzzle_id);
            return Ok(None);
        }
        Ok(Some(progress))
    }

    fn save(&self, progress: &SavedProgress) -> Result<(), CacheError> {
        let path = self.path_for(&progress.puzzle_id);
        if let Some(capacity) = self.max_saves {
            if !path.exists() && self.record_paths()?.len() >= capacity {
                return Err(CacheError::QuotaExceeded { capacity });
            }
        }
        let bytes = Self::encode(progress)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;
        log::trace!("saved {} ({} bytes)", progress.puzzle_id, bytes.len());
        Ok(())
    }

    fn list(&self) -> Result<Vec<SaveSummary>, CacheError> {
        let mut summaries = Vec::new();
        for path in self.record_paths()? {
            let label = path.display().to_string();
            match fs::read(&path).map_err(CacheError::from).and_then(|b| Self::decode(&label, &b)) {
                Ok(progress) => summaries.push(progress.summary()),
                Err(e) => log::warn!("skipping unreadable save: {e}"),
            }
        }
        summaries.sort_by(|a, b| b.last_played.cmp(&a.last_played));
        Ok(summaries)
    }

    fn delete(&self, puzzle_id: &str) -> Result<bool, CacheError> {
        match fs::remove_file(self.path_for(puzzle_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
