use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use greenlight_core::error::Result;

use super::{check_key, CacheStats, CacheStore};

const ENTRY_EXT: &str = "bin";
const NAMESPACE_DIGEST_LEN: usize = 12;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// One file per entry under `<root>/<namespace dir>/`.
#[derive(Debug)]
pub struct DirectoryCacheStore {
    dir: PathBuf,
}

impl DirectoryCacheStore {
    pub fn open(root: &Path, namespace: &str) -> Result<Self> {
        let dir = root.join(namespace_dir_name(namespace));
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "Directory cache opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, ENTRY_EXT))
    }

    fn entries(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXT) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

/// Directory name for a namespace: a readable form plus a short digest of
/// the raw name, so `org/model` and `org_model` never share a directory.
fn namespace_dir_name(namespace: &str) -> String {
    let readable: String = namespace
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let readable = if readable.trim_matches('.').is_empty() {
        "default"
    } else {
        readable.as_str()
    };
    let digest = hex::encode(Sha256::digest(namespace.as_bytes()));
    format!("{}-{}", readable, &digest[..NAMESPACE_DIGEST_LEN])
}

/// Write `value` to `tmp` and move it onto `path`. On failure the temp file
/// is removed so it cannot linger beside the entries.
fn write_then_rename(tmp: &Path, path: &Path, value: &[u8]) -> Result<()> {
    if let Err(e) = fs::write(tmp, value).and_then(|()| fs::rename(tmp, path)) {
        if let Err(cleanup) = fs::remove_file(tmp) {
            if cleanup.kind() != ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temp cache file");
            }
        }
        return Err(e.into());
    }
    Ok(())
}

impl CacheStore for DirectoryCacheStore {
    fn backend(&self) -> &'static str {
        "directory"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        check_key(key)?;
        match fs::read(self.entry_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        check_key(key)?;
        let path = self.entry_path(key);
        if path.exists() {
            debug!(key, "Cache entry already present");
            return Ok(());
        }
        // Write beside the target then rename so readers never see a partial file.
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!("{}.{}-{}.tmp", key, std::process::id(), seq));
        write_then_rename(&tmp, &path, value)
    }

    fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.entries()? {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        for path in self.entries()? {
            let meta = fs::metadata(&path)?;
            stats.entries += 1;
            stats.total_bytes += meta.len();
        }
        Ok(stats)
    }
}
