use std::fs::{self, File};
use std::io::{self, Write};
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;
use regex::Regex;
use tracing::info;

pub const CACHE_SUFFIX: &str = ".cache";
pub const TEMP_SUFFIX: &str = ".tmp";

static SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:https?|ftp|file)://").expect("static scheme pattern"));
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9.?]").expect("static cache key pattern"));

// Distinct URLs may map to the same key.
pub fn cache_key(url: &str) -> String {
    let stripped = SCHEME.replace(url, "");
    format!("{}{CACHE_SUFFIX}", UNSAFE_CHARS.replace_all(&stripped, "_"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Absent,
    Writing,
    Complete,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: Utf8PathBuf,
}

impl CacheStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn entry_path(&self, url: &str) -> Utf8PathBuf {
        self.root.join(cache_key(url))
    }

    pub fn temp_path(&self, url: &str) -> Utf8PathBuf {
        self.root.join(format!("{}{TEMP_SUFFIX}", cache_key(url)))
    }

    pub fn state(&self, url: &str) -> CacheState {
        if self.entry_path(url).as_std_path().exists() {
            CacheState::Complete
        } else if self.temp_path(url).as_std_path().exists() {
            CacheState::Writing
        } else {
            CacheState::Absent
        }
    }

    pub fn open_complete(&self, url: &str) -> io::Result<Option<File>> {
        let path = self.entry_path(url);
        if !path.as_std_path().is_file() {
            return Ok(None);
        }
        File::open(path.as_std_path()).map(Some)
    }

    pub fn begin(&self, url: &str) -> io::Result<PendingEntry> {
        fs::create_dir_all(self.root.as_std_path())?;
        let temp_path = self.temp_path(url);
        let file = File::create(temp_path.as_std_path())?;
        Ok(PendingEntry {
            writer: GzEncoder::new(file, Compression::default()),
            temp_path,
            final_path: self.entry_path(url),
        })
    }
}

pub struct PendingEntry {
    writer: GzEncoder<File>,
    temp_path: Utf8PathBuf,
    final_path: Utf8PathBuf,
}

impl PendingEntry {
    pub fn write_block(&mut self, block: &[u8]) -> io::Result<()> {
        self.writer.write_all(block)
    }

    pub fn commit(self) -> io::Result<Utf8PathBuf> {
        let file = self.writer.finish()?;
        file.sync_all()?;
        drop(file);
        fs::rename(self.temp_path.as_std_path(), self.final_path.as_std_path())?;
        info!("Cache finalized as '{}'.", self.final_path);
        Ok(self.final_path)
    }

    pub fn discard(self) -> io::Result<()> {
        drop(self.writer);
        fs::remove_file(self.temp_path.as_std_path())?;
        info!("Incomplete cache '{}' deleted.", self.temp_path);
        Ok(())
    }
}
