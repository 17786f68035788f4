//! Local-directory storage backend.
//!
//! One file per entry under a root directory.
//!
//! # Layout
//!
//! The logical key is split on `/` and every segment is escaped, so any key
//! maps to exactly one path below the root:
//!
//! - bytes outside `[a-z0-9_-]` become `%XX` (upper-case hex)
//! - an empty segment becomes `%`
//! - an escaped segment longer than [`MAX_SEGMENT_BYTES`] is split into
//!   nested directories, each piece but the last ending in `%~`
//!
//! The entry file is `<escaped key><marker><type>` where the marker is `.json`
//! for structured ids and `.bin` for binary ids. The type part is empty for
//! the representation's default media type, `.<ext>` for a registry type with
//! a canonical extension, and `.~<escaped media type>` for anything else.
//! `weather/berlin` is therefore stored at `weather/berlin.json`, a PNG under
//! `thumb` at `thumb.bin.png` and raw bytes under `blob` at `blob.bin`.
//!
//! Reads locate the file by prefix and recover the media type from its name.
//! Writes land in a temp file that is renamed into place; variants with a
//! different type part are then removed under a per-entry lock.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use larder_core::{
    media, LarderResult, Representation, StorageError, StorageId, StoredEntry, Timestamp,
};
use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;

use super::traits::{monotonic_stamp, StorageBackend};

/// Longest escaped key segment kept as a single path component.
pub const MAX_SEGMENT_BYTES: usize = 128;

const STRUCTURED_MARKER: &str = ".json";
const BINARY_MARKER: &str = ".bin";
const ESCAPED_TYPE_PREFIX: &str = ".~";
const CONTINUATION: &str = "%~";
const LOCK_STRIPES: usize = 64;

/// Where the files of one storage id live.
#[derive(Debug)]
struct EntryLocation {
    dir: PathBuf,
    /// File name up to and including the representation marker.
    prefix: String,
}

impl EntryLocation {
    fn file_for(&self, representation: Representation, mime_type: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", self.prefix, type_part(representation, mime_type)))
    }
}

/// A located entry file and the media type its name carries.
#[derive(Debug)]
struct EntryFile {
    path: PathBuf,
    mime_type: String,
}

/// Filesystem-backed storage rooted at one directory.
#[derive(Debug)]
pub struct LocalDirBackend {
    root: PathBuf,
    /// Last stamp handed out per physical id, so stamps stay monotonic even
    /// when the filesystem's mtime granularity is coarse.
    stamps: Mutex<HashMap<String, Timestamp>>,
    tmp_counter: AtomicU64,
    /// Serializes write-then-cleanup (and delete) of the same entry.
    locks: Vec<AsyncMutex<()>>,
}

impl LocalDirBackend {
    /// Create a backend rooted at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> LarderResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| StorageError::Unavailable {
            reason: format!("cannot create {}: {}", root.display(), e),
        })?;
        tracing::info!(root = %root.display(), "Opened local directory backend");
        Ok(Self {
            root,
            stamps: Mutex::new(HashMap::new()),
            tmp_counter: AtomicU64::new(0),
            locks: (0..LOCK_STRIPES).map(|_| AsyncMutex::new(())).collect(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, id: &StorageId) -> LarderResult<EntryLocation> {
        let components = escaped_components(id.key());
        let Some((stem, parents)) = components.split_last() else {
            return Err(StorageError::InvalidId {
                id: id.to_string(),
                reason: "key has no path component".to_string(),
            }
            .into());
        };

        let mut dir = self.root.clone();
        dir.extend(parents);
        let marker = match id.representation() {
            Representation::Structured => STRUCTURED_MARKER,
            Representation::Binary => BINARY_MARKER,
        };
        Ok(EntryLocation {
            dir,
            prefix: format!("{stem}{marker}"),
        })
    }

    fn lock_for(&self, id: &StorageId) -> &AsyncMutex<()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.locks[(hasher.finish() % self.locks.len() as u64) as usize]
    }

    /// Every file currently stored for the entry at `location`.
    async fn entry_files(
        &self,
        id: &StorageId,
        location: &EntryLocation,
    ) -> LarderResult<Vec<EntryFile>> {
        let mut entries = match fs::read_dir(&location.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(read_failed(id, e)),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| read_failed(id, e))? {
            let name = entry.file_name();
            let Some(rest) = name.to_str().and_then(|n| n.strip_prefix(&location.prefix)) else {
                continue;
            };
            if let Some(mime_type) = parse_type_part(id.representation(), rest) {
                found.push(EntryFile {
                    path: entry.path(),
                    mime_type,
                });
            }
        }
        Ok(found)
    }

    /// Read a file and its mtime, `None` if it does not exist.
    async fn read_file(
        &self,
        id: &StorageId,
        path: &Path,
    ) -> LarderResult<Option<(Vec<u8>, Timestamp)>> {
        let payload = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(read_failed(id, e)),
        };
        let modified = fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .map_err(|e| read_failed(id, e))?;
        Ok(Some((payload, self.observed_stamp(id, modified))))
    }

    /// The later of the file's mtime and the last stamp this process issued.
    fn observed_stamp(&self, id: &StorageId, modified: Timestamp) -> Timestamp {
        self.stamps
            .lock()
            .ok()
            .and_then(|stamps| stamps.get(&id.physical()).copied())
            .map_or(modified, |issued| issued.max(modified))
    }

    fn issue_stamp(&self, id: &StorageId, modified: Timestamp) -> LarderResult<Timestamp> {
        let mut stamps = self.stamps.lock().map_err(|_| StorageError::LockPoisoned)?;
        let physical = id.physical();
        let stamp = monotonic_stamp(stamps.get(&physical).copied(), modified);
        stamps.insert(physical, stamp);
        Ok(stamp)
    }

    /// Write through a temp file and rename it over `target`.
    async fn write_atomic(&self, id: &StorageId, target: &Path, payload: &[u8]) -> LarderResult<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| write_failed(id, e))?;
        }

        let mut tmp = target.as_os_str().to_os_string();
        tmp.push(format!(
            ".tmp-{}-{}",
            std::process::id(),
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        let tmp = PathBuf::from(tmp);

        if let Err(e) = fs::write(&tmp, payload).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(write_failed(id, e));
        }
        if let Err(e) = fs::rename(&tmp, target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(write_failed(id, e));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalDirBackend {
    fn name(&self) -> &'static str {
        "fs"
    }

    async fn read(&self, id: &StorageId) -> LarderResult<Option<StoredEntry>> {
        let location = self.locate(id)?;
        let mut newest: Option<StoredEntry> = None;
        for file in self.entry_files(id, &location).await? {
            if let Some((payload, stamp)) = self.read_file(id, &file.path).await? {
                if newest.as_ref().map_or(true, |n| stamp > n.last_modified) {
                    newest = Some(StoredEntry::new(payload, file.mime_type, stamp));
                }
            }
        }
        Ok(newest)
    }

    async fn write(
        &self,
        id: &StorageId,
        payload: &[u8],
        mime_type: &str,
    ) -> LarderResult<Timestamp> {
        let location = self.locate(id)?;
        let target = location.file_for(id.representation(), mime_type);

        let _guard = self.lock_for(id).lock().await;
        self.write_atomic(id, &target, payload).await?;
        for stale in self.entry_files(id, &location).await? {
            if stale.path != target {
                remove_if_present(&stale.path)
                    .await
                    .map_err(|e| write_failed(id, e))?;
            }
        }

        let modified = fs::metadata(&target)
            .await
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let stamp = self.issue_stamp(id, modified)?;

        tracing::debug!(id = %id, path = %target.display(), bytes = payload.len(), "Wrote cache file");
        Ok(stamp)
    }

    async fn delete(&self, id: &StorageId) -> LarderResult<()> {
        let location = self.locate(id)?;
        let _guard = self.lock_for(id).lock().await;
        for file in self.entry_files(id, &location).await? {
            remove_if_present(&file.path)
                .await
                .map_err(|e| delete_failed(id, e))?;
        }
        Ok(())
    }

    async fn exists(&self, id: &StorageId) -> LarderResult<bool> {
        let location = self.locate(id)?;
        Ok(!self.entry_files(id, &location).await?.is_empty())
    }
}

/// Escape `input` into `out`, keeping only `[a-z0-9_-]` verbatim.
fn escape_into(input: &str, out: &mut String) {
    for byte in input.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => out.push(char::from(byte)),
            other => {
                let _ = write!(out, "%{other:02X}");
            }
        }
    }
}

/// Inverse of [`escape_into`]; `None` for anything it could not have produced.
fn unescape(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b @ (b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-') => {
                out.push(b);
                i += 1;
            }
            b'%' => {
                let hex = input.get(i + 1..i + 3)?;
                if !hex.bytes().all(|h| matches!(h, b'0'..=b'9' | b'A'..=b'F')) {
                    return None;
                }
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}

/// Path components for a logical key; the last one is the file stem.
fn escaped_components(key: &str) -> Vec<String> {
    let mut components = Vec::new();
    for segment in key.split('/') {
        let mut escaped = String::new();
        if segment.is_empty() {
            escaped.push('%');
        } else {
            escape_into(segment, &mut escaped);
        }
        while escaped.len() > MAX_SEGMENT_BYTES {
            let rest = escaped.split_off(MAX_SEGMENT_BYTES);
            escaped.push_str(CONTINUATION);
            components.push(escaped);
            escaped = rest;
        }
        components.push(escaped);
    }
    components
}

/// File name part after the marker that records `mime_type`.
fn type_part(representation: Representation, mime_type: &str) -> String {
    if mime_type == representation.default_mime_type() {
        return String::new();
    }
    if let Some(ext) = media::extension_for(mime_type) {
        if media::mime_for_extension(ext) == Some(mime_type) {
            return format!(".{ext}");
        }
    }
    let mut part = String::from(ESCAPED_TYPE_PREFIX);
    escape_into(mime_type, &mut part);
    part
}

fn parse_type_part(representation: Representation, part: &str) -> Option<String> {
    if part.is_empty() {
        return Some(representation.default_mime_type().to_string());
    }
    if let Some(escaped) = part.strip_prefix(ESCAPED_TYPE_PREFIX) {
        return unescape(escaped).filter(|mime| !mime.is_empty());
    }
    let ext = part.strip_prefix('.')?;
    if ext.contains('.') {
        return None;
    }
    media::mime_for_extension(ext).map(str::to_string)
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn read_failed(id: &StorageId, e: io::Error) -> larder_core::LarderError {
    StorageError::ReadFailed {
        id: id.to_string(),
        reason: e.to_string(),
    }
    .into()
}

fn write_failed(id: &StorageId, e: io::Error) -> larder_core::LarderError {
    StorageError::WriteFailed {
        id: id.to_string(),
        reason: e.to_string(),
    }
    .into()
}

fn delete_failed(id: &StorageId, e: io::Error) -> larder_core::LarderError {
    StorageError::DeleteFailed {
        id: id.to_string(),
        reason: e.to_string(),
    }
    .into()
}
