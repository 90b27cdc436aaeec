//! On-disk layout of cache entries.
//!
//! One CBOR file per fingerprint holding the result together with enough
//! metadata to explain why a later lookup hit or missed. Files are written to
//! a temporary name in the same directory and renamed into place, so a
//! reader never sees a partial entry; concurrent writers of one fingerprint
//! simply race and the last rename wins.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::time::UNIX_EPOCH;

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Modification time of a watched source file when the entry was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStamp {
    pub path: Utf8PathBuf,
    /// Seconds and nanoseconds since the epoch; `None` if the file was missing.
    pub modified: Option<(u64, u32)>,
}

impl SourceStamp {
    pub fn capture(path: &Utf8Path) -> Self {
        Self {
            path: path.to_owned(),
            modified: modified(path),
        }
    }

    /// Whether the file is unchanged since it was stamped.
    pub fn is_fresh(&self) -> bool {
        match (self.modified, modified(&self.path)) {
            (Some(then), Some(now)) => now <= then,
            (None, None) => true,
            _ => false,
        }
    }
}

fn modified(path: &Utf8Path) -> Option<(u64, u32)> {
    let time = fs::metadata(path).ok()?.modified().ok()?;
    let since = time.duration_since(UNIX_EPOCH).ok()?;
    Some((since.as_secs(), since.subsec_nanos()))
}

/// Why an entry exists: what was called, with what, and what it read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub function: String,
    pub function_digest: String,
    pub args_digest: String,
    /// Parameters that went into the fingerprint, in call order.
    pub params: Vec<String>,
    pub sources: Vec<SourceStamp>,
}

impl EntryMeta {
    pub fn is_fresh(&self) -> bool {
        self.sources.iter().all(SourceStamp::is_fresh)
    }
}

#[derive(Serialize)]
struct EntryRef<'a, T> {
    meta: &'a EntryMeta,
    value: &'a T,
}

#[derive(Deserialize)]
pub(crate) struct Entry<T> {
    pub meta: EntryMeta,
    pub value: T,
}

/// Reads an entry; `Ok(None)` if there is no file.
pub(crate) fn load<T: DeserializeOwned>(path: &Utf8Path) -> Result<Option<Entry<T>>, CacheError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    ciborium::from_reader(BufReader::new(file))
        .map(Some)
        .map_err(|err| CacheError::Decode(path.to_string(), err.to_string()))
}

pub(crate) fn store<T: Serialize>(
    path: &Utf8Path,
    meta: &EntryMeta,
    value: &T,
) -> Result<(), CacheError> {
    let dir = path.parent().unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        ciborium::into_writer(&EntryRef { meta, value }, &mut writer)
            .map_err(|err| CacheError::Encode(meta.function.clone(), err.to_string()))?;
        writer.flush()?;
    }

    temp.persist(path).map_err(|err| CacheError::Io(err.error))?;
    Ok(())
}
