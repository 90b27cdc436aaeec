//! Content-addressed memoization on disk.
//!
//! A [`Cached`] function is looked up by a fingerprint combining the
//! function's identity with canonical encodings of its arguments. A hit
//! returns the stored result without calling the function; a miss calls it
//! and persists the result. Editing the function changes its identity and
//! therefore every fingerprint it produces.
//!
//! Rust has no portable view of a function's compiled body, so identity comes
//! from the function's source text ([`fn_identity!`](crate::fn_identity),
//! [`cached!`](crate::cached)) or from an explicit version tag
//! ([`FnIdentity::versioned`]).

mod encoder;
mod entry;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, RwLock};

use camino::Utf8PathBuf;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use encoder::Encoder;
pub use entry::{EntryMeta, SourceStamp};

use crate::Computer;
use crate::core::{ArcStr, Blake3Hasher, Hash32, Value, lock, read, write};
use crate::error::CacheError;
use crate::task::{Args, Operation};

use self::encoder::EncodeError;

pub const DEFAULT_DIR: &str = ".cache/reckon";

const EXTENSION: &str = "cbor";

/// What a cached function is, for the purpose of invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FnIdentity {
    name: ArcStr,
    digest: Hash32,
}

impl FnIdentity {
    /// Identity from the function's source text. Whitespace runs are
    /// collapsed, so reformatting alone does not invalidate entries.
    pub fn from_source(name: &str, source: &str) -> Self {
        let normalized = source.split_whitespace().collect::<Vec<_>>().join(" ");

        let mut hasher = Blake3Hasher::new();
        hasher
            .update_framed(b"source")
            .update_framed(name.as_bytes())
            .update_framed(normalized.as_bytes());

        Self {
            name: name.into(),
            digest: hasher.into(),
        }
    }

    /// Identity from a version tag maintained by hand; bump it whenever the
    /// function's behavior changes.
    pub fn versioned(name: &str, version: &str) -> Self {
        let mut hasher = Blake3Hasher::new();
        hasher
            .update_framed(b"version")
            .update_framed(name.as_bytes())
            .update_framed(version.as_bytes());

        Self {
            name: name.into(),
            digest: hasher.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn digest(&self) -> Hash32 {
        self.digest
    }
}

/// An [`FnIdentity`] built from the source text of a function expression.
#[macro_export]
macro_rules! fn_identity {
    ($name:expr, $func:expr) => {
        $crate::FnIdentity::from_source($name, stringify!($func))
    };
}

/// Wraps a function expression in `cache`, deriving its identity from the
/// expression's own source text.
///
/// ```
/// use std::sync::Arc;
/// use reckon::{Args, Cache, cached};
///
/// let dir = tempfile::tempdir().unwrap();
/// let cache = Arc::new(Cache::new(dir.path().to_str().unwrap()));
///
/// let square = cached!(cache, "square", |args: &Args<'_>| -> anyhow::Result<i64> {
///     let x = args.get::<i64>(0)?;
///     Ok(x * x)
/// });
///
/// assert_eq!(square.invoke(&[reckon::Value::new(7i64)]).unwrap(), 49);
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $name:expr, $func:expr) => {
        $cache.wrap($crate::fn_identity!($name, $func), $func)
    };
}

/// The digests deciding one cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub function: Hash32,
    pub args: Hash32,
    /// Combination of the two; names the entry on disk.
    pub digest: Hash32,
}

#[derive(Debug, Clone)]
struct Settings {
    dir: Utf8PathBuf,
    skip: bool,
}

/// A cache directory plus the encoder used for fingerprints.
///
/// Calls with the same fingerprint are serialized within the process, so a
/// result is computed at most once even when a parallel executor asks for it
/// from several branches at the same time.
pub struct Cache {
    settings: RwLock<Settings>,
    encoder: RwLock<Encoder>,
    inflight: Mutex<HashMap<Hash32, Arc<Mutex<()>>>>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(DEFAULT_DIR)
    }
}

impl Cache {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self::with_encoder(dir, Encoder::new())
    }

    pub fn with_encoder(dir: impl Into<Utf8PathBuf>, encoder: Encoder) -> Self {
        Self {
            settings: RwLock::new(Settings {
                dir: dir.into(),
                skip: false,
            }),
            encoder: RwLock::new(encoder),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> Utf8PathBuf {
        read(&self.settings).dir.clone()
    }

    pub fn set_dir(&self, dir: impl Into<Utf8PathBuf>) {
        write(&self.settings).dir = dir.into();
    }

    /// Whether lookups are bypassed; results are still written.
    pub fn skip(&self) -> bool {
        read(&self.settings).skip
    }

    pub fn set_skip(&self, skip: bool) {
        write(&self.settings).skip = skip;
    }

    /// See [`Encoder::register`].
    pub fn register<T, F>(&self, encode: F)
    where
        T: std::any::Any,
        F: Fn(&T, &mut Vec<u8>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        write(&self.encoder).register::<T, F>(encode);
    }

    pub fn register_hash<T: std::any::Any + std::hash::Hash>(&self) {
        write(&self.encoder).register_hash::<T>();
    }

    pub fn register_serde<T: std::any::Any + Serialize>(&self) {
        write(&self.encoder).register_serde::<T>();
    }

    /// See [`Encoder::ignore`].
    pub fn ignore(&self, function: &str, param: &str) {
        write(&self.encoder).ignore(function, param);
    }

    pub fn wrap<F, T>(self: &Arc<Self>, identity: FnIdentity, func: F) -> Cached<F, T>
    where
        F: Fn(&Args<'_>) -> anyhow::Result<T> + Send + Sync,
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        Cached {
            cache: Arc::clone(self),
            identity,
            params: Vec::new(),
            ignored: HashSet::new(),
            sources: Vec::new(),
            func,
            _output: PhantomData,
        }
    }

    pub fn path_for(&self, function: &str, fingerprint: &Fingerprint) -> Utf8PathBuf {
        let name = format!("{}-{}.{EXTENSION}", sanitize(function), fingerprint.digest);
        self.dir().join(name)
    }

    /// Metadata of every readable entry in the cache directory.
    pub fn entries(&self) -> Result<Vec<(Utf8PathBuf, EntryMeta)>, CacheError> {
        let mut found = Vec::new();

        for path in self.files(|_| true)? {
            match entry::load::<ciborium::Value>(&path) {
                Ok(Some(entry)) => found.push((path, entry.meta)),
                Ok(None) => {}
                Err(err) => tracing::warn!("Skipping unreadable cache entry: {err}"),
            }
        }

        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    /// Deletes every entry of `function`; returns how many were removed.
    pub fn remove(&self, function: &str) -> Result<usize, CacheError> {
        let prefix = format!("{}-", sanitize(function));
        self.delete(self.files(|name| {
            name.strip_prefix(&prefix)
                .is_some_and(|rest| !rest.contains('-'))
        })?)
    }

    /// Deletes every entry in the cache directory.
    pub fn clear(&self) -> Result<usize, CacheError> {
        self.delete(self.files(|_| true)?)
    }

    fn delete(&self, paths: Vec<Utf8PathBuf>) -> Result<usize, CacheError> {
        for path in &paths {
            fs::remove_file(path)?;
        }

        tracing::info!("Removed {} cache entries from {}", paths.len(), self.dir());
        Ok(paths.len())
    }

    fn files(&self, filter: impl Fn(&str) -> bool) -> Result<Vec<Utf8PathBuf>, CacheError> {
        let dir = self.dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for item in dir.read_dir_utf8()? {
            let item = item?;
            let path = item.path();
            if path.extension() == Some(EXTENSION)
                && path.file_stem().is_some_and(&filter)
            {
                paths.push(path.to_owned());
            }
        }

        Ok(paths)
    }

    fn claim(&self, digest: Hash32) -> Claim<'_> {
        let slot = lock(&self.inflight).entry(digest).or_default().clone();
        Claim {
            cache: self,
            digest,
            slot,
        }
    }
}

/// Interest in one in-flight fingerprint; released on drop, also when the
/// wrapped function panics.
struct Claim<'a> {
    cache: &'a Cache,
    digest: Hash32,
    slot: Arc<Mutex<()>>,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut inflight = lock(&self.cache.inflight);
        // the map's reference and ours: nobody else is waiting
        if Arc::strong_count(&self.slot) <= 2 {
            inflight.remove(&self.digest);
        }
    }
}

/// Function names end up in file names.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

/// A function wrapped by a [`Cache`].
///
/// Positional arguments are named `arg0`, `arg1`, … unless
/// [`params`](Self::params) names them. `Cached` is itself an
/// [`Operation`], so it can be added to a [`Computer`] like any other
/// function.
pub struct Cached<F, T> {
    cache: Arc<Cache>,
    identity: FnIdentity,
    params: Vec<ArcStr>,
    ignored: HashSet<ArcStr>,
    sources: Vec<Utf8PathBuf>,
    func: F,
    _output: PhantomData<fn() -> T>,
}

impl<F, T> Cached<F, T>
where
    F: Fn(&Args<'_>) -> anyhow::Result<T> + Send + Sync,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.params = names.into_iter().map(|name| name.as_ref().into()).collect();
        self
    }

    /// Leaves `param` out of the fingerprint.
    pub fn ignore(mut self, param: &str) -> Self {
        self.ignored.insert(param.into());
        self
    }

    /// Treats entries as stale once `path` is modified after they were
    /// written.
    pub fn source(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.sources.push(path.into());
        self
    }

    pub fn identity(&self) -> &FnIdentity {
        &self.identity
    }

    fn param_name(&self, index: usize) -> ArcStr {
        match self.params.get(index) {
            Some(name) => name.clone(),
            None => format!("arg{index}").into(),
        }
    }

    fn is_ignored(&self, encoder: &Encoder, param: &str) -> bool {
        self.ignored.contains(param) || encoder.is_ignored(self.identity.name(), param)
    }

    /// The fingerprint of a call with `args`, and the parameters that went
    /// into it.
    fn fingerprint_with_params(
        &self,
        args: &[Value],
    ) -> Result<(Fingerprint, Vec<String>), CacheError> {
        let encoder = read(&self.cache.encoder);
        let mut hasher = Blake3Hasher::new();
        let mut used = Vec::new();

        for (index, value) in args.iter().enumerate() {
            let param = self.param_name(index);
            if self.is_ignored(&encoder, &param) {
                continue;
            }

            let (tag, bytes) = encoder.encode(value).map_err(|err| match err {
                EncodeError::Unregistered(type_name) => CacheError::Unencodable {
                    function: self.identity.name().to_owned(),
                    param: param.to_string(),
                    type_name,
                },
                EncodeError::Failed(source) => {
                    CacheError::Encode(format!("{}({param})", self.identity.name()), source.to_string())
                }
            })?;

            hasher
                .update_framed(param.as_bytes())
                .update_framed(tag.as_bytes())
                .update_framed(&bytes);
            used.push(param.to_string());
        }

        let args = Hash32::from(hasher);
        let function = self.identity.digest();

        let mut combined = Blake3Hasher::new();
        combined.update(function.as_bytes()).update(args.as_bytes());

        let fingerprint = Fingerprint {
            function,
            args,
            digest: combined.into(),
        };

        Ok((fingerprint, used))
    }

    pub fn fingerprint(&self, args: &[Value]) -> Result<Fingerprint, CacheError> {
        self.fingerprint_with_params(args).map(|(fingerprint, _)| fingerprint)
    }

    /// Calls the function through the cache.
    pub fn invoke(&self, args: &[Value]) -> Result<T, CacheError> {
        let (fingerprint, params) = self.fingerprint_with_params(args)?;

        let claim = self.cache.claim(fingerprint.digest);
        let _guard = lock(&claim.slot);
        self.lookup_or_compute(args, &fingerprint, params)
    }

    fn lookup_or_compute(
        &self,
        args: &[Value],
        fingerprint: &Fingerprint,
        params: Vec<String>,
    ) -> Result<T, CacheError> {
        let name = self.identity.name();
        let path = self.cache.path_for(name, fingerprint);
        let label = format!("{name}(<{}…>)", fingerprint.digest.short());

        if self.cache.skip() {
            tracing::info!("Cache skip for {label}");
        } else {
            match entry::load::<T>(&path) {
                Ok(Some(entry)) if entry.meta.is_fresh() => {
                    tracing::info!("Cache hit for {label}");
                    return Ok(entry.value);
                }
                Ok(Some(_)) => tracing::info!("Cache entry for {label} is stale"),
                Ok(None) => tracing::info!("Cache miss for {label}"),
                Err(err) => tracing::warn!("Discarding cache entry for {label}: {err}"),
            }
        }

        let sources = self
            .sources
            .iter()
            .map(|path| SourceStamp::capture(path))
            .collect();

        let value = (self.func)(&Args::new(args)).map_err(CacheError::Function)?;

        let meta = EntryMeta {
            function: name.to_owned(),
            function_digest: fingerprint.function.to_hex(),
            args_digest: fingerprint.args.to_hex(),
            params,
            sources,
        };

        entry::store(&path, &meta, &value)?;
        Ok(value)
    }
}

impl<F, T> Operation for Cached<F, T>
where
    F: Fn(&Args<'_>) -> anyhow::Result<T> + Send + Sync,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn call(&self, args: &Args<'_>) -> anyhow::Result<Value> {
        match self.invoke(args.values()) {
            Ok(value) => Ok(Value::new(value)),
            Err(CacheError::Function(source)) => Err(source),
            Err(err) => Err(err.into()),
        }
    }

    fn name(&self) -> std::borrow::Cow<'static, str> {
        self.identity.name().to_owned().into()
    }
}

impl Computer {
    /// Wraps `func` in this computer's cache.
    pub fn cached<F, T>(&self, identity: FnIdentity, func: F) -> Cached<F, T>
    where
        F: Fn(&Args<'_>) -> anyhow::Result<T> + Send + Sync,
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.cache().wrap(identity, func)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        cache: Arc<Cache>,
        calls: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap();
        Fixture {
            _dir: dir,
            cache: Arc::new(Cache::new(path)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    type Op = Box<dyn Fn(&Args<'_>) -> anyhow::Result<i64> + Send + Sync>;

    fn add_numbers(calls: &Arc<AtomicUsize>) -> Op {
        let calls = calls.clone();
        Box::new(move |args: &Args<'_>| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(args.get::<i64>(0)? + args.get::<i64>(1)?)
        })
    }

    fn values(a: i64, b: i64) -> [Value; 2] {
        [Value::new(a), Value::new(b)]
    }

    #[test]
    fn test_second_call_is_a_hit() {
        let fx = fixture();
        let f = fx
            .cache
            .wrap(FnIdentity::versioned("add", "1"), add_numbers(&fx.calls));

        assert_eq!(f.invoke(&values(1, 2)).unwrap(), 3);
        assert_eq!(f.invoke(&values(1, 2)).unwrap(), 3);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_changed_argument_recomputes() {
        let fx = fixture();
        let f = fx
            .cache
            .wrap(FnIdentity::versioned("add", "1"), add_numbers(&fx.calls));

        f.invoke(&values(1, 2)).unwrap();
        assert_eq!(f.invoke(&values(1, 5)).unwrap(), 6);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 2);
        assert_ne!(f.fingerprint(&values(1, 2)).unwrap(), f.fingerprint(&values(1, 5)).unwrap());
    }

    #[test]
    fn test_ignored_argument_hits() {
        let fx = fixture();
        let f = fx
            .cache
            .wrap(FnIdentity::versioned("add", "1"), add_numbers(&fx.calls))
            .params(["x", "y"])
            .ignore("y");

        assert_eq!(f.invoke(&values(1, 2)).unwrap(), 3);
        // stale by design: `y` does not count
        assert_eq!(f.invoke(&values(1, 5)).unwrap(), 3);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_encoder_ignore_list() {
        let fx = fixture();
        fx.cache.ignore("add", "arg1");
        let f = fx
            .cache
            .wrap(FnIdentity::versioned("add", "1"), add_numbers(&fx.calls));

        f.invoke(&values(1, 2)).unwrap();
        f.invoke(&values(1, 9)).unwrap();
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_changed_function_invalidates() {
        let fx = fixture();
        let v1 = fx
            .cache
            .wrap(FnIdentity::versioned("add", "1"), add_numbers(&fx.calls));
        let v2 = fx
            .cache
            .wrap(FnIdentity::versioned("add", "2"), add_numbers(&fx.calls));

        v1.invoke(&values(1, 2)).unwrap();
        v2.invoke(&values(1, 2)).unwrap();
        assert_eq!(fx.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_source_identity() {
        let a = fn_identity!("f", |x: i64| x + 1);
        let b = fn_identity!("f", |x: i64|   x   + 1);
        let c = fn_identity!("f", |x: i64| x + 2);

        assert_eq!(a, b);
        assert_ne!(a.digest(), c.digest());

        let d = FnIdentity::from_source("g", "fn g() {\n    1\n}");
        let e = FnIdentity::from_source("g", "fn g() { 1 }");
        assert_eq!(d, e);
        assert_ne!(d, FnIdentity::versioned("g", "1"));
    }

    #[test]
    fn test_unencodable_argument() {
        struct Handle;

        let fx = fixture();
        let calls = fx.calls.clone();
        let f = fx.cache.wrap(FnIdentity::versioned("load", "1"), move |_: &Args<'_>| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1i64)
        });

        let err = f.invoke(&[Value::new(Handle)]).unwrap_err();
        let CacheError::Unencodable {
            function, param, ..
        } = err
        else {
            panic!("expected an unencodable argument error");
        };
        assert_eq!((function.as_str(), param.as_str()), ("load", "arg0"));
        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);

        // ignoring the parameter makes the call cacheable
        let f = f.ignore("arg0");
        f.invoke(&[Value::new(Handle)]).unwrap();
        f.invoke(&[Value::new(Handle)]).unwrap();
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_skip_recomputes() {
        let fx = fixture();
        let f = fx
            .cache
            .wrap(FnIdentity::versioned("add", "1"), add_numbers(&fx.calls));

        f.invoke(&values(1, 2)).unwrap();
        fx.cache.set_skip(true);
        f.invoke(&values(1, 2)).unwrap();
        fx.cache.set_skip(false);
        f.invoke(&values(1, 2)).unwrap();

        assert_eq!(fx.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stale_source() {
        let fx = fixture();
        let source = fx.cache.dir().join("input.txt");
        fs::write(&source, "1").unwrap();

        let f = fx
            .cache
            .wrap(FnIdentity::versioned("add", "1"), add_numbers(&fx.calls))
            .source(&source);

        f.invoke(&values(1, 2)).unwrap();
        f.invoke(&values(1, 2)).unwrap();
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);

        let path = f.cache.path_for("add", &f.fingerprint(&values(1, 2)).unwrap());
        let mut entry = entry::load::<i64>(&path).unwrap().unwrap();
        for stamp in &mut entry.meta.sources {
            stamp.modified = stamp.modified.map(|(secs, nanos)| (secs - 10, nanos));
        }
        entry::store(&path, &entry.meta, &entry.value).unwrap();

        f.invoke(&values(1, 2)).unwrap();
        assert_eq!(fx.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let fx = fixture();
        let f = fx
            .cache
            .wrap(FnIdentity::versioned("add", "1"), add_numbers(&fx.calls));

        let path = fx.cache.path_for("add", &f.fingerprint(&values(1, 2)).unwrap());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not cbor").unwrap();

        assert_eq!(f.invoke(&values(1, 2)).unwrap(), 3);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
        assert!(entry::load::<i64>(&path).unwrap().is_some());
    }

    #[test]
    fn test_entries_remove_and_clear() {
        let fx = fixture();
        let add = fx
            .cache
            .wrap(FnIdentity::versioned("add", "1"), add_numbers(&fx.calls));
        let other = fx
            .cache
            .wrap(FnIdentity::versioned("add_more", "1"), add_numbers(&fx.calls));

        add.invoke(&values(1, 2)).unwrap();
        add.invoke(&values(3, 4)).unwrap();
        other.invoke(&values(1, 2)).unwrap();

        let entries = fx.cache.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|(_, meta)| meta.params == ["arg0", "arg1"]));

        assert_eq!(fx.cache.remove("add").unwrap(), 2);
        assert_eq!(fx.cache.clear().unwrap(), 1);
        assert!(fx.cache.entries().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_calls_compute_once() {
        let fx = fixture();
        let calls = fx.calls.clone();
        let slow = fx.cache.wrap(FnIdentity::versioned("slow", "1"), move |args: &Args<'_>| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(50));
            Ok(*args.get::<i64>(0)?)
        });

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| slow.invoke(&[Value::new(8i64)]).unwrap());
            }
        });

        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cached_as_operation() {
        let fx = fixture();
        let f = fx
            .cache
            .wrap(FnIdentity::versioned("add", "1"), add_numbers(&fx.calls));

        let mut c = Computer::new().with_executor(crate::Sequential);
        c.add("sum", f, ["a", "b"]).unwrap();
        c.add_single("a", 20i64).unwrap();
        c.add_single("b", 22i64).unwrap();

        assert_eq!(c.get_as::<i64>("sum").unwrap(), 42);
        assert_eq!(c.get_as::<i64>("sum").unwrap(), 42);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_names_separate_entries() {
        let fx = fixture();
        let double = fx.cache.wrap(FnIdentity::versioned("load-x", "1"), |args: &Args<'_>| {
            Ok(args.get::<i64>(0)? * 2)
        });
        let triple = fx.cache.wrap(FnIdentity::versioned("load_x", "1"), |args: &Args<'_>| {
            Ok(args.get::<i64>(0)? * 3)
        });

        assert_ne!(double.identity().digest(), triple.identity().digest());
        assert_eq!(double.invoke(&[Value::new(5i64)]).unwrap(), 10);
        assert_eq!(triple.invoke(&[Value::new(5i64)]).unwrap(), 15);
    }

    #[test]
    fn test_function_error_is_unchanged() {
        #[derive(Debug, thiserror::Error, PartialEq)]
        #[error("negative input {0}")]
        struct Negative(i64);

        let fx = fixture();
        let root = fx.cache.wrap(FnIdentity::versioned("root", "1"), |args: &Args<'_>| {
            let x = *args.get::<i64>(0)?;
            if x < 0 {
                return Err(Negative(x).into());
            }
            Ok((x as f64).sqrt())
        });

        let mut c = Computer::new().with_executor(crate::Sequential);
        c.add("root", root, ["x"]).unwrap();
        c.add_single("x", -4i64).unwrap();

        let err = c.get("root").unwrap_err();
        let crate::ExecutionError::Task { source, .. } = &err else {
            panic!("expected a task error, got {err}");
        };
        assert_eq!(source.downcast_ref::<Negative>(), Some(&Negative(-4)));
    }

    #[test]
    fn test_panic_releases_claim() {
        let fx = fixture();
        let calls = fx.calls.clone();
        let flaky = fx.cache.wrap(FnIdentity::versioned("flaky", "1"), move |_: &Args<'_>| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first call fails");
            }
            Ok(1i64)
        });

        let args = [Value::new(1i64)];
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| flaky.invoke(&args)));
        assert!(result.is_err());
        assert!(lock(&fx.cache.inflight).is_empty());

        assert_eq!(flaky.invoke(&args).unwrap(), 1);
        assert!(lock(&fx.cache.inflight).is_empty());
    }
}
