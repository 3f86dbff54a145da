//! Explicit decode context threaded through parsing and synthesis.
//!
//! The context owns the two host seams the core depends on: a virtual
//! filesystem for out-of-container files, and the per-render sample cache.
//! There are no ambient singletons; verbosity and other knobs travel here as
//! plain data.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::SampleData;
use crate::error::Result;
use crate::stream::ByteView;

/// Host-provided access to files referenced by name from inside an archive.
///
/// The core never touches platform file APIs for these lookups, so hosts can
/// sandbox or virtualize them.
pub trait VirtualFs: Send + Sync {
    /// Open a named file and return its contents.
    fn open(&self, name: &str) -> io::Result<Vec<u8>>;
}

/// A filesystem that refuses every lookup.
///
/// The default for contexts built without a host filesystem.
#[derive(Debug, Default)]
pub struct NullFs;

impl VirtualFs for NullFs {
    fn open(&self, name: &str) -> io::Result<Vec<u8>> {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no filesystem attached (requested '{name}')"),
        ))
    }
}

/// A filesystem rooted at a directory on disk, used by the CLI.
#[derive(Debug)]
pub struct DiskFs {
    base: PathBuf,
}

impl DiskFs {
    /// Create a filesystem resolving names relative to `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        DiskFs { base: base.into() }
    }
}

impl VirtualFs for DiskFs {
    fn open(&self, name: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.base.join(name))
    }
}

/// Request-scoped knobs for parsing and playback.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Emit per-event diagnostics and include skipped opcodes in reports.
    pub verbose: bool,
}

/// Decode context: virtual filesystem, sample cache and options.
pub struct ArchiveContext {
    fs: Box<dyn VirtualFs>,
    samples: Mutex<HashMap<u64, Arc<SampleData>>>,
    /// Options applied to every parse/playback started from this context.
    pub options: ParseOptions,
}

impl Default for ArchiveContext {
    fn default() -> Self {
        ArchiveContext::new()
    }
}

impl ArchiveContext {
    /// Create a context with no filesystem access.
    pub fn new() -> Self {
        ArchiveContext {
            fs: Box::new(NullFs),
            samples: Mutex::new(HashMap::new()),
            options: ParseOptions::default(),
        }
    }

    /// Create a context with a host filesystem.
    pub fn with_fs(fs: Box<dyn VirtualFs>) -> Self {
        ArchiveContext {
            fs,
            samples: Mutex::new(HashMap::new()),
            options: ParseOptions::default(),
        }
    }

    /// Open an external file through the host filesystem.
    pub fn open_file(&self, name: &str) -> Result<ByteView> {
        Ok(ByteView::from_vec(self.fs.open(name)?))
    }

    /// Fetch a previously decoded sample.
    pub fn sample(&self, id: u64) -> Option<Arc<SampleData>> {
        self.samples.lock().get(&id).cloned()
    }

    /// Fetch a decoded sample, decoding at most once per ID.
    ///
    /// The cache lock is held across `decode`, which is what guarantees the
    /// single-flight property if callers ever run concurrently.
    pub fn sample_or_decode<F>(&self, id: u64, decode: F) -> Result<Arc<SampleData>>
    where
        F: FnOnce() -> Result<SampleData>,
    {
        let mut cache = self.samples.lock();
        match cache.entry(id) {
            Entry::Occupied(hit) => Ok(Arc::clone(hit.get())),
            Entry::Vacant(slot) => {
                let decoded = Arc::new(decode()?);
                slot.insert(Arc::clone(&decoded));
                Ok(decoded)
            }
        }
    }

    /// Drop every cached sample. Hosts call this before a new top-level
    /// decode pass.
    pub fn purge_samples(&self) {
        self.samples.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_cache_single_flight() {
        let ctx = ArchiveContext::new();
        let mut decodes = 0;
        for _ in 0..3 {
            ctx.sample_or_decode(7, || {
                decodes += 1;
                Ok(SampleData::new(7, 32000))
            })
            .unwrap();
        }
        assert_eq!(decodes, 1);
        assert!(ctx.sample(7).is_some());
        ctx.purge_samples();
        assert!(ctx.sample(7).is_none());
    }

    #[test]
    fn test_null_fs_rejects() {
        let ctx = ArchiveContext::new();
        assert!(ctx.open_file("missing.bin").is_err());
    }
}
