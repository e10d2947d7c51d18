//! Kernel resolution, compilation and caching.
//!
//! Sources live in a kernel directory as `<name>.wgsl`. Compiling validates a
//! source through the accelerator and writes the accepted text to the cache
//! directory as the compiled artifact. Loading prefers, in order: the
//! in-memory cache, a fresh on-disk artifact, a new compile.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use thiserror::Error;

use super::device::{Accelerator, DeviceError};

pub const KERNEL_EXTENSION: &str = "wgsl";

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Kernel '{name}' not found in {}", dir.display())]
    NotFound { name: String, dir: PathBuf },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Kernel '{name}' could not be built: {source}")]
    Build {
        name: String,
        #[source]
        source: DeviceError,
    },
}

/// A compiled kernel, ready to launch.
pub struct KernelProgram<A: Accelerator> {
    name: String,
    artifact: PathBuf,
    pub(crate) program: A::Program,
}

impl<A: Accelerator> KernelProgram<A> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cached artifact the program was built from.
    pub fn artifact(&self) -> &Path {
        &self.artifact
    }
}

pub struct KernelLoader<A: Accelerator> {
    accelerator: Arc<A>,
    kernel_dir: PathBuf,
    cache_dir: PathBuf,
    programs: Mutex<HashMap<String, Arc<KernelProgram<A>>>>,
    compiles: AtomicUsize,
}

impl<A: Accelerator> KernelLoader<A> {
    pub fn new(accelerator: Arc<A>, kernel_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            accelerator,
            kernel_dir: kernel_dir.into(),
            cache_dir: cache_dir.into(),
            programs: Mutex::new(HashMap::new()),
            compiles: AtomicUsize::new(0),
        }
    }

    pub fn kernel_dir(&self) -> &Path {
        &self.kernel_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Resolve a kernel by name, compiling it if no fresh artifact exists.
    pub fn load(&self, name: &str) -> Result<Arc<KernelProgram<A>>, KernelError> {
        if let Some(program) = self.lock().get(name) {
            return Ok(program.clone());
        }

        let result = self.load_uncached(name);
        match result {
            Ok(program) => {
                let program = Arc::new(program);
                let mut programs = self.lock();
                Ok(programs
                    .entry(name.to_string())
                    .or_insert(program)
                    .clone())
            }
            Err(e) => {
                log::error!("Kernel '{}' unavailable: {}", name, e);
                Err(e)
            }
        }
    }

    /// Compile a kernel given by name or by path to its source. Returns the
    /// path of the written artifact.
    pub fn compile(&self, name_or_path: &str) -> Result<PathBuf, KernelError> {
        let (name, source_path) = self.resolve(name_or_path)?;
        let (artifact, _) = self.compile_source(&name, &source_path)?;
        Ok(artifact)
    }

    /// Names of available kernel sources, sorted, optionally filtered by a
    /// case-insensitive substring.
    pub fn available_kernels(&self, filter: Option<&str>) -> Result<Vec<String>, KernelError> {
        let filter = filter.map(str::to_lowercase);
        let mut names: Vec<String> = self
            .sources()?
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| match &filter {
                Some(f) => name.to_lowercase().contains(f.as_str()),
                None => true,
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// The most recently modified kernel source, if any.
    pub fn latest_kernel(&self) -> Result<Option<String>, KernelError> {
        Ok(self
            .sources()?
            .into_iter()
            .max_by_key(|(_, modified)| *modified)
            .map(|(name, _)| name))
    }

    /// Compiles performed since construction.
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    /// Programs held in the memory cache.
    pub fn cached_kernels(&self) -> usize {
        self.lock().len()
    }

    fn load_uncached(&self, name: &str) -> Result<KernelProgram<A>, KernelError> {
        let artifact = self.artifact_path(name);
        let source = self.source_path(name);

        if is_fresh(&artifact, &source) {
            let text = read(&artifact)?;
            let program = self.build(name, &text)?;
            log::debug!("Loaded kernel '{}' from {}", name, artifact.display());
            return Ok(KernelProgram {
                name: name.to_string(),
                artifact,
                program,
            });
        }

        if !source.is_file() {
            return Err(KernelError::NotFound {
                name: name.to_string(),
                dir: self.kernel_dir.clone(),
            });
        }

        let (artifact, program) = self.compile_source(name, &source)?;
        Ok(KernelProgram {
            name: name.to_string(),
            artifact,
            program,
        })
    }

    fn compile_source(&self, name: &str, source_path: &Path) -> Result<(PathBuf, A::Program), KernelError> {
        let text = read(source_path)?;
        let program = self.build(name, &text)?;

        std::fs::create_dir_all(&self.cache_dir).map_err(|source| KernelError::Io {
            path: self.cache_dir.clone(),
            source,
        })?;
        let artifact = self.artifact_path(name);
        std::fs::write(&artifact, &text).map_err(|source| KernelError::Io {
            path: artifact.clone(),
            source,
        })?;

        self.compiles.fetch_add(1, Ordering::SeqCst);
        log::info!("Compiled kernel '{}' -> {}", name, artifact.display());
        Ok((artifact, program))
    }

    fn build(&self, name: &str, text: &str) -> Result<A::Program, KernelError> {
        self.accelerator
            .compile(name, text)
            .map_err(|source| KernelError::Build {
                name: name.to_string(),
                source,
            })
    }

    fn resolve(&self, name_or_path: &str) -> Result<(String, PathBuf), KernelError> {
        let candidate = Path::new(name_or_path);
        let path = if candidate.is_file() {
            candidate.to_path_buf()
        } else {
            self.source_path(name_or_path)
        };

        if !path.is_file() {
            return Err(KernelError::NotFound {
                name: name_or_path.to_string(),
                dir: self.kernel_dir.clone(),
            });
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name_or_path.to_string());
        Ok((name, path))
    }

    fn sources(&self) -> Result<Vec<(String, SystemTime)>, KernelError> {
        let entries = std::fs::read_dir(&self.kernel_dir).map_err(|source| KernelError::Io {
            path: self.kernel_dir.clone(),
            source,
        })?;

        let mut sources = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(KERNEL_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem() else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            sources.push((stem.to_string_lossy().into_owned(), modified));
        }
        Ok(sources)
    }

    fn source_path(&self, name: &str) -> PathBuf {
        self.kernel_dir.join(format!("{}.{}", name, KERNEL_EXTENSION))
    }

    fn artifact_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.{}", name, KERNEL_EXTENSION))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<KernelProgram<A>>>> {
        self.programs.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// An artifact is fresh when it exists and is no older than its source. With
/// the source gone, any existing artifact is used.
fn is_fresh(artifact: &Path, source: &Path) -> bool {
    let Ok(artifact_time) = std::fs::metadata(artifact).and_then(|m| m.modified()) else {
        return false;
    };
    match std::fs::metadata(source).and_then(|m| m.modified()) {
        Ok(source_time) => artifact_time >= source_time,
        Err(_) => true,
    }
}

fn read(path: &Path) -> Result<String, KernelError> {
    std::fs::read_to_string(path).map_err(|source| KernelError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HostAccelerator;

    const KERNEL: &str = "@compute @workgroup_size(256) fn stretch() {}";

    fn loader(dir: &Path) -> KernelLoader<HostAccelerator> {
        KernelLoader::new(
            Arc::new(HostAccelerator::new()),
            dir.to_path_buf(),
            dir.join("compiled"),
        )
    }

    #[test]
    fn test_load_compiles_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("timestretch00.wgsl"), KERNEL).unwrap();
        let loader = loader(dir.path());

        let first = loader.load("timestretch00").unwrap();
        let second = loader.load("timestretch00").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.compile_count(), 1);
        assert!(first.artifact().exists());
    }

    #[test]
    fn test_fresh_artifact_skips_compile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("timestretch00.wgsl"), KERNEL).unwrap();
        loader(dir.path()).compile("timestretch00").unwrap();

        let reloaded = loader(dir.path());
        reloaded.load("timestretch00").unwrap();
        assert_eq!(reloaded.compile_count(), 0);
    }

    #[test]
    fn test_missing_kernel() {
        let dir = tempfile::tempdir().unwrap();
        let err = loader(dir.path()).load("nope").err().unwrap();
        assert!(matches!(err, KernelError::NotFound { .. }));
    }

    #[test]
    fn test_compile_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timestretch00.wgsl");
        std::fs::write(&path, KERNEL).unwrap();
        let artifact = loader(dir.path())
            .compile(path.to_str().unwrap())
            .unwrap();
        assert_eq!(artifact, dir.path().join("compiled").join("timestretch00.wgsl"));
    }

    #[test]
    fn test_build_failure_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("timestretch00.wgsl"), "fn main() {}").unwrap();
        let loader = loader(dir.path());
        assert!(matches!(
            loader.load("timestretch00"),
            Err(KernelError::Build { .. })
        ));
        assert_eq!(loader.cached_kernels(), 0);
        assert!(!dir.path().join("compiled").join("timestretch00.wgsl").exists());
    }

    #[test]
    fn test_listing_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["timestretch01", "timestretch00", "pitch00"] {
            std::fs::write(dir.path().join(format!("{}.wgsl", name)), KERNEL).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        let loader = loader(dir.path());

        assert_eq!(
            loader.available_kernels(None).unwrap(),
            vec!["pitch00", "timestretch00", "timestretch01"]
        );
        assert_eq!(
            loader.available_kernels(Some("STRETCH")).unwrap(),
            vec!["timestretch00", "timestretch01"]
        );
        assert!(loader.latest_kernel().unwrap().is_some());
    }
}
