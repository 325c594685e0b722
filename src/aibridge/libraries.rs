//! Script library resolution for ExtendScript injection.
//!
//! Assembles a single script from a user payload and a set of requested
//! library names. With a `manifest.json` present, dependencies are resolved
//! transitively (each library emitted exactly once, dependencies first) and
//! declared exports are checked for symbol collisions. Without a manifest,
//! `<name>.jsx` files are concatenated in request order. File contents are
//! cached for the life of the process.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::aibridge::config::BridgeConfig;

/// Sentinel line separating injected libraries from the user payload.
pub const USER_SCRIPT_SENTINEL: &str = "// === User Script ===";

/// Failures during library resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum LibraryError {
    /// A requested or depended-on library is not in the manifest.
    UnknownLibrary(String),
    /// A library's file is missing from the resources directory.
    FileNotFound(String),
    /// Two reachable libraries declare the same export.
    SymbolCollision {
        symbol: String,
        first: String,
        second: String,
    },
    /// The manifest could not be read or parsed.
    Manifest(String),
}

impl fmt::Display for LibraryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryError::UnknownLibrary(name) => write!(f, "Unknown library: {}", name),
            LibraryError::FileNotFound(file) => write!(f, "Library file not found: {}", file),
            LibraryError::SymbolCollision {
                symbol,
                first,
                second,
            } => write!(
                f,
                "Symbol collision: '{}' defined in both '{}' and '{}'",
                symbol, first, second
            ),
            LibraryError::Manifest(msg) => write!(f, "Manifest error: {}", msg),
        }
    }
}

impl std::error::Error for LibraryError {}

/// One manifest entry.
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryEntry {
    pub file: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub exports: Vec<String>,
}

/// The read-only `name → entry` mapping loaded from `manifest.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LibraryManifest {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub libraries: HashMap<String, LibraryEntry>,
}

/// Manifest-driven script composer with per-process caches.
///
/// The manifest is memoized under one mutex, file contents under another;
/// [`clear_cache`](LibraryResolver::clear_cache) resets both for tests.
pub struct LibraryResolver {
    resources_dir: PathBuf,
    manifest_cache: Mutex<Option<LibraryManifest>>,
    file_cache: Mutex<HashMap<PathBuf, String>>,
}

impl LibraryResolver {
    pub fn new(resources_dir: impl Into<PathBuf>) -> Self {
        Self {
            resources_dir: resources_dir.into(),
            manifest_cache: Mutex::new(None),
            file_cache: Mutex::new(HashMap::new()),
        }
    }

    /// The directory manifests and `.jsx` files are read from.
    pub fn resources_dir(&self) -> &Path {
        &self.resources_dir
    }

    /// Load the manifest lazily. Missing or unreadable manifests degrade to
    /// an empty one, which switches resolution into fallback mode.
    pub fn manifest(&self) -> LibraryManifest {
        {
            let cache = self
                .manifest_cache
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(manifest) = cache.as_ref() {
                return manifest.clone();
            }
        }

        let manifest_path = self.resources_dir.join("manifest.json");
        let manifest = if manifest_path.exists() {
            match fs::read_to_string(&manifest_path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str::<LibraryManifest>(&raw).map_err(|e| e.to_string()))
            {
                Ok(manifest) => manifest,
                Err(e) => {
                    log::error!("Failed to load manifest: {}", e);
                    LibraryManifest::default()
                }
            }
        } else {
            LibraryManifest::default()
        };

        let mut cache = self
            .manifest_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        cache.get_or_insert(manifest).clone()
    }

    /// Resolve libraries with transitive dependencies into one script blob.
    ///
    /// # Errors
    ///
    /// [`LibraryError::UnknownLibrary`] for names absent from the manifest,
    /// [`LibraryError::FileNotFound`] for missing files, and
    /// [`LibraryError::SymbolCollision`] when two reachable libraries export
    /// the same symbol. On error no output is produced.
    pub fn resolve(&self, includes: &[String]) -> Result<String, LibraryError> {
        if includes.is_empty() {
            return Ok(String::new());
        }

        let manifest = self.manifest();
        if manifest.libraries.is_empty() {
            return self.simple_resolve(includes);
        }

        let mut resolved: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut exports: HashMap<String, String> = HashMap::new();

        for name in includes {
            self.resolve_one(&manifest, name, &mut seen, &mut exports, &mut resolved)?;
        }

        Ok(resolved.join("\n\n"))
    }

    /// Depth-first post-order emission of one library and its dependencies.
    fn resolve_one(
        &self,
        manifest: &LibraryManifest,
        name: &str,
        seen: &mut HashSet<String>,
        exports: &mut HashMap<String, String>,
        resolved: &mut Vec<String>,
    ) -> Result<(), LibraryError> {
        if seen.contains(name) {
            return Ok(());
        }

        let entry = manifest
            .libraries
            .get(name)
            .ok_or_else(|| LibraryError::UnknownLibrary(name.to_string()))?;

        // Dependencies first.
        for dep in &entry.dependencies {
            self.resolve_one(manifest, dep, seen, exports, resolved)?;
        }

        for symbol in &entry.exports {
            if let Some(first) = exports.get(symbol) {
                return Err(LibraryError::SymbolCollision {
                    symbol: symbol.clone(),
                    first: first.clone(),
                    second: name.to_string(),
                });
            }
            exports.insert(symbol.clone(), name.to_string());
        }

        let path = self.resources_dir.join(&entry.file);
        let content = self
            .read_library_file(&path)
            .map_err(|_| LibraryError::FileNotFound(entry.file.clone()))?;
        resolved.push(content);

        seen.insert(name.to_string());
        Ok(())
    }

    /// Fallback: concatenate `<name>.jsx` files in request order, no
    /// dependency resolution, no collision checks.
    fn simple_resolve(&self, includes: &[String]) -> Result<String, LibraryError> {
        let mut chunks = Vec::new();
        for name in includes {
            let path = self.resources_dir.join(format!("{}.jsx", name));
            let content = self.read_library_file(&path).map_err(|_| {
                LibraryError::FileNotFound(format!(
                    "{}.jsx (looked in {})",
                    name,
                    self.resources_dir.display()
                ))
            })?;
            chunks.push(content);
        }
        Ok(chunks.join("\n"))
    }

    /// Read a library file through the content cache.
    fn read_library_file(&self, path: &Path) -> Result<String, LibraryError> {
        {
            let cache = self.file_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(content) = cache.get(path) {
                return Ok(content.clone());
            }
        }

        let content = fs::read_to_string(path)
            .map_err(|_| LibraryError::FileNotFound(path.display().to_string()))?;

        let mut cache = self.file_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(path.to_path_buf(), content.clone());
        Ok(content)
    }

    /// Prepend resolved library code to a user script.
    ///
    /// With no includes the script passes through untouched; otherwise the
    /// libraries come first, then the [`USER_SCRIPT_SENTINEL`] line, then the
    /// payload.
    pub fn inject_libraries(
        &self,
        script: &str,
        includes: &[String],
    ) -> Result<String, LibraryError> {
        if includes.is_empty() {
            return Ok(script.to_string());
        }
        let library_code = self.resolve(includes)?;
        Ok(format!(
            "{}\n\n{}\n{}",
            library_code, USER_SCRIPT_SENTINEL, script
        ))
    }

    /// Drop both caches. Useful for tests.
    pub fn clear_cache(&self) {
        {
            let mut cache = self
                .manifest_cache
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *cache = None;
        }
        let mut cache = self.file_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.clear();
    }
}

/// Process-wide resolver over the configured resources directory.
static RESOLVER: Lazy<LibraryResolver> = Lazy::new(|| {
    let dir = BridgeConfig::from_env()
        .map(|c| c.script_library_dir)
        .unwrap_or_else(|_| BridgeConfig::default().script_library_dir);
    LibraryResolver::new(dir)
});

/// The global library resolver instance.
pub fn global_resolver() -> &'static LibraryResolver {
    &RESOLVER
}
