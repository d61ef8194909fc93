//! Dynamic Library Loader
//!
//! Resolves an engine name to a shared library file and loads it through
//! libloading. Symbols are looked up by name on demand; nothing is bound
//! eagerly at load time.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use log::{debug, info};

use crate::error::{BmiError, BmiResult};

/// Library naming and search conventions of the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// ELF platforms: `lib<name>.so`, `LD_LIBRARY_PATH`
    Unix,
    /// Mach-O platforms: `lib<name>.dylib`, `DYLD_LIBRARY_PATH`
    Apple,
    /// `<name>.dll`, `PATH`
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(any(target_os = "macos", target_os = "ios")) {
            Platform::Apple
        } else {
            Platform::Unix
        }
    }

    /// Platform-specific shared library file name for an engine
    pub fn library_filename(self, engine: &str) -> String {
        match self {
            Platform::Unix => format!("lib{}.so", engine),
            Platform::Apple => format!("lib{}.dylib", engine),
            Platform::Windows => format!("{}.dll", engine),
        }
    }

    /// Environment variable listing library directories
    pub fn search_env_var(self) -> &'static str {
        match self {
            Platform::Unix => "LD_LIBRARY_PATH",
            Platform::Apple => "DYLD_LIBRARY_PATH",
            Platform::Windows => "PATH",
        }
    }

    pub fn path_separator(self) -> char {
        match self {
            Platform::Windows => ';',
            Platform::Unix | Platform::Apple => ':',
        }
    }
}

/// Fallback directories, most specific first. `{engine}` is substituted.
const FALLBACK_DIRS: [&str; 6] = [
    ".",
    "~/local/lib",
    "~/.local/lib",
    "/opt/{engine}/lib",
    "/usr/local/lib",
    "/usr/lib",
];

/// Resolves a logical engine name to a shared library path
#[derive(Debug, Clone)]
pub struct LibraryLocator {
    engine: String,
    platform: Platform,
    /// Raw value of the platform's library search variable
    env_paths: Option<String>,
    /// Directories searched after the environment and before the fallbacks
    extra_dirs: Vec<PathBuf>,
    home: Option<PathBuf>,
}

impl LibraryLocator {
    /// Locator for the host platform, reading the search variable and home
    /// directory from the process environment
    pub fn new(engine: impl Into<String>) -> Self {
        let platform = Platform::current();
        Self {
            engine: engine.into(),
            platform,
            env_paths: std::env::var(platform.search_env_var()).ok(),
            extra_dirs: Vec::new(),
            home: home_dir(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Override the value of the library search variable
    pub fn with_env_paths(mut self, value: Option<&str>) -> Self {
        self.env_paths = value.map(str::to_string);
        self
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    /// Add a search directory
    pub fn add_search_path(&mut self, path: impl AsRef<Path>) {
        self.extra_dirs.push(path.as_ref().to_path_buf());
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn library_filename(&self) -> String {
        self.platform.library_filename(&self.engine)
    }

    /// Every candidate file, in search order
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<String> = Vec::new();

        if let Some(value) = &self.env_paths {
            dirs.extend(
                value
                    .split(self.platform.path_separator())
                    .filter(|p| !p.is_empty())
                    .map(str::to_string),
            );
        }
        dirs.extend(self.extra_dirs.iter().map(|p| p.display().to_string()));
        dirs.extend(
            FALLBACK_DIRS
                .iter()
                .map(|d| d.replace("{engine}", &self.engine)),
        );

        let filename = self.library_filename();
        dirs.iter()
            .map(|dir| expand_tilde(dir, self.home.as_deref()).join(&filename))
            .collect()
    }

    /// Resolve the library path. An engine that is itself an existing file is
    /// returned unchanged.
    pub fn resolve(&self) -> BmiResult<PathBuf> {
        let direct = Path::new(&self.engine);
        if direct.is_file() {
            info!("Using model library {}", direct.display());
            return Ok(direct.to_path_buf());
        }

        let candidates = self.candidates();
        for candidate in &candidates {
            if candidate.exists() {
                info!("Using model library {}", candidate.display());
                return Ok(candidate.clone());
            }
            debug!("No library at {}", candidate.display());
        }

        Err(BmiError::NotFound {
            engine: self.engine.clone(),
            searched: candidates,
        })
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &str, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home.to_path_buf(),
        (Some(rest), Some(home)) if rest.starts_with('/') || rest.starts_with('\\') => {
            home.join(&rest[1..])
        }
        _ => PathBuf::from(path),
    }
}

/// Prepends a directory to a search-path environment variable and puts the
/// previous value back when dropped.
///
/// The environment is process-wide, so only one guard should be alive at a
/// time.
pub struct SearchPathGuard {
    var: &'static str,
    previous: Option<OsString>,
}

impl SearchPathGuard {
    pub fn push(var: &'static str, dir: &Path) -> Self {
        let previous = std::env::var_os(var);
        let mut paths = vec![dir.to_path_buf()];
        if let Some(prev) = &previous {
            paths.extend(std::env::split_paths(prev));
        }
        match std::env::join_paths(paths) {
            Ok(joined) => std::env::set_var(var, joined),
            Err(e) => debug!("Could not extend {}: {}", var, e),
        }
        Self { var, previous }
    }
}

impl Drop for SearchPathGuard {
    fn drop(&mut self) {
        match &self.previous {
            Some(prev) => std::env::set_var(self.var, prev),
            None => std::env::remove_var(self.var),
        }
    }
}

/// Something symbols can be looked up in
pub trait SymbolSource {
    /// Address of an exported function, or `None` when it is not exported
    fn address(&self, name: &str) -> Option<*const ()>;

    /// Human-readable origin, used in diagnostics
    fn describe(&self) -> String;
}

/// A dynamically loaded shared library
pub struct DynamicLibrary {
    path: PathBuf,
    library: Library,
}

impl DynamicLibrary {
    /// Load a library from the given path
    pub fn load(path: impl AsRef<Path>) -> BmiResult<Self> {
        let path = path.as_ref().to_path_buf();

        // Transitive dependencies are expected next to the library itself.
        let _search = if Platform::current() == Platform::Windows {
            path.parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .map(|dir| SearchPathGuard::push(Platform::Windows.search_env_var(), dir))
        } else {
            None
        };

        info!("Loading library from path {}", path.display());
        // Safety: loading runs the library's initialisers. The caller chose
        // the library and vouches for it.
        let library = unsafe {
            Library::new(&path).map_err(|e| BmiError::Load {
                path: path.clone(),
                message: e.to_string(),
            })?
        };

        Ok(Self { path, library })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SymbolSource for DynamicLibrary {
    fn address(&self, name: &str) -> Option<*const ()> {
        let mut c_name = Vec::with_capacity(name.len() + 1);
        c_name.extend_from_slice(name.as_bytes());
        c_name.push(0);

        // Safety: only the address is read here; the call site casts it to
        // the declared signature.
        let symbol: Symbol<*const ()> = unsafe { self.library.get(&c_name).ok()? };
        let addr = *symbol;
        (!addr.is_null()).then_some(addr)
    }

    fn describe(&self) -> String {
        format!("'{}'", self.path.display())
    }
}

/// In-process symbol table, for models linked into the host binary
#[derive(Debug, Clone, Default)]
pub struct StaticSymbols {
    label: String,
    entries: HashMap<String, usize>,
}

impl StaticSymbols {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: HashMap::new(),
        }
    }

    /// Register a function address under `name`
    pub fn insert(&mut self, name: impl Into<String>, addr: *const ()) {
        self.entries.insert(name.into(), addr as usize);
    }

    pub fn with(mut self, name: impl Into<String>, addr: *const ()) -> Self {
        self.insert(name, addr);
        self
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SymbolSource for StaticSymbols {
    fn address(&self, name: &str) -> Option<*const ()> {
        self.entries.get(name).map(|&addr| addr as *const ())
    }

    fn describe(&self) -> String {
        format!("static table '{}'", self.label)
    }
}
