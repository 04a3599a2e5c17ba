//! Native toolchain settings, read from the environment.

use std::env;
use std::path::Path;

pub const DEFAULT_CFLAGS: &str = "-O3";
pub const DEFAULT_SHARED_CFLAGS: &str = "-shared -fPIC";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// C compiler executable.
    pub cc: String,
    pub cflags: Vec<String>,
    /// Extra flags when building a shared library.
    pub shared_cflags: Vec<String>,
    pub shared_library_suffix: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl BackendConfig {
    /// `CC`, `CFLAGS`, `SHARED_CFLAGS`, `SHARED_LIBRARY_SUFFIX`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Unset and blank values both take the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());
        let cc = lookup("CC").unwrap_or_else(default_cc);
        let cflags = lookup("CFLAGS").unwrap_or_else(|| DEFAULT_CFLAGS.to_string());
        let shared_cflags =
            lookup("SHARED_CFLAGS").unwrap_or_else(|| DEFAULT_SHARED_CFLAGS.to_string());
        let shared_library_suffix =
            lookup("SHARED_LIBRARY_SUFFIX").unwrap_or_else(|| default_suffix().to_string());
        Self {
            cc,
            cflags: split_flags(&cflags),
            shared_cflags: split_flags(&shared_cflags),
            shared_library_suffix,
        }
    }

    /// `<stem><suffix>` next to `stem`.
    pub fn shared_library_path(&self, stem: &Path) -> std::path::PathBuf {
        let mut name = stem.as_os_str().to_owned();
        name.push(&self.shared_library_suffix);
        name.into()
    }
}

fn split_flags(flags: &str) -> Vec<String> {
    flags.split_whitespace().map(str::to_string).collect()
}

/// `gcc` when it is on `PATH`, `cc` otherwise.
fn default_cc() -> String {
    let found = env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| dir.join("gcc").is_file()))
        .unwrap_or(false);
    let cc = if found { "gcc" } else { "cc" };
    cc.to_string()
}

fn default_suffix() -> &'static str {
    if cfg!(windows) {
        ".dll"
    } else {
        ".so"
    }
}
