//! Framework directory layout under the application base path.

use std::{
    io,
    path::{Path, PathBuf},
};

const SETUP_MARKER: &str = "storage/framework/.setup_complete";

/// Directories created by `setup`.
const STORAGE_DIRECTORIES: &[&str] = &[
    "storage",
    "storage/app",
    "storage/framework/cache/data",
    "storage/framework/cache/views",
    "storage/framework/sessions",
    "storage/framework/keys",
    "storage/logs",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    base: PathBuf,
}

impl Paths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Path under the base directory. Leading slashes on `relative` are ignored.
    pub fn base(&self, relative: &str) -> PathBuf {
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            self.base.clone()
        } else {
            self.base.join(relative)
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    pub fn app(&self) -> PathBuf {
        self.base("app")
    }

    pub fn config(&self) -> PathBuf {
        self.base("config")
    }

    pub fn public(&self) -> PathBuf {
        self.base("public")
    }

    pub fn resources(&self) -> PathBuf {
        self.base("resources")
    }

    pub fn views(&self) -> PathBuf {
        self.base("resources/views")
    }

    pub fn routes(&self) -> PathBuf {
        self.base("routes")
    }

    pub fn storage(&self) -> PathBuf {
        self.base("storage")
    }

    pub fn app_storage(&self) -> PathBuf {
        self.base("storage/app")
    }

    pub fn cache_data(&self) -> PathBuf {
        self.base("storage/framework/cache/data")
    }

    pub fn cache_views(&self) -> PathBuf {
        self.base("storage/framework/cache/views")
    }

    pub fn sessions(&self) -> PathBuf {
        self.base("storage/framework/sessions")
    }

    pub fn keys(&self) -> PathBuf {
        self.base("storage/framework/keys")
    }

    pub fn logs(&self) -> PathBuf {
        self.base("storage/logs")
    }

    /// Resolve `path` against the base unless it is already absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        }
    }

    pub fn ensure_directory(path: &Path) -> io::Result<PathBuf> {
        std::fs::create_dir_all(path)?;
        Ok(path.to_path_buf())
    }

    /// Create every storage directory and mark setup complete.
    pub fn create_storage_structure(&self) -> io::Result<Vec<PathBuf>> {
        let created = STORAGE_DIRECTORIES
            .iter()
            .map(|dir| Self::ensure_directory(&self.base(dir)))
            .collect::<io::Result<Vec<_>>>()?;
        self.mark_setup_complete()?;
        Ok(created)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.base(SETUP_MARKER).exists()
    }

    pub fn mark_setup_complete(&self) -> io::Result<()> {
        let marker = self.base(SETUP_MARKER);
        if let Some(parent) = marker.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(marker, chrono::Utc::now().to_rfc3339())
    }
}
