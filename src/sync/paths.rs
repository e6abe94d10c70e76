//! Asset directory path management
//!
//! ```text
//! ~/.cache/dori-assets/
//! ├── resources/
//! │   └── <locale>/
//! │       └── <type>/              # Working copy of branch <locale>/<type>
//! └── locks/
//!     └── <locale>/
//!         └── <type>.lock          # flock-based locking
//! ```

use std::path::{Path, PathBuf};

use crate::types::BranchName;

/// Manages all filesystem paths for the asset directory layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPaths {
    root: PathBuf,
}

impl AssetPaths {
    /// Creates a new AssetPaths with the specified root directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root asset directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/resources`
    pub fn resources_dir(&self) -> PathBuf {
        self.root.join("resources")
    }

    /// `{root}/locks`
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Working copy for a branch: `{root}/resources/{locale}/{type}`
    pub fn working_dir(&self, branch: &BranchName) -> PathBuf {
        self.resources_dir()
            .join(branch.locale.as_str())
            .join(branch.resource_type.as_str())
    }

    /// Lock file for a branch: `{root}/locks/{locale}/{type}.lock`
    pub fn lock_path(&self, branch: &BranchName) -> PathBuf {
        self.locks_dir()
            .join(branch.locale.as_str())
            .join(format!("{}.lock", branch.resource_type.as_str()))
    }
}

impl Default for AssetPaths {
    /// Creates an AssetPaths using the system cache directory + "dori-assets"
    ///
    /// Uses `dirs::cache_dir()` which resolves to:
    /// - Linux: `~/.cache`
    /// - macOS: `~/Library/Caches`
    /// - Windows: `C:\Users\<user>\AppData\Local`
    fn default() -> Self {
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache"));
        Self::new(cache_dir.join("dori-assets"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_paths() -> AssetPaths {
        AssetPaths::new("asset-root")
    }

    fn branch(s: &str) -> BranchName {
        s.parse().unwrap()
    }

    #[test]
    fn test_new() {
        let paths = AssetPaths::new(PathBuf::from("tmp-assets"));
        assert_eq!(paths.root(), Path::new("tmp-assets"));
    }

    #[test]
    fn test_working_dir() {
        assert_eq!(
            test_paths().working_dir(&branch("jp/basic")),
            PathBuf::from("asset-root/resources/jp/basic")
        );
    }

    #[test]
    fn test_lock_path() {
        assert_eq!(
            test_paths().lock_path(&branch("en/movie")),
            PathBuf::from("asset-root/locks/en/movie.lock")
        );
    }

    #[test]
    fn test_distinct_branches_have_distinct_working_dirs() {
        let paths = test_paths();
        assert_ne!(
            paths.working_dir(&branch("jp/basic")),
            paths.working_dir(&branch("jp/movie"))
        );
        assert_ne!(
            paths.working_dir(&branch("jp/basic")),
            paths.working_dir(&branch("en/basic"))
        );
    }

    #[test]
    fn test_default_uses_cache_dir() {
        let paths = AssetPaths::default();
        assert!(paths.root().ends_with("dori-assets"));
    }
}
