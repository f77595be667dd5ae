// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the on-disk storage layout.

use std::path::{Path, PathBuf};

/// Default base directory for all persistent storage.
pub const DATA_ROOT: &str = "/data";

/// Storage path utilities.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entity key/value + alarm database.
    pub fn entities_db(&self) -> PathBuf {
        self.root.join("entities.redb")
    }

    /// Embedded edge graph database.
    pub fn edges_db(&self) -> PathBuf {
        self.root.join("edges.redb")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_root_is_data() {
        let paths = StoragePaths::default();
        assert_eq!(paths.root(), Path::new("/data"));
        assert_eq!(paths.entities_db(), PathBuf::from("/data/entities.redb"));
    }

    #[test]
    fn custom_root() {
        let paths = StoragePaths::new("/tmp/identity");
        assert_eq!(paths.edges_db(), PathBuf::from("/tmp/identity/edges.redb"));
    }
}
