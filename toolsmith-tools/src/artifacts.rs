//! Durable on-disk copies of synthesized source.
//!
//! Artifacts exist for inspection and crash forensics. They are overwritten on
//! re-synthesis and never read back by the engine.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use toolsmith_primitives::CapabilityName;
use tracing::debug;

/// Directory holding one source file per capability.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Opens (or creates) the artifact directory, touching `marker` inside it
    /// when supplied.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors encountered while creating the directory or marker.
    pub async fn open(root: impl Into<PathBuf>, marker: Option<&str>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        if let Some(marker) = marker {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(root.join(marker))
                .await?;
        }

        debug!(root = %root.display(), "artifact directory ready");
        Ok(Self { root })
    }

    /// Returns the artifact directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the artifact path for a capability.
    #[must_use]
    pub fn path_for(&self, name: &CapabilityName, extension: &str) -> PathBuf {
        self.root.join(format!("{name}.{extension}"))
    }

    /// Writes `source` verbatim, replacing any previous artifact of the same name.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from the write.
    pub async fn write(
        &self,
        name: &CapabilityName,
        extension: &str,
        source: &str,
    ) -> io::Result<PathBuf> {
        let path = self.path_for(name, extension);
        fs::write(&path, source).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_directory_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("runtime_tools");

        let store = ArtifactStore::open(&root, Some("__init__.py")).await.unwrap();

        assert!(store.root().is_dir());
        assert!(root.join("__init__.py").is_file());
    }

    #[tokio::test]
    async fn open_keeps_existing_marker_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("__init__.py"), "# keep").unwrap();

        ArtifactStore::open(dir.path(), Some("__init__.py")).await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join("__init__.py")).unwrap();
        assert_eq!(contents, "# keep");
    }

    #[tokio::test]
    async fn write_overwrites_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path(), None).await.unwrap();
        let name = CapabilityName::new("echo").unwrap();

        store.write(&name, "py", "first").await.unwrap();
        let path = store.write(&name, "py", "second").await.unwrap();

        assert_eq!(path, dir.path().join("echo.py"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "second");
    }
}
