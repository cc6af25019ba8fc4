//! Staging area for in-progress uploads: one append-only file per file id.

use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs::{self, File, OpenOptions};
use tracing::{info, warn};

/// On-disk staging root holding the bytes of uploads still in flight.
#[derive(Clone, Debug)]
pub struct StagingArea {
    root: PathBuf,
}

#[derive(Debug)]
pub enum StagingError {
    /// The file id would resolve outside the staging root.
    InvalidId,
    Io(io::Error),
}

impl From<io::Error> for StagingError {
    fn from(err: io::Error) -> Self {
        StagingError::Io(err)
    }
}

impl StagingArea {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Creates the staging root and restricts it to the server user.
    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(
                &self.root,
                std::fs::Permissions::from_mode(crate::config::STAGING_DIR_MODE),
            )
            .await?;
        }
        Ok(())
    }

    /// Deterministic staging path for `file_id`.
    ///
    /// The id must be a single plain path segment; anything else (`..`,
    /// separators, drive prefixes) is rejected before touching the
    /// filesystem.
    pub fn path_for(&self, file_id: &str) -> Result<PathBuf, StagingError> {
        let mut components = Path::new(file_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) if segment == OsStr::new(file_id) => {
                Ok(self.root.join(file_id))
            }
            _ => Err(StagingError::InvalidId),
        }
    }

    /// Opens (or creates) the staging file for appending.
    pub async fn open_append(&self, file_id: &str) -> Result<File, StagingError> {
        let path = self.path_for(file_id)?;
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await?;
        Ok(file)
    }

    /// Best-effort deletion of the staging file; failure is logged only.
    pub async fn remove(&self, file_id: &str) {
        let Ok(path) = self.path_for(file_id) else {
            return;
        };
        if let Err(err) = fs::remove_file(&path).await {
            warn!(file_id, error = %err, "cannot delete staging file");
        }
    }

    /// Removes staging files untouched for at least `ttl`.
    ///
    /// Active uploads refresh their mtime on every chunk, so only
    /// abandoned transfers age out.
    pub async fn remove_stale(&self, ttl: Duration) -> io::Result<()> {
        if ttl.is_zero() {
            return Ok(());
        }
        if fs::metadata(&self.root).await.is_err() {
            return Ok(());
        }

        let now = SystemTime::now();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = match metadata.modified() {
                Ok(value) => value,
                Err(_) => continue,
            };
            let age = match now.duration_since(modified) {
                Ok(value) => value,
                Err(_) => continue,
            };
            if age >= ttl {
                let path = entry.path();
                if let Err(err) = fs::remove_file(&path).await {
                    warn!(path = ?path, error = %err, "failed to remove stale staging file");
                } else {
                    info!(path = ?path, "removed stale staging file");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    fn make_staging() -> (tempfile::TempDir, StagingArea) {
        let temp = tempdir().expect("tempdir");
        let staging = StagingArea::new(temp.path().join("staging"));
        (temp, staging)
    }

    #[test]
    fn path_for_rejects_escaping_ids() {
        let staging = StagingArea::new(PathBuf::from("/tmp/staging"));
        assert!(matches!(staging.path_for(".."), Err(StagingError::InvalidId)));
        assert!(matches!(staging.path_for("."), Err(StagingError::InvalidId)));
        assert!(matches!(staging.path_for("a/b"), Err(StagingError::InvalidId)));
        assert!(matches!(staging.path_for(""), Err(StagingError::InvalidId)));
        assert!(staging.path_for("f123").is_ok());
    }

    #[tokio::test]
    async fn open_append_accumulates_bytes() {
        let (_temp, staging) = make_staging();
        staging.ensure_root().await.expect("ensure root");

        let mut sink = staging.open_append("f1").await.expect("open");
        sink.write_all(b"hel").await.expect("write");
        sink.flush().await.expect("flush");
        drop(sink);

        let mut sink = staging.open_append("f1").await.expect("open again");
        sink.write_all(b"lo").await.expect("write");
        sink.flush().await.expect("flush");
        drop(sink);

        let path = staging.path_for("f1").expect("path");
        let contents = fs::read(path).await.expect("read");
        assert_eq!(contents, b"hello");
    }

    #[tokio::test]
    async fn remove_is_silent_for_missing_files() {
        let (_temp, staging) = make_staging();
        staging.ensure_root().await.expect("ensure root");
        staging.remove("never-written").await;
    }

    #[tokio::test]
    async fn remove_stale_spares_fresh_files() {
        let (_temp, staging) = make_staging();
        staging.ensure_root().await.expect("ensure root");

        let mut sink = staging.open_append("f1").await.expect("open");
        sink.write_all(b"abc").await.expect("write");
        sink.flush().await.expect("flush");
        drop(sink);
        let path = staging.path_for("f1").expect("path");

        // Zero TTL disables the sweep entirely.
        staging.remove_stale(Duration::ZERO).await.expect("sweep");
        assert!(fs::metadata(&path).await.is_ok());

        staging
            .remove_stale(Duration::from_secs(3600))
            .await
            .expect("sweep");
        assert!(fs::metadata(&path).await.is_ok());

        tokio::time::sleep(Duration::from_millis(50)).await;
        staging
            .remove_stale(Duration::from_millis(10))
            .await
            .expect("sweep");
        assert!(fs::metadata(&path).await.is_err());
    }
}
