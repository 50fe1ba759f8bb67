use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const FALLBACK_NAME: &str = "upload";

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Failed to create staging directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write staged file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Source of the timestamp component of staged names.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Builds a staged name from a timestamp, a per-process sequence number and the
/// client's filename reduced to its final component.
pub fn unique_name(original_name: &str, now_millis: i64, salt: u64) -> String {
    format!("{}-{}-{}", now_millis, salt, sanitize(original_name))
}

fn sanitize(original_name: &str) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base == "." || base == ".." {
        FALLBACK_NAME.to_string()
    } else {
        base.chars()
            .map(|c| if c.is_control() { '_' } else { c })
            .collect()
    }
}

pub struct StorageNamer {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    sequence: AtomicU64,
}

impl StorageNamer {
    pub fn new(dir: PathBuf) -> Self {
        Self::with_clock(dir, Arc::new(SystemClock))
    }

    pub fn with_clock(dir: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir,
            clock,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn next_name(&self, original_name: &str) -> String {
        let salt = self.sequence.fetch_add(1, Ordering::Relaxed);
        unique_name(original_name, self.clock.now_millis(), salt)
    }

    pub async fn ensure_dir(&self) -> Result<(), StagingError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StagingError::CreateDir {
                path: self.dir.clone(),
                source,
            })
    }

    /// Ensures the staging directory exists and returns `(generated_name, path)`.
    pub async fn stage_path(&self, original_name: &str) -> Result<(String, PathBuf), StagingError> {
        self.ensure_dir().await?;
        let name = self.next_name(original_name);
        let path = self.dir.join(&name);
        Ok((name, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now_millis(&self) -> i64 {
            self.0
        }
    }

    #[test]
    fn unique_name_is_pure() {
        assert_eq!(unique_name("lesion.png", 1700, 3), "1700-3-lesion.png");
        assert_eq!(
            unique_name("lesion.png", 1700, 3),
            unique_name("lesion.png", 1700, 3)
        );
    }

    #[test]
    fn strips_directories_from_client_names() {
        assert_eq!(unique_name("../../etc/passwd", 1, 0), "1-0-passwd");
        assert_eq!(unique_name("C:\\photos\\mole.jpg", 1, 0), "1-0-mole.jpg");
        assert_eq!(unique_name("", 1, 0), "1-0-upload");
        assert_eq!(unique_name("dir/", 1, 0), "1-0-upload");
        assert_eq!(unique_name("..", 1, 0), "1-0-upload");
    }

    #[test]
    fn same_tick_same_name_stays_distinct() {
        let namer = StorageNamer::with_clock(PathBuf::from("uploads"), Arc::new(FixedClock(42)));
        let names: HashSet<String> = (0..100).map(|_| namer.next_name("lesion.png")).collect();
        assert_eq!(names.len(), 100);
        assert!(names.iter().all(|n| n.starts_with("42-") && n.ends_with("-lesion.png")));
    }

    #[actix_web::test]
    async fn stage_path_creates_directory_idempotently() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("uploads");
        let namer = StorageNamer::with_clock(dir.clone(), Arc::new(FixedClock(7)));

        let (first_name, first_path) = namer.stage_path("a.png").await.unwrap();
        let (_, second_path) = namer.stage_path("a.png").await.unwrap();

        assert!(dir.is_dir());
        assert_eq!(first_name, "7-0-a.png");
        assert_eq!(first_path, dir.join("7-0-a.png"));
        assert_ne!(first_path, second_path);
    }

    #[actix_web::test]
    async fn stage_path_fails_when_directory_cannot_be_created() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let namer = StorageNamer::new(blocker.join("uploads"));
        let err = namer.stage_path("a.png").await.unwrap_err();
        assert!(matches!(err, StagingError::CreateDir { .. }));
    }
}
