use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV: &str = "DOCSIFT_DATA_DIR";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The DOCSIFT_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/docsift/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("docsift")
                .get_data_home()
                .ok_or_else(|| Error::Config("could not determine XDG data home directory".into()))?
        };

        std::fs::create_dir_all(&root).map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join("config.redb")
    }

    /// The canonical chunk log. Everything else is derived from it.
    pub fn chunks_db(&self) -> PathBuf {
        self.root.join("chunks.redb")
    }

    pub fn index_db(&self) -> PathBuf {
        self.root.join("index.redb")
    }

    pub fn tantivy_dir(&self) -> Result<PathBuf> {
        let path = self.root.join("tantivy");
        std::fs::create_dir_all(&path).map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }

    /// Bytes used on disk by the derived index (`index.redb` and `tantivy/`).
    pub fn index_size_bytes(&self) -> u64 {
        let db = std::fs::metadata(self.index_db()).map(|m| m.len()).unwrap_or(0);
        db + dir_size(&self.root.join("tantivy"))
    }
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(t) if t.is_dir() => dir_size(&entry.path()),
            Ok(_) => entry.metadata().map(|m| m.len()).unwrap_or(0),
            Err(_) => 0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_with_explicit_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();

        assert_eq!(dir.root(), tmp.path());
        assert_eq!(dir.config_db(), tmp.path().join("config.redb"));
        assert_eq!(dir.chunks_db(), tmp.path().join("chunks.redb"));
        assert_eq!(dir.index_db(), tmp.path().join("index.redb"));
    }

    #[test]
    fn tantivy_dir_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let tantivy = dir.tantivy_dir().unwrap();

        assert!(tantivy.exists());
        assert_eq!(tantivy, tmp.path().join("tantivy"));
    }

    #[test]
    fn index_size_counts_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let tantivy = dir.tantivy_dir().unwrap();
        std::fs::create_dir_all(tantivy.join("seg")).unwrap();
        std::fs::write(tantivy.join("seg/a"), [0u8; 10]).unwrap();
        std::fs::write(dir.index_db(), [0u8; 5]).unwrap();

        assert_eq!(dir.index_size_bytes(), 15);
    }
}
