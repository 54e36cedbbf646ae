//! Shared folder: the files a peer serves and the place downloads land.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use swarm_core::chunk::ChunkSpan;
use swarm_core::protocol::{self, ProtocolError};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

const TEMP_SUFFIX: &str = ".part";

#[derive(Debug, thiserror::Error)]
pub enum FolderError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error(transparent)]
    InvalidName(#[from] ProtocolError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct SharedFolder {
    root: PathBuf,
}

impl SharedFolder {
    /// Open an existing directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, FolderError> {
        let root = root.into();
        match tokio::fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => Ok(Self { root }),
            _ => Err(FolderError::NotADirectory(root)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a shared file. Rejects names that would escape the folder.
    pub fn path_of(&self, name: &str) -> Result<PathBuf, FolderError> {
        protocol::validate_file_name(name)?;
        Ok(self.root.join(name))
    }

    /// Names of the regular files being shared, sorted. In-progress downloads are skipped.
    pub async fn list(&self) -> Result<Vec<String>, FolderError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if is_temp_name(&name) || protocol::validate_file_name(&name).is_err() {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Byte length of a shared file, or `None` if it is not here.
    pub async fn file_len(&self, name: &str) -> Result<Option<u64>, FolderError> {
        if is_temp_name(name) {
            return Ok(None);
        }
        let path = self.path_of(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn contains(&self, name: &str) -> Result<bool, FolderError> {
        Ok(self.file_len(name).await?.is_some())
    }

    /// Read exactly the bytes of `span` from a shared file.
    pub async fn read_span(&self, name: &str, span: ChunkSpan) -> Result<Vec<u8>, FolderError> {
        let mut file = tokio::fs::File::open(self.path_of(name)?).await?;
        file.seek(SeekFrom::Start(span.start)).await?;
        let mut buf = vec![0u8; span.len() as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Write a whole file so it appears all at once: write a hidden temp file, then rename.
    pub async fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, FolderError> {
        let target = self.path_of(name)?;
        let temp = self
            .root
            .join(format!(".{name}.{}{TEMP_SUFFIX}", uuid::Uuid::new_v4().simple()));
        let written = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp, &target).await?;
            Ok::<_, io::Error>(())
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(target)
    }
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            SharedFolder::open(&file).await,
            Err(FolderError::NotADirectory(_))
        ));
        assert!(SharedFolder::open(dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn list_skips_dirs_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bb").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join(".c.txt.1234.part"), b"partial").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let folder = SharedFolder::open(dir.path()).await.unwrap();
        assert_eq!(folder.list().await.unwrap(), vec!["a.txt", "b.txt"]);
        assert_eq!(folder.file_len("b.txt").await.unwrap(), Some(2));
        assert_eq!(folder.file_len("sub").await.unwrap(), None);
        assert_eq!(folder.file_len("missing").await.unwrap(), None);
        assert_eq!(folder.file_len(".c.txt.1234.part").await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_span_reads_range() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"0123456789").unwrap();
        let folder = SharedFolder::open(dir.path()).await.unwrap();
        let span = ChunkSpan {
            index: 1,
            start: 4,
            end: 8,
        };
        assert_eq!(folder.read_span("f", span).await.unwrap(), b"4567");
    }

    #[tokio::test]
    async fn write_atomic_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let folder = SharedFolder::open(dir.path()).await.unwrap();
        let path = folder.write_atomic("out.bin", b"payload").await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"payload");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let folder = SharedFolder::open(dir.path()).await.unwrap();
        assert!(folder.path_of("../etc/passwd").is_err());
        assert!(folder.write_atomic("..", b"x").await.is_err());
    }
}
