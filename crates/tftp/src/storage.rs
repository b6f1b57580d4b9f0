//! File access for transfers
//!
//! Sessions never touch the filesystem directly. They resolve the requested
//! filename against the served root with [`resolve_path`], let the port
//! `confine` the result, and then open it through the injected [`ReadPort`] /
//! [`WritePort`] capabilities, which lets tests run the whole protocol against
//! in-memory files.

use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransferError;

/// Capability to open a byte source for a read transfer
pub trait ReadPort: Send + Sync + 'static {
    type Source: AsyncRead + Unpin + Send + 'static;

    /// Check that `path`, already lexically inside `root`, really resolves there
    ///
    /// Ports without links have nothing to check.
    fn confine(&self, _root: &Path, path: PathBuf) -> impl Future<Output = Result<PathBuf, TransferError>> + Send {
        async move { Ok(path) }
    }

    fn open_for_read(&self, path: &Path) -> impl Future<Output = io::Result<Self::Source>> + Send;
}

/// Capability to open a byte sink for a write transfer
pub trait WritePort: Send + Sync + 'static {
    type Sink: AsyncWrite + Unpin + Send + 'static;

    /// Check that `path`, already lexically inside `root`, really resolves there
    fn confine(&self, _root: &Path, path: PathBuf) -> impl Future<Output = Result<PathBuf, TransferError>> + Send {
        async move { Ok(path) }
    }

    fn open_for_write(&self, path: &Path) -> impl Future<Output = io::Result<Self::Sink>> + Send;
}

/// Join a requested filename onto the served root
///
/// Absolute paths and `..` components are refused so that no request can
/// reach outside `root`.
pub fn resolve_path(root: impl AsRef<Path>, filename: &str) -> Result<PathBuf, TransferError> {
    let requested = Path::new(filename);

    let escapes = requested
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(TransferError::AccessViolation(format!(
            "'{}' escapes the served root",
            filename
        )));
    }

    Ok(root.as_ref().join(requested))
}

/// Follow links in `path` and require the result to stay under `root`
///
/// A path that does not exist yet is checked through its parent directory, so
/// new files can be written. A dangling link is refused, since opening it for
/// writing would create its target wherever it points.
pub async fn confine_to_root(root: &Path, path: &Path) -> Result<PathBuf, TransferError> {
    let root_canon = tokio::fs::canonicalize(root).await?;

    let path_canon = match tokio::fs::canonicalize(path).await {
        Ok(canon) => canon,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if tokio::fs::symlink_metadata(path).await.is_ok() {
                return Err(TransferError::AccessViolation(format!(
                    "'{}' is a dangling link",
                    path.display()
                )));
            }
            let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
                return Err(e.into());
            };
            tokio::fs::canonicalize(parent).await?.join(name)
        }
        Err(e) => return Err(e.into()),
    };

    if !path_canon.starts_with(&root_canon) {
        return Err(TransferError::AccessViolation(format!(
            "'{}' resolves outside the served root",
            path.display()
        )));
    }

    Ok(path_canon)
}

/// Ports backed by the local filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSystem {
    /// Replace existing files on write; otherwise writes to an existing path
    /// fail with `AlreadyExists`.
    pub overwrite: bool,
}

impl Default for FileSystem {
    fn default() -> Self {
        Self { overwrite: true }
    }
}

impl ReadPort for FileSystem {
    type Source = File;

    async fn confine(&self, root: &Path, path: PathBuf) -> Result<PathBuf, TransferError> {
        confine_to_root(root, &path).await
    }

    async fn open_for_read(&self, path: &Path) -> io::Result<File> {
        File::open(path).await
    }
}

impl WritePort for FileSystem {
    type Sink = File;

    async fn confine(&self, root: &Path, path: PathBuf) -> Result<PathBuf, TransferError> {
        confine_to_root(root, &path).await
    }

    async fn open_for_write(&self, path: &Path) -> io::Result<File> {
        let mut options = OpenOptions::new();
        options.write(true);
        if self.overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        options.open(path).await
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory ports for exercising sessions without a filesystem.

    use std::collections::HashMap;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    use super::*;

    /// Serves fixed contents keyed by resolved path.
    #[derive(Default)]
    pub struct MemoryFiles {
        files: HashMap<PathBuf, Vec<u8>>,
    }

    impl MemoryFiles {
        pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
            self.files.insert(path.into(), contents.into());
            self
        }
    }

    impl ReadPort for MemoryFiles {
        type Source = Cursor<Vec<u8>>;

        async fn open_for_read(&self, path: &Path) -> io::Result<Self::Source> {
            self.files
                .get(path)
                .cloned()
                .map(Cursor::new)
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }
    }

    /// Records everything written to any path.
    #[derive(Default, Clone)]
    pub struct MemorySink {
        pub written: Arc<Mutex<Vec<u8>>>,
        pub writes: Arc<Mutex<usize>>,
        pub opened: Arc<Mutex<Vec<PathBuf>>>,
        /// When set, every later write fails with this kind.
        pub fail_with: Arc<Mutex<Option<io::ErrorKind>>>,
    }

    impl MemorySink {
        pub fn fail_writes(&self, kind: io::ErrorKind) {
            *self.fail_with.lock().unwrap() = Some(kind);
        }

        pub fn contents(&self) -> Vec<u8> {
            self.written.lock().unwrap().clone()
        }

        pub fn write_calls(&self) -> usize {
            *self.writes.lock().unwrap()
        }
    }

    impl WritePort for MemorySink {
        type Sink = MemorySink;

        async fn open_for_write(&self, path: &Path) -> io::Result<Self::Sink> {
            self.opened.lock().unwrap().push(path.to_path_buf());
            Ok(self.clone())
        }
    }

    impl AsyncWrite for MemorySink {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            if let Some(kind) = *self.fail_with.lock().unwrap() {
                return Poll::Ready(Err(io::Error::from(kind)));
            }
            self.written.lock().unwrap().extend_from_slice(buf);
            *self.writes.lock().unwrap() += 1;
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }
}
