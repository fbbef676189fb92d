//! Opening the request socket.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::net::UnixStream;

/// Opens one stream to the provider. Called once per connect attempt.
#[async_trait]
pub trait Dialer: Send + Sync + fmt::Debug {
    async fn dial(&self) -> io::Result<UnixStream>;
}

/// Connects to a Unix socket path.
#[derive(Debug, Clone)]
pub struct UnixDialer {
    path: PathBuf,
}

impl UnixDialer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Dialer for UnixDialer {
    async fn dial(&self) -> io::Result<UnixStream> {
        UnixStream::connect(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_unix_dialer_connects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provider.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let dialer = UnixDialer::new(&path);
        let (client, accepted) = tokio::join!(dialer.dial(), listener.accept());
        assert!(client.is_ok());
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn test_unix_dialer_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let dialer = UnixDialer::new(dir.path().join("absent.sock"));
        assert!(dialer.dial().await.is_err());
    }
}
