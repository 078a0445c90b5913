//! File transfer through a session's default hop

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use hl_core::{FileMode, HlError, Transport, TransferResult};

/// Chunk size used unless [`ScpProtocol::chunk_size`] says otherwise
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Uploads and downloads over one hop
///
/// Obtained from [`RemoteSession::scp`](crate::RemoteSession::scp) once
/// the session has been expanded with `expand_scp`.
#[derive(Clone)]
pub struct ScpProtocol {
    hop: Arc<dyn Transport>,
    chunk_size: usize,
}

impl ScpProtocol {
    pub(crate) fn new(hop: Arc<dyn Transport>) -> Self {
        Self {
            hop,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Read and write in chunks of `size` bytes
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Copy the local file `local` to `remote`, replacing it
    pub async fn upload(
        &self,
        local: impl AsRef<Path>,
        remote: &str,
    ) -> Result<TransferResult, HlError> {
        let local = local.as_ref();
        let is_file = tokio::fs::metadata(local)
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(HlError::NotFound(format!(
                "local file {}",
                local.display()
            )));
        }

        let mut source = tokio::fs::File::open(local).await?;
        let mut sink = self.hop.open_file(remote, FileMode::Write).await?;
        let bytes = copy_chunks(&mut source, &mut sink, self.chunk_size).await?;
        sink.shutdown().await?;

        tracing::info!(hop = %self.hop.id(), "Uploaded {} to {} ({} bytes)", local.display(), remote, bytes);
        Ok(TransferResult {
            source: local.display().to_string(),
            destination: remote.to_string(),
            bytes_transferred: bytes,
        })
    }

    /// Copy `remote` to the local file `local`, replacing it
    ///
    /// The local file is only created once the remote one has been opened.
    pub async fn download(
        &self,
        remote: &str,
        local: impl AsRef<Path>,
    ) -> Result<TransferResult, HlError> {
        let local = local.as_ref();
        let mut source = self.hop.open_file(remote, FileMode::Read).await?;
        let mut sink = tokio::fs::File::create(local).await?;
        let bytes = copy_chunks(&mut source, &mut sink, self.chunk_size).await?;
        sink.flush().await?;

        tracing::info!(hop = %self.hop.id(), "Downloaded {} to {} ({} bytes)", remote, local.display(), bytes);
        Ok(TransferResult {
            source: remote.to_string(),
            destination: local.display().to_string(),
            bytes_transferred: bytes,
        })
    }
}

impl std::fmt::Debug for ScpProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScpProtocol")
            .field("hop", self.hop.info())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

async fn copy_chunks<R, W>(reader: &mut R, writer: &mut W, chunk_size: usize) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_size];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}
