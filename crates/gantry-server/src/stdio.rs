//! Single-client transport over newline-delimited JSON.
//!
//! Each input line is one protocol message. Replies pushed by the core are
//! written one per line. There is no authentication; the parent process
//! owns both pipes.

use std::sync::Arc;

use gantry_core::{CoreError, ProtocolCore, QueueSink};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StdioError {
    #[error("failed to establish protocol connection: {0}")]
    Establish(CoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("writer task failed: {0}")]
    Writer(String),
}

/// Serve one connection until `reader` reaches EOF.
pub async fn run_stdio<R, W>(
    core: Arc<dyn ProtocolCore>,
    reader: R,
    writer: W,
    push_queue: usize,
) -> Result<(), StdioError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (sink, mut rx) = QueueSink::channel(push_queue);
    let connection = core
        .establish(Arc::new(sink))
        .await
        .map_err(StdioError::Establish)?;
    info!("stdio transport ready");

    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(message) = rx.recv().await {
            writer.write_all(message.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match connection.handle_inbound(line).await {
            Ok(ack) => debug!(?ack, "message handled"),
            Err(e) => warn!(error = %e, "failed to process message"),
        }
    }

    debug!("input closed");
    if let Err(e) = connection.close() {
        warn!(error = %e, "error closing protocol connection");
    }
    // dropping the connection releases the sink so the writer drains and exits
    drop(connection);

    writer_task
        .await
        .map_err(|e| StdioError::Writer(e.to_string()))??;
    Ok(())
}
