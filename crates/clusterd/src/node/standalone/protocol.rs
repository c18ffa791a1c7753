//! Line-delimited JSON frames exchanged between master and workers.

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single encoded frame, newline included.
pub(crate) const MAX_FRAME_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum Frame {
    Hello {
        node: String,
        cluster: String,
        key: String,
    },
    Welcome {
        master: String,
    },
    Rejected {
        reason: String,
    },
    KeepAlive,
    Echo {
        payload: String,
    },
    Ack {
        bytes: usize,
    },
}

/// Reads one frame. `None` means the peer closed the stream.
pub(crate) async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = AsyncReadExt::take(&mut *reader, MAX_FRAME_BYTES)
        .read_line(&mut line)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame exceeds size limit or is truncated",
        ));
    }
    serde_json::from_str(line.trim_end())
        .map(Some)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
}

/// Writes one frame followed by a newline.
pub(crate) async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}
