//! Pipe and its producer handle

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

use crate::types::{CourierError, Result};

/// Chunks the conduit holds before a write has to wait for the reader
const CONDUIT_DEPTH: usize = 1;

/// Create a connected producer/consumer pair
pub fn channel() -> (PipeWriter, Pipe) {
    let (tx, rx) = mpsc::channel(CONDUIT_DEPTH);
    let writer = PipeWriter { tx };
    let pipe = Pipe {
        state: PipeState::Unconsumed {
            rx,
            pending: BytesMut::new(),
        },
        closed: false,
    };
    (writer, pipe)
}

/// Producer end of a [`Pipe`]
///
/// Clones share the same conduit. End of data is signalled once every
/// handle has been closed or dropped.
#[derive(Debug, Clone)]
pub struct PipeWriter {
    tx: mpsc::Sender<Bytes>,
}

impl PipeWriter {
    /// Forward `data` to the pipe
    ///
    /// Waits while a previous chunk is still in the conduit. Fails with
    /// [`CourierError::Closed`] once the pipe was drained or closed.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        if self.tx.is_closed() {
            return Err(CourierError::Closed);
        }
        if data.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(Bytes::copy_from_slice(data))
            .await
            .map_err(|_| CourierError::Closed)?;
        Ok(data.len())
    }

    /// Release this producer handle
    pub fn close(self) {
        drop(self);
    }

    /// True once the consumer stopped accepting writes
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
enum PipeState {
    /// Backed by the live conduit; chunks received so far are kept in `pending`
    Unconsumed {
        rx: mpsc::Receiver<Bytes>,
        pending: BytesMut,
    },
    /// Drained once; content is fixed from here on
    Buffered { data: Bytes, offset: usize },
}

/// Consumer end: a replayable byte source
///
/// The first read drains the producer side completely. Reads then advance a
/// cursor over the buffered bytes and return `0` at the end. The cursor is
/// only reset by [`Pipe::rewind`].
///
/// Not safe for concurrent readers; share it as a [`super::SharedPipe`].
#[derive(Debug)]
pub struct Pipe {
    state: PipeState,
    closed: bool,
}

impl Pipe {
    /// A pipe that is already buffered with `data`
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            state: PipeState::Buffered {
                data: data.into(),
                offset: 0,
            },
            closed: true,
        }
    }

    /// Stop accepting writes. Chunks already written stay readable.
    pub fn close(&mut self) {
        self.closed = true;
        if let PipeState::Unconsumed { rx, .. } = &mut self.state {
            rx.close();
        }
    }

    /// True once closed or drained
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// True once the producer side has been drained into the buffer
    pub fn is_buffered(&self) -> bool {
        matches!(self.state, PipeState::Buffered { .. })
    }

    /// Move the cursor back to the start of the buffered bytes
    pub fn rewind(&mut self) {
        if let PipeState::Buffered { offset, .. } = &mut self.state {
            *offset = 0;
        }
    }

    /// Buffered content, if drained
    pub fn buffered(&self) -> Option<&Bytes> {
        match &self.state {
            PipeState::Buffered { data, .. } => Some(data),
            PipeState::Unconsumed { .. } => None,
        }
    }
}

impl AsyncRead for Pipe {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let PipeState::Unconsumed { rx, pending } = &mut this.state {
            while let Some(chunk) = ready!(rx.poll_recv(cx)) {
                pending.extend_from_slice(&chunk);
            }
            let data = std::mem::take(pending).freeze();
            this.state = PipeState::Buffered { data, offset: 0 };
            this.closed = true;
        }

        if let PipeState::Buffered { data, offset } = &mut this.state {
            let remaining = &data[*offset..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            *offset += n;
        }

        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    async fn read_pass(pipe: &mut Pipe, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = pipe.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[tokio::test]
    async fn test_small_chunk_reads_reproduce_input() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let (writer, mut pipe) = channel();

        let data = payload.clone();
        let producer = tokio::spawn(async move {
            for part in data.chunks(7) {
                writer.write(part).await.unwrap();
            }
            writer.close();
        });

        for chunk in [1, 3, 64] {
            let read = read_pass(&mut pipe, chunk).await;
            assert_eq!(read, payload, "chunk size {}", chunk);
            pipe.rewind();
        }
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_end_of_data_then_rewind_replays() {
        let (writer, mut pipe) = channel();
        tokio::spawn(async move {
            writer.write(b"hello world").await.unwrap();
        });

        assert_eq!(read_pass(&mut pipe, 4).await, b"hello world");

        // Exhausted pass stays exhausted until rewound
        let mut buf = [0u8; 4];
        assert_eq!(pipe.read(&mut buf).await.unwrap(), 0);

        pipe.rewind();
        assert_eq!(read_pass(&mut pipe, 4).await, b"hello world");
    }

    #[tokio::test]
    async fn test_drain_marks_pipe_closed() {
        let (writer, mut pipe) = channel();
        let producer = writer.clone();
        tokio::spawn(async move {
            producer.write(b"once").await.unwrap();
        });
        drop(writer);

        let mut out = Vec::new();
        pipe.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"once");
        assert!(pipe.is_closed());
        assert!(pipe.is_buffered());
        assert_eq!(pipe.buffered().map(|b| b.as_ref()), Some(&b"once"[..]));
    }

    #[tokio::test]
    async fn test_write_after_drain_fails() {
        let (writer, mut pipe) = channel();
        let late = writer.clone();
        writer.write(b"x").await.unwrap();
        writer.close();

        // `late` still holds the conduit open; close from the consumer side
        pipe.close();
        let mut out = Vec::new();
        pipe.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"x");

        assert!(late.is_closed());
        assert!(matches!(late.write(b"y").await, Err(CourierError::Closed)));
    }

    #[tokio::test]
    async fn test_second_write_waits_for_reader() {
        let (writer, mut pipe) = channel();
        writer.write(b"first").await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), writer.write(b"second")).await;
        assert!(blocked.is_err(), "second write should wait for the reader");

        let producer = tokio::spawn(async move {
            writer.write(b"second").await.unwrap();
        });
        let reader = tokio::spawn(async move {
            let mut out = Vec::new();
            pipe.read_to_end(&mut out).await.unwrap();
            out
        });

        producer.await.unwrap();
        assert_eq!(reader.await.unwrap(), b"firstsecond");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_writer, mut pipe) = channel();
        pipe.close();
        pipe.close();
        assert!(pipe.is_closed());
    }

    #[tokio::test]
    async fn test_from_bytes_is_buffered() {
        let mut pipe = Pipe::from_bytes(&b"ready"[..]);
        assert!(pipe.is_closed());
        assert_eq!(read_pass(&mut pipe, 2).await, b"ready");
    }

    #[tokio::test]
    async fn test_empty_pipe_reads_nothing() {
        let (writer, mut pipe) = channel();
        writer.close();
        let mut buf = [0u8; 8];
        assert_eq!(pipe.read(&mut buf).await.unwrap(), 0);
        assert!(pipe.is_buffered());
    }
}
