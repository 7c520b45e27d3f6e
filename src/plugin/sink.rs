// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! An [`OutputSink`] wired to a streaming response body.

use std::{convert::Infallible, io};

use axum::body::{Body, Bytes};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::runtime::OutputSink;

/// Chunks queued between the writer and the connection before writes block.
pub(crate) const SINK_CAPACITY: usize = 64;

fn client_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "client went away")
}

/// Forwards every write to the response body as its own chunk.
///
/// Once [`SINK_CAPACITY`] chunks are waiting for the client, `write` blocks
/// until the connection drains. Writers that may fill the queue must run on a
/// blocking thread. The body ends once every clone of the sink is dropped.
#[derive(Debug, Clone)]
pub(crate) struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl io::Write for ChannelSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.tx.try_send(Bytes::copy_from_slice(buf)) {
            Ok(()) => {}
            Err(TrySendError::Full(chunk)) => {
                self.tx.blocking_send(chunk).map_err(|_| client_gone())?;
            }
            Err(TrySendError::Closed(_)) => return Err(client_gone()),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ChannelSink {
    pub(crate) fn boxed(self) -> OutputSink {
        Box::new(self)
    }
}

/// A sink and the response body it feeds.
pub(crate) fn streaming_body() -> (ChannelSink, Body) {
    let (tx, mut rx) = mpsc::channel::<Bytes>(SINK_CAPACITY);
    let stream = futures::stream::poll_fn(move |cx| {
        rx.poll_recv(cx).map(|chunk| chunk.map(Ok::<_, Infallible>))
    });
    (ChannelSink { tx }, Body::from_stream(stream))
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn test_writes_reach_body_in_order() {
        let (mut sink, body) = streaming_body();
        sink.write_all(b"hello, ").unwrap();
        sink.write_all(b"").unwrap();
        sink.write_all(b"world").unwrap();
        drop(sink);
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello, world");
    }

    #[tokio::test]
    async fn test_write_after_body_dropped_fails() {
        let (mut sink, body) = streaming_body();
        drop(body);
        let err = sink.write(b"lost").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_writer_blocks_until_client_reads() {
        let (mut sink, body) = streaming_body();
        let written = Arc::new(AtomicUsize::new(0));
        let writer = {
            let written = written.clone();
            tokio::task::spawn_blocking(move || {
                for _ in 0..SINK_CAPACITY * 4 {
                    sink.write_all(&[b'x'; 1024]).unwrap();
                    written.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        // nobody polls the body, so the writer stalls on a full queue
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(written.load(Ordering::SeqCst), SINK_CAPACITY);
        assert!(!writer.is_finished());

        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(bytes.len(), SINK_CAPACITY * 4 * 1024);
        writer.await.unwrap();
        assert_eq!(written.load(Ordering::SeqCst), SINK_CAPACITY * 4);
    }

    #[tokio::test]
    async fn test_blocked_writer_fails_when_client_leaves() {
        let (mut sink, body) = streaming_body();
        let writer = tokio::task::spawn_blocking(move || {
            for _ in 0..=SINK_CAPACITY {
                sink.write_all(b"chunk")?;
            }
            Ok::<_, io::Error>(())
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(body);
        let err = writer.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
