//! The two pipe ends handed to callers of the storage bridge.
//!
//! Both ends sit on a bounded `mpsc` channel shared with exactly one worker
//! task. The bound is the backpressure: a writer suspends while the upload
//! worker has not drained earlier chunks, and a download worker suspends while
//! the reader has not consumed earlier ones.
//!
//! Every stream is terminated by an explicit [`Segment::End`]. A channel that
//! closes without one means the other side went away, which both ends report
//! as an error instead of a short, successful stream.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::PollSender;

use super::{FileId, TransferError};

/// One unit on a pipe.
#[derive(Debug)]
pub(crate) enum Segment {
    Data(Bytes),
    End,
}

/// What the upload worker reports once it is done.
pub(crate) type Outcome = Result<(), TransferError>;

// ── Write end ─────────────────────────────────────────────────────────────────

/// The write end of an upload.
///
/// Stream the file body in with any `AsyncWrite` helper, then call
/// [`shutdown`](tokio::io::AsyncWriteExt::shutdown). `shutdown` resolves only
/// after the object is stored *and* its record is marked valid, and fails if
/// either step failed. Dropping the writer without shutting it down aborts the
/// upload; the record then stays pending.
pub struct FileWriter {
    id: FileId,
    key: String,
    sender: PollSender<Segment>,
    outcome: oneshot::Receiver<Outcome>,
    settled: Option<Result<(), Arc<TransferError>>>,
    ended: bool,
}

impl FileWriter {
    pub(crate) fn new(
        id: FileId,
        key: String,
        sender: mpsc::Sender<Segment>,
        outcome: oneshot::Receiver<Outcome>,
    ) -> Self {
        Self { id, key, sender: PollSender::new(sender), outcome, settled: None, ended: false }
    }

    pub fn id(&self) -> &FileId {
        &self.id
    }

    /// The object key the bytes are stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Waits for the worker's outcome and caches it.
    fn poll_settled(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Arc<TransferError>>> {
        if let Some(settled) = &self.settled {
            return Poll::Ready(settled.clone());
        }
        let settled = match ready!(Pin::new(&mut self.outcome).poll(cx)) {
            Ok(outcome) => outcome.map_err(Arc::new),
            Err(_) => Err(Arc::new(TransferError::WorkerStopped)),
        };
        self.settled = Some(settled.clone());
        Poll::Ready(settled)
    }

    /// The channel closed under us: the worker finished early, so surface why.
    fn poll_closed(&mut self, cx: &mut Context<'_>) -> Poll<io::Error> {
        match ready!(self.poll_settled(cx)) {
            Err(e) => Poll::Ready(io::Error::other(e)),
            Ok(()) => Poll::Ready(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "upload finished before the stream was closed",
            )),
        }
    }
}

impl fmt::Debug for FileWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileWriter")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

impl AsyncWrite for FileWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.ended {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "write after shutdown")));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let sent = match ready!(this.sender.poll_reserve(cx)) {
            Ok(()) => this.sender.send_item(Segment::Data(Bytes::copy_from_slice(buf))).is_ok(),
            Err(_) => false,
        };
        if sent {
            return Poll::Ready(Ok(buf.len()));
        }
        this.poll_closed(cx).map(Err)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Nothing is buffered on this side of the channel.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.ended {
            if ready!(this.sender.poll_reserve(cx)).is_ok() {
                // A failed send means the worker already quit; its outcome says why.
                let _ = this.sender.send_item(Segment::End);
            }
            this.sender.close();
            this.ended = true;
        }
        ready!(this.poll_settled(cx)).map_err(io::Error::other).into()
    }
}

/// Adapts the receiving half of an upload pipe into the body handed to the
/// object storage client.
///
/// Yields an `UnexpectedEof` error if the writer is dropped before it sends
/// [`Segment::End`], so a backend never stores a truncated object as complete.
pub(crate) fn upload_body(receiver: mpsc::Receiver<Segment>) -> BoxStream<'static, io::Result<Bytes>> {
    stream::unfold(Some(receiver), |state| async move {
        let mut receiver = state?;
        match receiver.recv().await {
            Some(Segment::Data(bytes)) => Some((Ok(bytes), Some(receiver))),
            Some(Segment::End) => None,
            None => Some((
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "writer dropped before the upload was finished",
                )),
                None,
            )),
        }
    })
    .boxed()
}

// ── Read end ──────────────────────────────────────────────────────────────────

/// The read end of a download.
///
/// Returned before the download starts. Reads suspend until the worker has
/// bytes. A download failure is sticky: every read after it returns the same
/// error, so a failed download can never look like a short file.
#[derive(Debug)]
pub struct FileReader {
    receiver: mpsc::Receiver<Result<Segment, Arc<TransferError>>>,
    chunk: Bytes,
    failed: Option<Arc<TransferError>>,
    done: bool,
}

impl FileReader {
    pub(crate) fn new(receiver: mpsc::Receiver<Result<Segment, Arc<TransferError>>>) -> Self {
        Self { receiver, chunk: Bytes::new(), failed: None, done: false }
    }
}

impl AsyncRead for FileReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if let Some(e) = &this.failed {
                return Poll::Ready(Err(io::Error::other(Arc::clone(e))));
            }
            if !this.chunk.is_empty() {
                let n = this.chunk.len().min(buf.remaining());
                buf.put_slice(&this.chunk.split_to(n));
                return Poll::Ready(Ok(()));
            }
            if this.done || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            match ready!(this.receiver.poll_recv(cx)) {
                Some(Ok(Segment::Data(bytes))) => this.chunk = bytes,
                Some(Ok(Segment::End)) => this.done = true,
                Some(Err(e)) => this.failed = Some(e),
                None => this.failed = Some(Arc::new(TransferError::WorkerStopped)),
            }
        }
    }
}
