use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;

const WRITER_QUEUE_DEPTH: usize = 4096;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Durable byte storage under a [`Wal`].
pub trait WalSink: Send + 'static {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()>;
    fn sync_to_disk(&mut self) -> io::Result<()>;
    /// Cut storage back to `len` bytes and make the cut durable.
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl WalSink for File {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        Write::write_all(self, buf)
    }

    fn sync_to_disk(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.sync_all()
    }
}

/// Append-only Write-Ahead Log.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - Truncated last entry (crash) is safely discarded via length-prefix + CRC check.
///
/// A failed flush truncates the file back to the last synced entry, so bytes
/// from a rejected batch never precede a later acknowledged one. If that
/// truncation fails too, the log refuses all further writes.
pub struct Wal<S: WalSink = File> {
    sink: S,
    pending: Vec<u8>,
    committed_len: u64,
    poisoned: bool,
    path: PathBuf,
}

impl Wal<File> {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self::with_sink(file, committed_len, path.to_path_buf()))
    }
}

impl<S: WalSink> Wal<S> {
    /// Wrap `sink`, whose first `committed_len` bytes are already durable.
    /// `path` is only used in log messages.
    pub fn with_sink(sink: S, committed_len: u64, path: PathBuf) -> Self {
        Self {
            sink,
            pending: Vec::new(),
            committed_len,
            poisoned: false,
            path,
        }
    }

    /// Append a single event and fsync. Servers go through `WalWriter`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Encode into the pending buffer without touching storage.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.pending, event)
    }

    /// Write the pending buffer and fsync. On failure the pending bytes are
    /// dropped and storage is cut back to the last synced length.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.poisoned {
            self.pending.clear();
            return Err(io::Error::other("WAL disabled after a failed rollback"));
        }
        let written = self.pending.len() as u64;
        let result = self
            .sink
            .write_bytes(&self.pending)
            .and_then(|()| self.sink.sync_to_disk());
        self.pending.clear();
        match result {
            Ok(()) => {
                self.committed_len += written;
                Ok(())
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    /// Discard pending bytes and truncate to the last synced entry.
    fn rollback(&mut self) {
        self.pending.clear();
        if let Err(e) = self.sink.truncate_to(self.committed_len) {
            tracing::error!(
                "WAL rollback of {} to {} bytes failed, refusing further writes: {e}",
                self.path.display(),
                self.committed_len
            );
            self.poisoned = true;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Wal {
    /// Replay the WAL from disk, returning all valid events.
    /// Truncated/corrupt trailing entries are silently discarded.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        replay_from(BufReader::new(file))
    }
}

fn replay_from(mut reader: impl Read) -> io::Result<Vec<Event>> {
    let mut events = Vec::new();

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut payload = vec![0u8; len];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
            Err(e) => return Err(e),
        }

        let mut crc_buf = [0u8; 4];
        match reader.read_exact(&mut crc_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
            Err(e) => return Err(e),
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            break;
        }

        match bincode::deserialize::<Event>(&payload) {
            Ok(event) => events.push(event),
            Err(_) => break,
        }
    }

    Ok(events)
}

// ── Group-commit writer ──────────────────────────────────

struct AppendRequest {
    event: Event,
    response: oneshot::Sender<io::Result<()>>,
}

/// Cloneable handle to a background task that owns a [`Wal`].
///
/// The task blocks for the first append, drains every append already queued,
/// then flushes and fsyncs once for the whole batch before acknowledging.
#[derive(Clone)]
pub struct WalWriter {
    tx: mpsc::Sender<AppendRequest>,
}

impl WalWriter {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn<S: WalSink>(wal: Wal<S>) -> Self {
        let (tx, rx) = mpsc::channel(WRITER_QUEUE_DEPTH);
        tokio::spawn(writer_loop(wal, rx));
        Self { tx }
    }

    /// Durably append `event`. Returns once the batch holding it is fsynced.
    pub async fn append(&self, event: &Event) -> io::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(AppendRequest {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| io::Error::other("WAL writer shut down"))?;
        rx.await
            .map_err(|_| io::Error::other("WAL writer dropped response"))?
    }
}

async fn writer_loop<S: WalSink>(mut wal: Wal<S>, mut rx: mpsc::Receiver<AppendRequest>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("WAL flush to {} failed: {e}", wal.path().display());
        }

        for req in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = req.response.send(r);
        }
    }
}

fn flush_batch<S: WalSink>(wal: &mut Wal<S>, batch: &[AppendRequest]) -> io::Result<()> {
    for req in batch {
        if let Err(e) = wal.append_buffered(&req.event) {
            // The whole batch fails together, so none of it may reach storage.
            wal.rollback();
            return Err(e);
        }
    }
    wal.flush_sync()
}
