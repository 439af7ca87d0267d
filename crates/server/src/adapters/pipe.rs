use std::fs::File;
use std::io;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use api_types::MoveRequest;
use api_types::FIXED_RECORD_LEN;
use clap::ValueEnum;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use utils::fifo;
use utils::IpcError;

use super::AdapterContext;
use super::TransportKind;

/// Longest record kept while waiting for its terminator.
const MAX_RECORD_LEN: usize = 256;

/// Record layout spoken on the request FIFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum PipeFormat {
    /// `<player_id> <amount>[ <reply_path>]` ended by `\n` or `\0`.
    #[default]
    Text,
    /// Fixed records of two native-endian `i32`s and a 40 byte NUL padded
    /// reply path.
    Binary,
}

/// Splits a byte stream into records terminated by `\n` or `\0`.
#[derive(Debug, Default)]
pub struct RecordFramer {
    pending: Vec<u8>,
    overflowed: bool,
}

impl RecordFramer {
    /// Feeds bytes and returns every record they completed. Empty records are
    /// skipped, and a record longer than the limit is dropped whole.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut records = Vec::new();
        for &byte in bytes {
            if byte == b'\n' || byte == b'\0' {
                if self.overflowed {
                    warn!("Dropped oversized pipe record");
                } else if !self.pending.is_empty() {
                    records.push(String::from_utf8_lossy(&self.pending).into_owned());
                }
                self.pending.clear();
                self.overflowed = false;
            } else if self.pending.len() < MAX_RECORD_LEN {
                self.pending.push(byte);
            } else {
                self.overflowed = true;
            }
        }
        records
    }
}

/// Cuts a byte stream into fixed binary records, holding a partial record
/// until the rest arrives.
#[derive(Debug, Default)]
pub struct FixedFramer {
    pending: Vec<u8>,
}

impl FixedFramer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<[u8; FIXED_RECORD_LEN]> {
        self.pending.extend_from_slice(bytes);
        let mut chunks = self.pending.chunks_exact(FIXED_RECORD_LEN);
        let records = chunks
            .by_ref()
            .map(|chunk| {
                let mut record = [0u8; FIXED_RECORD_LEN];
                record.copy_from_slice(chunk);
                record
            })
            .collect();
        let rest = chunks.remainder().to_vec();
        self.pending = rest;
        records
    }
}

enum RequestDecoder {
    Text(RecordFramer),
    Binary(FixedFramer),
}

impl RequestDecoder {
    fn new(format: PipeFormat) -> Self {
        match format {
            PipeFormat::Text => RequestDecoder::Text(RecordFramer::default()),
            PipeFormat::Binary => RequestDecoder::Binary(FixedFramer::default()),
        }
    }

    /// Requests completed by `bytes`. Malformed records are logged and skipped.
    fn push(&mut self, bytes: &[u8]) -> Vec<MoveRequest> {
        match self {
            RequestDecoder::Text(framer) => framer
                .push(bytes)
                .into_iter()
                .filter_map(|record| match MoveRequest::parse_line(&record) {
                    Ok(request) => Some(request),
                    Err(e) => {
                        warn!(record, error = %e, "Malformed pipe record");
                        None
                    }
                })
                .collect(),
            RequestDecoder::Binary(framer) => framer
                .push(bytes)
                .iter()
                .filter_map(|record| match MoveRequest::decode_fixed(record) {
                    Ok(request) => Some(request),
                    Err(e) => {
                        warn!(error = %e, "Malformed binary pipe record");
                        None
                    }
                })
                .collect(),
        }
    }
}

/// Reads move records from the server's request FIFO.
pub struct PipeAdapter {
    path: PathBuf,
    format: PipeFormat,
    reader: File,
    /// Our own write end, so the reader never sees EOF between clients.
    _keepalive: File,
    poll_interval: Duration,
    stop: CancellationToken,
}

impl PipeAdapter {
    /// Opens the already created FIFO at `path`.
    pub fn open(
        path: &Path,
        poll_interval: Duration,
        format: PipeFormat,
    ) -> Result<Self, IpcError> {
        let reader = fifo::open_reader(path)?;
        let keepalive = fifo::open_writer(path)?;
        info!(path = %path.display(), ?format, "Listening on request fifo");
        Ok(Self {
            path: path.to_path_buf(),
            format,
            reader,
            _keepalive: keepalive,
            poll_interval,
            stop: CancellationToken::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn spawn(self: Arc<Self>, ctx: AdapterContext) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(ctx).await })
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    async fn run(&self, ctx: AdapterContext) {
        let mut decoder = RequestDecoder::new(self.format);
        let mut buf = [0u8; 512];

        while !self.stop.is_cancelled() {
            match (&self.reader).read(&mut buf) {
                Ok(n) if n > 0 => {
                    for request in decoder.push(&buf[..n]) {
                        ctx.dispatch_paced(TransportKind::Pipe, request).await;
                    }
                    continue;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(path = %self.path.display(), error = %e, "Request fifo read failed");
                }
            }

            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        debug!(path = %self.path.display(), "Pipe adapter stopped");
    }
}
