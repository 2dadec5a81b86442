//! Lazy NDJSON segment reader.
//!
//! Chunks are fetched from the store only as records are consumed. A chunk
//! boundary may fall anywhere inside a line; the partial line is carried over
//! to the next chunk.

use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use snafu::prelude::*;
use std::collections::VecDeque;
use tracing::debug;

use crate::emit;
use crate::error::{CorruptRecordSnafu, ReadError, StorageError, TransientIoSnafu};
use crate::metrics::events::RecordsRead;
use crate::record::{Record, RecordSerde};
use crate::resource::Query;
use crate::storage::StorageProvider;

/// Forward-only reader over one segment.
pub struct RecordReader {
    path: String,
    chunks: BoxStream<'static, Result<Bytes, StorageError>>,
    carry: BytesMut,
    ready: VecDeque<Record>,
    query: Query,
    scroll_size: usize,
    serde: RecordSerde,
    line: usize,
    exhausted: bool,
    // Reported once the records decoded before it have been returned.
    deferred: Option<ReadError>,
    // Owned by this reader for its whole lifetime.
    _connection: StorageProvider,
}

impl std::fmt::Debug for RecordReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordReader")
            .field("path", &self.path)
            .field("line", &self.line)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl RecordReader {
    pub(crate) fn new(
        connection: StorageProvider,
        path: String,
        chunks: BoxStream<'static, Result<Bytes, StorageError>>,
        query: Query,
        scroll_size: usize,
    ) -> Self {
        Self {
            path,
            chunks,
            carry: BytesMut::new(),
            ready: VecDeque::new(),
            query,
            scroll_size,
            serde: RecordSerde,
            line: 0,
            exhausted: false,
            deferred: None,
            _connection: connection,
        }
    }

    /// Segment path this reader is bound to.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The next matching record, or `None` at the end of the segment.
    pub async fn next_record(&mut self) -> Result<Option<Record>, ReadError> {
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Ok(Some(record));
            }
            if let Some(err) = self.deferred.take() {
                return Err(err);
            }
            if self.decode_buffered()? {
                continue;
            }
            if self.exhausted {
                return Ok(None);
            }

            match self.chunks.next().await {
                Some(chunk) => {
                    let chunk = chunk.context(TransientIoSnafu)?;
                    self.carry.extend_from_slice(&chunk);
                }
                None => {
                    self.exhausted = true;
                    if !self.carry.is_empty() {
                        // Final line without a trailing newline.
                        self.carry.extend_from_slice(b"\n");
                    }
                    debug!(path = %self.path, lines = self.line, "Segment exhausted");
                }
            }
        }
    }

    /// Decode up to `scroll_size` complete lines from the carry buffer.
    /// Returns whether any line was consumed.
    fn decode_buffered(&mut self) -> Result<bool, ReadError> {
        let mut consumed = 0;
        let mut matched = 0u64;

        while consumed < self.scroll_size {
            let Some(end) = self.carry.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line = self.carry.split_to(end);
            self.carry.advance(1);
            self.line += 1;
            consumed += 1;

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let record = match self.serde.decode(&line).context(CorruptRecordSnafu {
                path: &self.path,
                line: self.line,
            }) {
                Ok(record) => record,
                Err(err) if self.ready.is_empty() => return Err(err),
                Err(err) => {
                    self.deferred = Some(err);
                    break;
                }
            };
            if self.query.matches(&record) {
                self.ready.push_back(record);
                matched += 1;
            }
        }

        if matched > 0 {
            emit!(RecordsRead { count: matched });
        }
        Ok(consumed > 0)
    }

    /// Consume the reader as a stream of records.
    pub fn into_stream(self) -> impl Stream<Item = Result<Record, ReadError>> + Send {
        stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_record().await?.map(|record| (record, reader)))
        })
    }
}
