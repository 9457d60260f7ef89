//! Durable request queue
//!
//! On-disk layout inside the queue directory:
//!
//! - `queue.log`: append-only records, each framed as
//!   `[u32 LE length][u32 LE crc32][bincode PendingRequest]`
//! - `queue.cursor`: u64 LE offset of the oldest unread record, replaced
//!   atomically through a temporary file
//!
//! A torn tail (from a crash mid-append) is truncated at open; a record whose
//! checksum fails but whose length is sane is skipped over. When
//! the cursor catches up with the end of the log, the log is truncated back to
//! empty so the file does not grow without bound.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use core::time::Duration;
use parking_lot::Mutex;
use river_core::{PendingRequest, Result, RiverError};
use tracing::{debug, info, warn};

pub const LOG_FILE: &str = "queue.log";
pub const CURSOR_FILE: &str = "queue.cursor";
const CURSOR_TMP_FILE: &str = "queue.cursor.tmp";

const HEADER_LEN: u64 = 8;
const MAX_RECORD_LEN: u32 = 16 * 1024 * 1024;

// ----------------------------------------------------------------------------
// Queue Files
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct QueueFiles {
    log: File,
    /// Offset of the oldest unread record
    cursor: u64,
    /// Offset one past the last valid record
    end: u64,
    /// Records between cursor and end
    len: usize,
}

/// Result of reading one framed record
enum Frame {
    Record { payload: Vec<u8>, next: u64 },
    Corrupt { next: Option<u64>, reason: String },
    Torn,
}

// ----------------------------------------------------------------------------
// Durable Queue
// ----------------------------------------------------------------------------

/// Crash-tolerant FIFO of [`PendingRequest`]s
#[derive(Debug)]
pub struct DurableQueue {
    dir: PathBuf,
    files: Mutex<QueueFiles>,
}

impl DurableQueue {
    /// Open (or create) the queue stored in `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut log = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.join(LOG_FILE))?;
        let stored_cursor = read_cursor(&dir)?;

        // Walk the log to the end of the last readable frame. Records with a
        // bad checksum but a sane length are stepped over and never counted.
        let file_len = log.metadata()?.len();
        let mut offset = 0u64;
        let mut len = 0usize;
        while offset < file_len {
            match read_frame(&mut log, offset, file_len)? {
                Frame::Record { next, .. } => {
                    if offset >= stored_cursor {
                        len += 1;
                    }
                    offset = next;
                }
                Frame::Corrupt {
                    next: Some(next),
                    reason,
                } => {
                    warn!("Corrupt queue record at offset {}: {}", offset, reason);
                    offset = next;
                }
                Frame::Corrupt { next: None, reason } => {
                    warn!("Unreadable queue frame at offset {}: {}", offset, reason);
                    break;
                }
                Frame::Torn => break,
            }
        }
        let end = offset;

        if end < file_len {
            warn!(
                "Truncating {} bytes of damaged queue tail in {}",
                file_len - end,
                dir.display()
            );
            log.set_len(end)?;
        }

        let mut files = QueueFiles {
            log,
            cursor: stored_cursor.min(end),
            end,
            len,
        };
        if files.cursor == files.end && files.end > 0 {
            compact(&dir, &mut files)?;
        } else if files.cursor != stored_cursor {
            write_cursor(&dir, files.cursor)?;
        }

        debug!(
            "Opened queue {} with {} pending requests",
            dir.display(),
            files.len
        );
        Ok(Self {
            dir,
            files: Mutex::new(files),
        })
    }

    /// Open the queue, retrying a few times and wiping the directory between
    /// failed attempts
    pub async fn open_with_retry<P: AsRef<Path>>(
        dir: P,
        attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=attempts {
            match Self::open(dir) {
                Ok(queue) => return Ok(queue),
                Err(e) => {
                    warn!(
                        "Failed to open queue {} (attempt {}/{}): {}",
                        dir.display(),
                        attempt,
                        attempts,
                        e
                    );
                    last_error = e.to_string();
                    if let Err(e) = fs::remove_dir_all(dir) {
                        debug!("Could not remove queue directory {}: {}", dir.display(), e);
                    }
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }

        Err(RiverError::queue_unavailable(
            dir.display().to_string(),
            last_error,
        ))
    }

    /// Append a request at the tail
    pub fn enqueue(&self, request: &PendingRequest) -> Result<()> {
        let payload = request.to_bytes()?;
        let frame = encode_frame(&payload)?;

        let mut files = self.files.lock();
        let end = files.end;
        files.log.seek(SeekFrom::Start(end))?;
        files.log.write_all(&frame)?;
        files.end += frame.len() as u64;
        files.len += 1;
        Ok(())
    }

    /// Remove and return the oldest request
    ///
    /// Records that fail their checksum or do not decode are logged and
    /// skipped. Returns `None` once the queue is empty.
    pub fn dequeue(&self) -> Result<Option<PendingRequest>> {
        let mut files = self.files.lock();

        while files.cursor < files.end {
            let offset = files.cursor;
            let end = files.end;
            let frame = read_frame(&mut files.log, offset, end)?;

            // Corrupt records were never counted in `len`
            let (payload, next) = match frame {
                Frame::Record { payload, next } => (Some(payload), next),
                Frame::Corrupt {
                    next: Some(next),
                    reason,
                } => {
                    warn!("Skipping corrupt queue record at offset {}: {}", offset, reason);
                    (None, next)
                }
                Frame::Corrupt { next: None, reason } => {
                    return Err(RiverError::corrupted(offset, reason));
                }
                Frame::Torn => {
                    return Err(RiverError::corrupted(offset, "record extends past end of log"));
                }
            };

            files.cursor = next;
            if payload.is_some() {
                files.len = files.len.saturating_sub(1);
            }
            if files.cursor == files.end {
                compact(&self.dir, &mut files)?;
            } else {
                write_cursor(&self.dir, files.cursor)?;
            }

            if let Some(payload) = payload {
                match PendingRequest::from_bytes(&payload) {
                    Ok(request) => return Ok(Some(request)),
                    Err(e) => warn!("Skipping undecodable queue record at offset {}: {}", offset, e),
                }
            }
        }

        Ok(None)
    }

    /// Remove and return every queued request, oldest first
    pub fn drain(&self) -> Result<Vec<PendingRequest>> {
        let mut drained = Vec::new();
        while let Some(request) = self.dequeue()? {
            drained.push(request);
        }
        Ok(drained)
    }

    /// Snapshot of the queued requests without consuming them
    pub fn peek_all(&self) -> Result<Vec<PendingRequest>> {
        let mut files = self.files.lock();
        let end = files.end;
        let mut offset = files.cursor;
        let mut requests = Vec::with_capacity(files.len);

        while offset < end {
            match read_frame(&mut files.log, offset, end)? {
                Frame::Record { payload, next } => {
                    if let Ok(request) = PendingRequest::from_bytes(&payload) {
                        requests.push(request);
                    }
                    offset = next;
                }
                Frame::Corrupt { next: Some(next), .. } => offset = next,
                Frame::Corrupt { next: None, .. } | Frame::Torn => break,
            }
        }
        Ok(requests)
    }

    /// Discard every queued request
    pub fn clear(&self) -> Result<()> {
        let mut files = self.files.lock();
        let discarded = files.len;
        compact(&self.dir, &mut files)?;
        info!("Dropped {} queued requests from {}", discarded, self.dir.display());
        Ok(())
    }

    /// Flush the log, the cursor file and the directory entry to stable
    /// storage
    pub fn sync(&self) -> Result<()> {
        let files = self.files.lock();
        files.log.sync_all()?;

        match File::open(self.dir.join(CURSOR_FILE)) {
            Ok(cursor) => cursor.sync_all()?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // Makes the cursor rename durable; directories cannot be opened
        // for syncing on every platform
        #[cfg(unix)]
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// ----------------------------------------------------------------------------
// Framing
// ----------------------------------------------------------------------------

fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_LEN)
        .ok_or_else(|| {
            RiverError::config_error(format!("queue record of {} bytes is too large", payload.len()))
        })?;

    let mut frame = Vec::with_capacity(HEADER_LEN as usize + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Read the record starting at `offset`, never looking past `limit`
fn read_frame(log: &mut File, offset: u64, limit: u64) -> io::Result<Frame> {
    if offset + HEADER_LEN > limit {
        return Ok(Frame::Torn);
    }

    let mut header = [0u8; HEADER_LEN as usize];
    log.seek(SeekFrom::Start(offset))?;
    log.read_exact(&mut header)?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    if len > MAX_RECORD_LEN {
        return Ok(Frame::Corrupt {
            next: None,
            reason: format!("record length {} exceeds limit", len),
        });
    }
    let next = offset + HEADER_LEN + len as u64;
    if next > limit {
        return Ok(Frame::Torn);
    }

    let mut payload = vec![0u8; len as usize];
    log.read_exact(&mut payload)?;
    if crc32fast::hash(&payload) != crc {
        return Ok(Frame::Corrupt {
            next: Some(next),
            reason: "checksum mismatch".to_string(),
        });
    }
    Ok(Frame::Record { payload, next })
}

// ----------------------------------------------------------------------------
// Cursor
// ----------------------------------------------------------------------------

fn read_cursor(dir: &Path) -> io::Result<u64> {
    let bytes = match fs::read(dir.join(CURSOR_FILE)) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    match <[u8; 8]>::try_from(bytes.as_slice()) {
        Ok(raw) => Ok(u64::from_le_bytes(raw)),
        Err(_) => {
            warn!("Ignoring malformed queue cursor in {}", dir.display());
            Ok(0)
        }
    }
}

fn write_cursor(dir: &Path, cursor: u64) -> io::Result<()> {
    let tmp = dir.join(CURSOR_TMP_FILE);
    fs::write(&tmp, cursor.to_le_bytes())?;
    fs::rename(&tmp, dir.join(CURSOR_FILE))
}

/// Reset the log to empty once everything in it has been consumed
fn compact(dir: &Path, files: &mut QueueFiles) -> io::Result<()> {
    // Truncate before resetting the cursor so a crash in between replays nothing
    files.log.set_len(0)?;
    files.cursor = 0;
    files.end = 0;
    files.len = 0;
    write_cursor(dir, 0)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
