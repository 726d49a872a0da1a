//! Clipboard bridge between the local Wayland selection and the remote
//! Plan 9 snarf file.
//!
//! Copy (local -> remote) is driven from the main loop: a readable pipe fd
//! is registered with the event loop, and [`CopySession::on_readable`] is
//! called from that callback until it reports completion. Paste (remote ->
//! local) blocks on 9P reads, so it always runs on a short-lived detached
//! thread rather than the event loop (see [`spawn_paste`]).

use core_events::{PASTE_BYTES, PASTE_SESSIONS, PASTE_TRUNCATED};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mime types the compositor will mirror to the remote snarf file. Anything
/// else is left as a local-only selection.
pub const ACCEPTED_MIME_TYPES: &[&str] = &[
    "text/plain",
    "text/plain;charset=utf-8",
    "UTF8_STRING",
    "STRING",
    "TEXT",
];

/// Cap on accumulated copy bytes; content beyond this is dropped.
pub const DEFAULT_SNARF_CAPACITY: usize = 1 << 20;

/// True iff `mime` is one the bridge mirrors to the remote side.
pub fn mime_is_text(mime: &str) -> bool {
    ACCEPTED_MIME_TYPES.iter().any(|m| *m == mime)
}

/// First accepted mime type in `offered`, if any.
pub fn select_mime<'a>(offered: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    offered.into_iter().find(|m| mime_is_text(m))
}

#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    #[error("remote snarf write failed: {0}")]
    SnarfWrite(#[source] std::io::Error),
    #[error("remote snarf read failed: {0}")]
    SnarfRead(#[source] std::io::Error),
    #[error("selection reclaim failed: {0}")]
    Reclaim(String),
}

/// Capability boundary to the remote clipboard file (`/dev/snarf`).
/// Implemented over the real 9P mount in the binary crate; tests substitute
/// an in-memory fake.
pub trait SnarfFile: Send {
    fn write_snarf(&mut self, bytes: &[u8]) -> std::io::Result<()>;
    fn read_snarf(&mut self) -> std::io::Result<Vec<u8>>;
}

/// Re-asserts local selection ownership so all future paste requests --
/// including same-side pastes -- route through the remote snarf file.
pub trait SelectionOwner {
    fn reclaim(&mut self) -> Result<(), String>;
}

/// Outcome of feeding one chunk of bytes to a [`CopySession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyProgress {
    /// More bytes are expected; keep the fd registered.
    Continue,
    /// The source hit EOF; the session is finished and has been flushed to
    /// the remote snarf file and reclaimed ownership.
    Done { bytes: usize, truncated: bool },
}

/// Accumulates bytes read off the copy-source pipe into a bounded buffer,
/// mirroring the buffer to the remote snarf file on EOF and reclaiming
/// selection ownership.
pub struct CopySession {
    buffer: Vec<u8>,
    capacity: usize,
    truncated: bool,
}

impl CopySession {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SNARF_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::new(),
            capacity,
            truncated: false,
        }
    }

    /// Read whatever is currently available from `source` (a non-blocking
    /// or just-became-readable pipe end) and append it to the accumulation
    /// buffer, dropping bytes beyond `capacity`. Call from the event loop's
    /// readable callback; on EOF (a zero-length read), flushes to `snarf`
    /// and reclaims ownership via `owner`.
    pub fn on_readable(
        &mut self,
        source: &mut impl Read,
        snarf: &mut impl SnarfFile,
        owner: &mut impl SelectionOwner,
    ) -> Result<CopyProgress, ClipboardError> {
        let mut chunk = [0u8; 4096];
        loop {
            let n = match source.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return Ok(CopyProgress::Continue);
                }
                Err(_) => 0,
            };
            if n == 0 {
                return self.finish(snarf, owner);
            }
            let room = self.capacity.saturating_sub(self.buffer.len());
            if room > 0 {
                let take = room.min(n);
                self.buffer.extend_from_slice(&chunk[..take]);
                if take < n {
                    self.truncated = true;
                }
            } else {
                self.truncated = true;
            }
        }
    }

    fn finish(
        &mut self,
        snarf: &mut impl SnarfFile,
        owner: &mut impl SelectionOwner,
    ) -> Result<CopyProgress, ClipboardError> {
        snarf
            .write_snarf(&self.buffer)
            .map_err(ClipboardError::SnarfWrite)?;
        owner.reclaim().map_err(ClipboardError::Reclaim)?;
        if self.truncated {
            warn!(
                target: "clipboard",
                bytes = self.buffer.len(),
                capacity = self.capacity,
                "copy_truncated_at_snarf_capacity"
            );
        }
        debug!(target: "clipboard", bytes = self.buffer.len(), "copy_flushed_to_snarf");
        Ok(CopyProgress::Done {
            bytes: self.buffer.len(),
            truncated: self.truncated,
        })
    }
}

impl Default for CopySession {
    fn default() -> Self {
        Self::new()
    }
}

/// Diagnostic bound on concurrently outstanding paste threads. The spec
/// does not bound concurrent pastes, but an unbounded count of detached
/// threads is worth surfacing rather than letting it grow silently.
pub static OUTSTANDING_PASTE_THREADS: AtomicUsize = AtomicUsize::new(0);

/// Spawn a detached thread that blocks reading `snarf`'s full contents and
/// writes them to `client`, then closes it. Keeps the event loop
/// responsive while 9P reads block. `snarf` and `client` are boxed trait
/// objects so the binary crate can plug in real fds while tests use
/// in-memory fakes.
pub fn spawn_paste(
    mut snarf: Box<dyn SnarfFile>,
    mut client: Box<dyn Write + Send>,
) -> std::thread::JoinHandle<()> {
    let outstanding = OUTSTANDING_PASTE_THREADS.fetch_add(1, Ordering::Relaxed) + 1;
    debug!(target: "clipboard", outstanding, "paste_thread_spawned");
    std::thread::spawn(move || {
        PASTE_SESSIONS.fetch_add(1, Ordering::Relaxed);
        match snarf.read_snarf() {
            Ok(bytes) => {
                PASTE_BYTES.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                if bytes.len() >= DEFAULT_SNARF_CAPACITY {
                    PASTE_TRUNCATED.fetch_add(1, Ordering::Relaxed);
                }
                if let Err(e) = client.write_all(&bytes) {
                    warn!(target: "clipboard", error = %e, "paste_write_to_client_failed");
                }
            }
            Err(e) => {
                warn!(target: "clipboard", error = %e, "paste_snarf_read_failed");
            }
        }
        OUTSTANDING_PASTE_THREADS.fetch_sub(1, Ordering::Relaxed);
    })
}

/// Shared, lock-free reference used by tests to assert a [`SnarfFile`]/
/// [`SelectionOwner`] fake's observed state from the calling thread after a
/// paste thread has joined.
pub type Shared<T> = Arc<std::sync::Mutex<T>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Default)]
    struct FakeSnarf {
        written: Vec<u8>,
        to_read: Vec<u8>,
    }

    impl SnarfFile for FakeSnarf {
        fn write_snarf(&mut self, bytes: &[u8]) -> std::io::Result<()> {
            self.written = bytes.to_vec();
            Ok(())
        }
        fn read_snarf(&mut self) -> std::io::Result<Vec<u8>> {
            Ok(self.to_read.clone())
        }
    }

    #[derive(Default)]
    struct FakeOwner {
        reclaimed: bool,
    }

    impl SelectionOwner for FakeOwner {
        fn reclaim(&mut self) -> Result<(), String> {
            self.reclaimed = true;
            Ok(())
        }
    }

    #[test]
    fn mime_filter_accepts_known_text_types() {
        assert!(mime_is_text("text/plain"));
        assert!(mime_is_text("UTF8_STRING"));
        assert!(!mime_is_text("image/png"));
    }

    #[test]
    fn select_mime_picks_first_match() {
        let offered = ["image/png", "text/plain", "STRING"];
        assert_eq!(select_mime(offered), Some("text/plain"));
    }

    #[test]
    fn copy_session_accumulates_then_flushes_on_eof() {
        let mut session = CopySession::new();
        let mut snarf = FakeSnarf::default();
        let mut owner = FakeOwner::default();

        let mut source = Cursor::new(b"hello".to_vec());
        let progress = session
            .on_readable(&mut source, &mut snarf, &mut owner)
            .unwrap();
        assert_eq!(
            progress,
            CopyProgress::Done {
                bytes: 5,
                truncated: false
            }
        );
        assert_eq!(snarf.written, b"hello");
        assert!(owner.reclaimed);
    }

    #[test]
    fn copy_session_truncates_beyond_capacity() {
        let mut session = CopySession::with_capacity(4);
        let mut snarf = FakeSnarf::default();
        let mut owner = FakeOwner::default();
        let mut source = Cursor::new(b"hello world".to_vec());
        let progress = session
            .on_readable(&mut source, &mut snarf, &mut owner)
            .unwrap();
        assert_eq!(
            progress,
            CopyProgress::Done {
                bytes: 4,
                truncated: true
            }
        );
        assert_eq!(snarf.written, b"hell");
    }

    #[test]
    fn exactly_capacity_bytes_is_not_flagged_truncated() {
        let mut session = CopySession::with_capacity(5);
        let mut snarf = FakeSnarf::default();
        let mut owner = FakeOwner::default();
        let mut source = Cursor::new(b"hello".to_vec());
        let progress = session
            .on_readable(&mut source, &mut snarf, &mut owner)
            .unwrap();
        assert_eq!(
            progress,
            CopyProgress::Done {
                bytes: 5,
                truncated: false
            }
        );
    }

    #[test]
    fn paste_reads_snarf_and_writes_to_client_then_joins() {
        struct ReadOnceSnarf(Option<Vec<u8>>);
        impl SnarfFile for ReadOnceSnarf {
            fn write_snarf(&mut self, _bytes: &[u8]) -> std::io::Result<()> {
                unreachable!("paste never writes the snarf file")
            }
            fn read_snarf(&mut self) -> std::io::Result<Vec<u8>> {
                Ok(self.0.take().unwrap_or_default())
            }
        }

        let collected: Shared<Vec<u8>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        struct CollectingClient(Shared<Vec<u8>>);
        impl Write for CollectingClient {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let snarf = Box::new(ReadOnceSnarf(Some(b"pasted".to_vec())));
        let client = Box::new(CollectingClient(collected.clone()));
        let handle = spawn_paste(snarf, client);
        handle.join().unwrap();
        assert_eq!(*collected.lock().unwrap(), b"pasted");
    }
}
