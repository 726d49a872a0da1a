//! Fixed-capacity event ring shared by the three reader threads and the
//! main loop. A push writes one byte to a self-pipe whose read end is
//! registered with the event loop as a readable source; the consumer
//! drains both the queue and the pipe together.

use core_events::{InputEvent, RING_OVERFLOWS, RING_PUSHES};
use std::collections::VecDeque;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::sync::Mutex;
use std::sync::atomic::Ordering;

/// Events beyond this many queued but undrained are dropped silently.
pub const RING_CAPACITY: usize = 256;

pub struct InputRing {
    queue: Mutex<VecDeque<InputEvent>>,
    wake_write: OwnedFd,
    wake_read: OwnedFd,
}

impl InputRing {
    pub fn new() -> nix::Result<Self> {
        let (read, write) = nix::unistd::pipe()?;
        nix::fcntl::fcntl(
            &read,
            nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK),
        )?;
        Ok(Self {
            queue: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            wake_write: write,
            wake_read: read,
        })
    }

    /// The fd the main loop should register as a readable wake source.
    pub fn wake_fd(&self) -> BorrowedFd<'_> {
        self.wake_read.as_fd()
    }

    /// A duplicate of the wake fd, owned independently of `self`. Registering
    /// a borrow tied to `&self`'s lifetime with an event loop that requires
    /// `'static` sources doesn't typecheck; the dup is a distinct descriptor
    /// over the same pipe, so the event loop can own and eventually close it
    /// without affecting the ring's own `wake_read`.
    pub fn wake_fd_dup(&self) -> nix::Result<OwnedFd> {
        nix::unistd::dup(&self.wake_read)
    }

    /// Push one event. Dropped silently (and counted) if the ring is full.
    pub fn push(&self, event: InputEvent) {
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.len() >= RING_CAPACITY {
                RING_OVERFLOWS.fetch_add(1, Ordering::Relaxed);
                return;
            }
            queue.push_back(event);
        }
        RING_PUSHES.fetch_add(1, Ordering::Relaxed);
        let _ = nix::unistd::write(&self.wake_write, &[0u8]);
    }

    /// Drain every currently queued event and consume the matching wake
    /// bytes off the pipe so it stops reporting readable.
    pub fn drain(&self) -> Vec<InputEvent> {
        let events: Vec<InputEvent> = {
            let mut queue = self.queue.lock().unwrap();
            queue.drain(..).collect()
        };
        let mut scratch = [0u8; 64];
        loop {
            match nix::unistd::read(self.wake_read.as_raw_fd(), &mut scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(nix::errno::Errno::EAGAIN) => break,
                Err(_) => break,
            }
        }
        events
    }
}
