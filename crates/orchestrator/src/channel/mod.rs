#![deny(unsafe_code)]

//! Event channel between the injected shim and the analyzer.
//!
//! A listener thread polls the channel for pending bytes and hands them to
//! a bounded pool of reader threads. Readers take turns on the stream under
//! one lock, which also guards the partial-line buffer, so a record split
//! across two reads is reassembled no matter which reader gets each half.

mod dispatch;
mod record;
mod source;

pub use dispatch::Dispatcher;
pub use record::{EventRecord, FileCategory, RecordError, TRACED_PREFIXES};
pub use source::{FifoSource, LineSource, MemoryFeed, MemorySource};

use crate::error::Error;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Created,
    Listening,
    Draining,
    Closed,
}

struct Stream {
    source: Box<dyn LineSource>,
    partial: Vec<u8>,
}

enum ReadOutcome {
    Record(String),
    Partial,
    Empty,
}

struct Shared {
    stream: Mutex<Stream>,
    dispatcher: Dispatcher,
    closed: AtomicBool,
}

impl Shared {
    fn lock_stream(&self) -> MutexGuard<'_, Stream> {
        match self.stream.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn available(&self) -> usize {
        match self.lock_stream().source.available() {
            Ok(count) => count,
            Err(err) => {
                warn!(%err, "unable to query pending channel bytes");
                0
            }
        }
    }

    fn next_record(&self) -> io::Result<ReadOutcome> {
        let mut stream = self.lock_stream();
        let mut chunk = Vec::new();
        if stream.source.read_line(&mut chunk)? == 0 {
            return Ok(ReadOutcome::Empty);
        }
        if chunk.last() != Some(&b'\n') {
            stream.partial.extend_from_slice(&chunk);
            return Ok(ReadOutcome::Partial);
        }
        let mut line = std::mem::take(&mut stream.partial);
        line.extend_from_slice(&chunk);
        Ok(ReadOutcome::Record(
            String::from_utf8_lossy(&line).into_owned(),
        ))
    }
}

fn reader_loop(shared: Arc<Shared>) {
    while !shared.closed.load(Ordering::Acquire) {
        match shared.next_record() {
            Ok(ReadOutcome::Record(line)) => shared.dispatcher.dispatch(&line),
            Ok(ReadOutcome::Partial) => continue,
            Ok(ReadOutcome::Empty) => break,
            Err(err) => {
                warn!(%err, "channel read failed");
                break;
            }
        }
    }
}

struct ReaderPool {
    handles: Vec<JoinHandle<()>>,
    max_readers: usize,
    spawned: u64,
}

impl ReaderPool {
    fn new(max_readers: usize) -> Self {
        Self {
            handles: Vec::new(),
            max_readers: max_readers.max(1),
            spawned: 0,
        }
    }

    fn live(&mut self) -> usize {
        self.handles.retain(|handle| !handle.is_finished());
        self.handles.len()
    }

    fn spawn(&mut self, shared: &Arc<Shared>) -> bool {
        if self.live() >= self.max_readers {
            return false;
        }
        let shared = Arc::clone(shared);
        self.spawned += 1;
        match std::thread::Builder::new()
            .name(format!("channel-reader-{}", self.spawned))
            .spawn(move || reader_loop(shared))
        {
            Ok(handle) => {
                self.handles.push(handle);
                true
            }
            Err(err) => {
                warn!(%err, "failed to spawn channel reader");
                false
            }
        }
    }

    fn join_all(&mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("channel reader panicked");
            }
        }
    }
}

fn listen(shared: Arc<Shared>, stop: Arc<AtomicBool>, max_readers: usize, idle: Duration) -> ReaderPool {
    let mut pool = ReaderPool::new(max_readers);
    while !stop.load(Ordering::Acquire) {
        if shared.available() > 0 && pool.spawn(&shared) {
            continue;
        }
        std::thread::sleep(idle);
    }
    trace!("channel listener exited");
    pool
}

pub struct EventChannel {
    settings: config::Channel,
    state: ChannelState,
    path: Option<PathBuf>,
    shared: Option<Arc<Shared>>,
    stop: Arc<AtomicBool>,
    listener: Option<JoinHandle<ReaderPool>>,
}

impl EventChannel {
    pub fn new(settings: config::Channel) -> Self {
        Self {
            settings,
            state: ChannelState::Created,
            path: None,
            shared: None,
            stop: Arc::new(AtomicBool::new(false)),
            listener: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Create the named pipe at `path` and start listening on it.
    pub fn start(&mut self, path: &Path, dispatcher: Dispatcher) -> Result<(), Error> {
        let source = FifoSource::create(path)?;
        self.path = Some(path.to_owned());
        self.start_with(Box::new(source), dispatcher)?;
        info!(path = %path.display(), "event channel listening");
        Ok(())
    }

    /// Start listening on an already opened source.
    pub fn start_with(
        &mut self,
        source: Box<dyn LineSource>,
        dispatcher: Dispatcher,
    ) -> Result<(), Error> {
        if self.state != ChannelState::Created {
            warn!(state = ?self.state, "event channel already started");
            return Ok(());
        }
        let shared = Arc::new(Shared {
            stream: Mutex::new(Stream {
                source,
                partial: Vec::new(),
            }),
            dispatcher,
            closed: AtomicBool::new(false),
        });

        let listener = {
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&self.stop);
            let max_readers = self.settings.max_readers;
            let idle = self.settings.idle_sleep;
            std::thread::Builder::new()
                .name("channel-listener".into())
                .spawn(move || listen(shared, stop, max_readers, idle))?
        };

        self.shared = Some(shared);
        self.listener = Some(listener);
        self.state = ChannelState::Listening;
        Ok(())
    }

    /// Drain for up to the configured deadline, then close.
    pub fn stop(&mut self) {
        self.stop_within(self.settings.drain_deadline);
    }

    /// Stop accepting new work, keep spawning readers while bytes remain and
    /// `grace` has not elapsed, wait for the readers and remove the pipe.
    pub fn stop_within(&mut self, grace: Duration) {
        if self.state != ChannelState::Listening {
            self.state = ChannelState::Closed;
            return;
        }
        self.state = ChannelState::Draining;
        self.stop.store(true, Ordering::Release);

        let mut pool = match self.listener.take().map(JoinHandle::join) {
            Some(Ok(pool)) => pool,
            Some(Err(_)) => {
                warn!("channel listener panicked");
                ReaderPool::new(self.settings.max_readers)
            }
            None => ReaderPool::new(self.settings.max_readers),
        };

        if let Some(shared) = self.shared.take() {
            let deadline = Instant::now() + grace;
            loop {
                let pending = shared.available();
                if pending == 0 {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(pending, "drain deadline reached, abandoning channel bytes");
                    break;
                }
                pool.spawn(&shared);
                std::thread::sleep(self.settings.drain_poll.min(grace));
            }

            shared.closed.store(true, Ordering::Release);
            pool.join_all();

            let leftover = shared.lock_stream().partial.len();
            if leftover > 0 {
                warn!(bytes = leftover, "discarding incomplete channel record");
            }
        }

        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "event channel removed"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!(path = %path.display(), %err, "unable to remove event channel"),
            }
        }
        self.state = ChannelState::Closed;
        info!("event channel closed");
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        if self.state == ChannelState::Listening {
            self.stop_within(Duration::ZERO);
        }
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("state", &self.state)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
