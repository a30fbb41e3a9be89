#![deny(unsafe_code)]

use crate::error::Error;
use nix::sys::stat::Mode;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Byte stream the channel reads records from.
pub trait LineSource: Send {
    /// Bytes that can be read right now without blocking.
    fn available(&mut self) -> io::Result<usize>;

    /// Append bytes up to and including the next newline, or as many as are
    /// available if no newline is buffered yet. Returns the number of bytes
    /// appended, zero when nothing is available.
    fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize>;
}

/// Named pipe opened for non-blocking reads.
#[derive(Debug)]
pub struct FifoSource {
    path: PathBuf,
    reader: BufReader<File>,
}

impl FifoSource {
    /// Create the pipe and open its read end. Fails if something already
    /// exists at `path`.
    pub fn create(path: &Path) -> Result<Self, Error> {
        let channel_error = |source: io::Error| Error::ChannelCreate {
            path: path.to_owned(),
            source,
        };
        nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o666))
            .map_err(|errno| channel_error(io::Error::from(errno)))?;
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(channel_error)?;
        Ok(Self {
            path: path.to_owned(),
            reader: BufReader::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[allow(unsafe_code)]
fn pending_bytes(fd: RawFd) -> io::Result<usize> {
    let mut count: libc::c_int = 0;
    // SAFETY: FIONREAD writes a single c_int through the provided pointer,
    // which points at a live stack variable.
    let ret = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut count as *mut libc::c_int) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(usize::try_from(count).unwrap_or(0))
}

impl LineSource for FifoSource {
    fn available(&mut self) -> io::Result<usize> {
        let pending = pending_bytes(self.reader.get_ref().as_raw_fd())?;
        Ok(pending + self.reader.buffer().len())
    }

    fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        let start = buf.len();
        loop {
            match self.reader.read_until(b'\n', buf) {
                Ok(_) => return Ok(buf.len() - start),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                // Bytes read before the pipe ran dry stay in `buf`.
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(buf.len() - start);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// In-memory source fed through a [`MemoryFeed`] handle.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    bytes: Arc<Mutex<VecDeque<u8>>>,
}

/// Writer side of a [`MemorySource`].
#[derive(Debug, Clone)]
pub struct MemoryFeed {
    bytes: Arc<Mutex<VecDeque<u8>>>,
}

impl MemorySource {
    pub fn pair() -> (Self, MemoryFeed) {
        let source = Self::default();
        let feed = MemoryFeed {
            bytes: Arc::clone(&source.bytes),
        };
        (source, feed)
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<u8>> {
        match self.bytes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MemoryFeed {
    pub fn push(&self, data: &[u8]) {
        let mut queue = match self.bytes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.extend(data.iter().copied());
    }
}

impl LineSource for MemorySource {
    fn available(&mut self) -> io::Result<usize> {
        Ok(self.queue().len())
    }

    fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        let mut queue = self.queue();
        let take = queue
            .iter()
            .position(|&b| b == b'\n')
            .map_or(queue.len(), |newline| newline + 1);
        buf.extend(queue.drain(..take));
        Ok(take)
    }
}
