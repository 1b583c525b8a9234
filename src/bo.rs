//! IO

use std::{
    io::{self, BufRead, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crate::{
    batom::{AtomicSaver, SaveError},
    bs::mkdir_p,
    misc::PathError,
};

// ------------ File write -------------

/// Create parent directories, then atomically replace `path` with `contents`
pub fn write_str(path: &Path, contents: &str) -> Result<(), SaveError> {
    if let Some(p) = path.parent() {
        mkdir_p(p)?;
    }
    AtomicSaver::new(path)?.save(|f| {
        f.write_all(contents.as_bytes())
            .map_err(|e| SaveError::Io(PathError::new("write", path, e)))
    })
}

// --------- DUMMY ------------

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("I/O operation on closed file")]
pub struct ClosedFile;

/// A stand-in file: reads are empty, writes vanish, the position is always 0.
/// Once closed, every operation fails with [`ClosedFile`].
#[derive(Debug, Clone)]
pub struct DummyFile {
    name: PathBuf,
    closed: bool,
}

impl DummyFile {
    pub fn new(name: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            closed: false,
        }
    }

    pub fn name(&self) -> &Path {
        &self.name
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn tell(&self) -> io::Result<u64> {
        self.check_open()?;
        Ok(0)
    }

    pub fn truncate(&mut self, _size: u64) -> io::Result<()> {
        self.check_open()
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            Err(io::Error::other(ClosedFile))
        } else {
            Ok(())
        }
    }
}

impl Read for DummyFile {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        self.check_open()?;
        Ok(0)
    }
}

impl BufRead for DummyFile {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.check_open()?;
        Ok(&[])
    }

    fn consume(&mut self, _amt: usize) {}
}

impl Write for DummyFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_open()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_open()
    }
}

impl Seek for DummyFile {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        self.tell()
    }
}
