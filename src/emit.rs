//! Emission of individual entries into the sequential tar stream.
//!
//! All entries get reproducible headers: zero modification time, root ownership, read-only
//! permissions for regular files.  No directory entries are written; readers see directories
//! implied by path prefixes.

use std::io::{self, Read, Write};

use log::debug;
use tar::{Builder, EntryType, Header};

use crate::error::{Error, Result};

const FILE_MODE: u32 = 0o444;

/// Counts the bytes that pass through a reader.
struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

fn header(entry_type: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_ustar();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

/// Writes entries into an append-only tar stream.
pub struct ArchiveEmitter<W: Write> {
    tar: Builder<W>,
}

impl<W: Write> ArchiveEmitter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            tar: Builder::new(sink),
        }
    }

    /// Sends a regular file of `expected_size` bytes, streamed from `stream`.
    ///
    /// If `stream` yields fewer or more bytes than declared, this fails with
    /// [`Error::SizeMismatch`]; the archive is unusable afterwards.  An overlong stream is read
    /// only one byte past `expected_size`.
    pub fn send_file(
        &mut self,
        path: &str,
        expected_size: u64,
        mut stream: impl Read,
    ) -> Result<()> {
        let mut header = header(EntryType::Regular, FILE_MODE, expected_size);
        debug!("Sending as tar file {path}");

        // TODO: This can take quite some time, and should ideally be cancellable.
        let mut body = CountingReader {
            inner: (&mut stream).take(expected_size),
            count: 0,
        };
        self.tar.append_data(&mut header, path, &mut body)?;

        let mut size = body.count;
        if size == expected_size {
            // Check for a single excess byte; the rest of an overlong stream is never read.
            size += io::copy(&mut (&mut stream).take(1), &mut io::sink())?;
        }
        if size != expected_size {
            return Err(Error::SizeMismatch {
                path: path.to_owned(),
                expected: expected_size,
                actual: size,
            });
        }
        Ok(())
    }

    pub fn send_bytes(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.send_file(path, data.len() as u64, data)
    }

    /// Sends a symlink at `path` pointing to `target`.
    pub fn send_symlink(&mut self, path: &str, target: &str) -> Result<()> {
        let mut header = header(EntryType::Symlink, 0, 0);
        debug!("Sending as tar link {path} -> {target}");
        self.tar.append_link(&mut header, path, target)?;
        Ok(())
    }

    /// Writes the end-of-archive trailer and returns the flushed sink.
    pub fn finish(self) -> Result<W> {
        let mut sink = self.tar.into_inner()?;
        sink.flush()?;
        Ok(sink)
    }
}
