// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Unbuffered file descriptor I/O for use inside a signal handler.
//!
//! `std::fs::File` would do, except that building the path it needs allocates, and
//! `std::io::stderr()` takes a reentrant lock which the crashing thread may already hold.
//! Everything here is a thin layer over `open`, `read`, `write` and `close`, which are all
//! async-signal-safe, and over fixed-size buffers.

use crate::shared::constants::PATH_BUFFER_LEN;
use std::ffi::CStr;
use std::fmt;
use std::io;

/// Formats a line onto stderr without allocating or locking.
macro_rules! sigsafe_eprintln {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let _ = writeln!($crate::collector::raw_io::StderrWriter, $($arg)*);
    }};
}
pub(crate) use sigsafe_eprintln;

fn write_fd(fd: libc::c_int, buf: &[u8]) -> io::Result<usize> {
    loop {
        // SAFETY: `buf` is a valid slice for the duration of the call.
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

pub(crate) struct StderrWriter;

impl io::Write for StderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        write_fd(libc::STDERR_FILENO, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An owned file descriptor, closed on drop.
#[derive(Debug)]
pub(crate) struct RawFile {
    fd: libc::c_int,
}

impl RawFile {
    /// Opens `path` for writing, creating it if needed and truncating whatever was there.
    pub fn create(path: &CStr) -> io::Result<Self> {
        Self::open(
            path,
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC | libc::O_CLOEXEC,
        )
    }

    pub fn open_read_only(path: &CStr) -> io::Result<Self> {
        Self::open(path, libc::O_RDONLY | libc::O_CLOEXEC)
    }

    fn open(path: &CStr, flags: libc::c_int) -> io::Result<Self> {
        let mode: libc::c_uint = 0o644;
        // SAFETY: `path` is NUL-terminated.
        let fd = unsafe { libc::open(path.as_ptr(), flags, mode) };
        if fd < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(Self { fd })
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // SAFETY: `buf` is a valid, writable slice for the duration of the call.
            let n =
                unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Copies everything readable from `self` into `w`, using a stack buffer of `N` bytes.
    pub fn copy_to<const N: usize>(&mut self, w: &mut impl io::Write) -> io::Result<usize> {
        let mut buffer = [0u8; N];
        let mut total = 0;
        loop {
            let n = self.read(&mut buffer)?;
            if n == 0 {
                return Ok(total);
            }
            w.write_all(&buffer[..n])?;
            total += n;
        }
    }
}

impl io::Write for RawFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        write_fd(self.fd, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for RawFile {
    fn drop(&mut self) {
        // Best-effort close
        // SAFETY: we own the descriptor.
        let _ = unsafe { libc::close(self.fd) };
    }
}

/// A NUL-terminated path assembled in a fixed-size buffer.
pub(crate) struct PathBuffer {
    buf: [u8; PATH_BUFFER_LEN],
    len: usize,
    file_name_start: usize,
}

impl PathBuffer {
    pub const fn new() -> Self {
        Self {
            buf: [0; PATH_BUFFER_LEN],
            len: 0,
            file_name_start: 0,
        }
    }

    /// Appends raw bytes. Fails if they do not fit (one byte is always kept for the NUL) or if
    /// they contain a NUL themselves.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), fmt::Error> {
        if bytes.contains(&0) || self.len + bytes.len() >= PATH_BUFFER_LEN {
            return Err(fmt::Error);
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        self.buf[self.len] = 0;
        Ok(())
    }

    /// Appends a path separator (unless there already is one) and marks the start of the file
    /// name.
    pub fn push_separator(&mut self) -> Result<(), fmt::Error> {
        if self.len == 0 || self.buf[self.len - 1] != b'/' {
            self.push_bytes(b"/")?;
        }
        self.file_name_start = self.len;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.buf[0] = 0;
        self.len = 0;
        self.file_name_start = 0;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The part of the path after the last separator pushed with [`PathBuffer::push_separator`].
    pub fn file_name(&self) -> &[u8] {
        &self.buf[self.file_name_start..self.len]
    }

    pub fn as_cstr(&self) -> &CStr {
        // `push_bytes` and `clear` keep a NUL at `self.len` and interior NULs are rejected, so
        // the first NUL is the terminator.
        CStr::from_bytes_until_nul(&self.buf).unwrap_or_default()
    }
}

impl fmt::Display for PathBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(std::str::from_utf8(self.as_bytes()).unwrap_or("<non-utf8 path>"))
    }
}

impl fmt::Write for PathBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_bytes(s.as_bytes())
    }
}
