// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use super::raw_io::RawFile;
use crate::shared::constants::COPY_BUFFER_LEN;
use std::ffi::CStr;
use std::io::{self, Write};

const PROC_SELF_MAPS: &CStr = c"/proc/self/maps";

/// Copies the memory map of this process, verbatim, into `w`.
///
/// The file can be hundreds of kilobytes, so it is streamed through a fixed stack buffer rather
/// than read in full.
pub(crate) fn copy_memory_map(w: &mut impl Write) -> io::Result<usize> {
    copy_file_raw(PROC_SELF_MAPS, w)
}

/// SIGNAL SAFETY:
///     Only `open`, `read` and `close`. `std::fs::File::open` would allocate a path buffer.
pub(crate) fn copy_file_raw(path: &CStr, w: &mut impl Write) -> io::Result<usize> {
    let mut file = RawFile::open_read_only(path)?;
    file.copy_to::<COPY_BUFFER_LEN>(w)
}
