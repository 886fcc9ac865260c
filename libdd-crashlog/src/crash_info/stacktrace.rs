// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::shared::constants::MAX_BACKTRACE_FRAMES;
use std::ffi::CStr;

/// Return addresses of the crashing thread, innermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backtrace {
    frames: [usize; MAX_BACKTRACE_FRAMES],
    len: usize,
}

impl Backtrace {
    pub const fn new() -> Self {
        Self {
            frames: [0; MAX_BACKTRACE_FRAMES],
            len: 0,
        }
    }

    /// Appends a frame. Returns false (and drops the address) once the backtrace is full.
    pub fn push(&mut self, ip: usize) -> bool {
        if self.len >= MAX_BACKTRACE_FRAMES {
            return false;
        }
        self.frames[self.len] = ip;
        self.len += 1;
        true
    }

    pub fn frames(&self) -> &[usize] {
        &self.frames[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl Default for Backtrace {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort description of the code at an address, as found by the dynamic loader.
///
/// The strings belong to the loader and stay valid as long as the module is mapped, which is
/// the remaining lifetime of a crashing process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedFrame {
    pub module: Option<&'static CStr>,
    pub symbol: Option<&'static CStr>,
    /// Distance from the nearest preceding symbol, or from the module base when no symbol was
    /// found.
    pub offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backtrace_is_bounded() {
        let mut bt = Backtrace::new();
        assert!(bt.is_empty());
        for ip in 1..=MAX_BACKTRACE_FRAMES {
            assert!(bt.push(ip));
        }
        assert!(!bt.push(0xdead));
        assert_eq!(bt.len(), MAX_BACKTRACE_FRAMES);
        assert_eq!(bt.frames()[0], 1);
        assert_eq!(bt.frames()[MAX_BACKTRACE_FRAMES - 1], MAX_BACKTRACE_FRAMES);

        bt.clear();
        assert!(bt.is_empty());
    }
}
