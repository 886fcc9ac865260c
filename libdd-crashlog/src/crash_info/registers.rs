// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Enough room for the largest general-purpose register file we dump (x0-x30 on aarch64).
pub const MAX_REGISTERS: usize = 32;

/// The register file of the faulting thread, as saved by the kernel in the machine context.
///
/// General registers are kept in the order the architecture numbers them. The stack pointer,
/// the link register (where the architecture has one) and the program counter are kept apart
/// since they are printed after the general registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSnapshot {
    registers: [(&'static str, u64); MAX_REGISTERS],
    len: usize,
    pub sp: u64,
    pub lr: Option<u64>,
    pub pc: u64,
    /// Number of hex digits used when printing a register: 16 on 64-bit targets, 8 on 32-bit.
    pub hex_width: usize,
}

impl RegisterSnapshot {
    pub const fn new(hex_width: usize) -> Self {
        Self {
            registers: [("", 0); MAX_REGISTERS],
            len: 0,
            sp: 0,
            lr: None,
            pc: 0,
            hex_width,
        }
    }

    /// Empties the snapshot so that it can be filled again.
    pub fn reset(&mut self, hex_width: usize) {
        self.len = 0;
        self.sp = 0;
        self.lr = None;
        self.pc = 0;
        self.hex_width = hex_width;
    }

    /// Appends a general register. Returns false (and drops the value) once the snapshot is full.
    pub fn push(&mut self, name: &'static str, value: u64) -> bool {
        if self.len >= MAX_REGISTERS {
            return false;
        }
        self.registers[self.len] = (name, value);
        self.len += 1;
        true
    }

    pub fn general(&self) -> &[(&'static str, u64)] {
        &self.registers[..self.len]
    }
}
