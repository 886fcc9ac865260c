// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Data collected about a fault. Every type in here has a fixed size and lives on the stack of
//! the signal handler: nothing in this module allocates.

mod fault_kind;
mod registers;
mod report;
mod sig_info;
mod stacktrace;
mod timestamp;

pub use fault_kind::*;
pub use registers::*;
pub use report::*;
pub use sig_info::*;
pub use stacktrace::*;
pub use timestamp::*;
