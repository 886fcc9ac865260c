// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
mod api;
mod atomguard;
mod crash_handler;
mod emitters;
mod memory_map;
pub(crate) mod raw_io;
mod registers;
mod signal_handler_manager;
mod unwind;

pub use api::*;
pub use emitters::EmitterError;
pub use signal_handler_manager::{
    Disposition, KindState, SavedDisposition, SigactionBackend, SignalRegistry, SystemSigaction,
};
pub(crate) use signal_handler_manager::terminate;
