// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Compile-time configuration of the WHD layer.
//!
//! Boolean options are driven by cargo features so a board crate can turn on
//! tracing without modifying this crate; numeric options are plain constants.
//! This is the only place in the crate where `cfg!(feature = ...)` is used.
//! Code paths behind a disabled option are still type-checked and are folded
//! away by the compiler.

/// Data structure holding compile-time configuration options.
pub(crate) struct Config {
    /// Trace every backplane window change and bus segment through `log`.
    pub(crate) trace_bus: bool,

    /// Log per-block progress of firmware and NVRAM downloads.
    pub(crate) debug_download: bool,

    /// Transfer lengths sent to chip RAM are rounded up to this many bytes.
    /// The chip's DMA engine rejects unaligned lengths.
    pub(crate) download_alignment: usize,

    /// Smallest transfer buffer payload the downloader will fall back to when
    /// halving its request after an allocation failure.
    pub(crate) download_block_floor: usize,

    /// Block size programmed for SDIO function 1 and 2 block transfers.
    pub(crate) sdio_block_size: usize,
}

/// The configuration used by the crate.
pub(crate) const CONFIG: Config = Config {
    trace_bus: cfg!(feature = "trace_bus"),
    debug_download: cfg!(feature = "debug_download"),
    download_alignment: 64,
    download_block_floor: 64,
    sdio_block_size: 64,
};
