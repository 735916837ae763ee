// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Bus, buffer and socket integration layer for the CYW43xx Wi-Fi Host
//! Driver (WHD).
//!
//! - [`buffer`]: packet buffers with movable front offset, heap or pool backed
//! - [`bus`]: raw bus transport, SDIO backend and backplane windowing
//! - [`download`]: firmware and NVRAM download into chip RAM
//! - [`socket`]: blocking raw sockets over a non-blocking network stack
//! - [`emac`]: Ethernet MAC glue and the per-role instance registry
//! - [`component`]: wiring of the above into a network manager

#![forbid(unsafe_code)]

pub mod buffer;
pub mod bus;
pub mod component;
pub mod download;
pub mod emac;
pub mod errorcode;
pub mod socket;

mod config;

#[cfg(test)]
mod testing;

pub use crate::errorcode::{into_retval, ErrorCode};
