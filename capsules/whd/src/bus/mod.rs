// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Bus primitives used to reach the radio chip.
//!
//! The chip exposes three functions on its host bus: function 0 holds the
//! bus (CCCR) registers, function 1 is the 8-bit "backplane" through which
//! every chip register and RAM location is reached, and function 2 carries
//! WLAN frames. [`WhdBus`] is the raw transport a backend implements (SDIO in
//! [`sdio`], gSPI elsewhere); [`Backplane`] layers the address window on top.

pub mod backplane;
pub mod sdio;

pub use backplane::Backplane;

use crate::ErrorCode;

/// Bytes reserved in front of every bus transfer buffer for the transport's
/// command word.
pub const BUS_HEADER_SIZE: usize = 4;

/// Function 0 block size registers (16 bits, little endian).
pub(crate) const REG_BUS_BLOCK_SIZE_F1: u32 = 0x110;
pub(crate) const REG_BUS_BLOCK_SIZE_F2: u32 = 0x210;

/// Backplane window registers (function 1).
pub(crate) const REG_BACKPLANE_ADDRESS_LOW: u32 = 0x1000A;
pub(crate) const REG_BACKPLANE_ADDRESS_MID: u32 = 0x1000B;
pub(crate) const REG_BACKPLANE_ADDRESS_HIGH: u32 = 0x1000C;

/// Direction of a bus transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusDirection {
    Read,
    Write,
}

/// Bus functions of the radio chip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BusFunction {
    Bus = 0,
    Backplane = 1,
    Wlan = 2,
}

/// Raw transport to the radio chip.
///
/// Every failure is a hard bus error: implementations never report partial
/// transfers.
pub trait WhdBus {
    /// Move `data.len()` bytes between `data` and `address` of `function`.
    fn transfer_bytes(
        &mut self,
        direction: BusDirection,
        function: BusFunction,
        address: u32,
        data: &mut [u8],
    ) -> Result<(), ErrorCode>;

    /// Write the low `length` bytes of `value` (little endian) to a register.
    fn write_register_value(
        &mut self,
        function: BusFunction,
        address: u32,
        length: u8,
        value: u32,
    ) -> Result<(), ErrorCode>;

    /// Read `length` bytes of a register into the low bytes of the result.
    fn read_register_value(
        &mut self,
        function: BusFunction,
        address: u32,
        length: u8,
    ) -> Result<u32, ErrorCode>;

    /// Largest number of bytes a single backplane transfer may carry.
    fn max_transfer_size(&self) -> usize;
}
