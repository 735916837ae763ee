// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! SDIO backend for [`WhdBus`].
//!
//! Register accesses use CMD52 (IO_RW_DIRECT, one byte per command), bulk
//! accesses use CMD53 (IO_RW_EXTENDED). CMD53 runs in block mode for whole
//! blocks and in byte mode for the tail, so a transfer of any length becomes
//! at most a few commands. The host controller itself is behind
//! [`SdioHost`].

use log::trace;
use tock_registers::{register_bitfields, LocalRegisterCopy};

use super::{BusDirection, BusFunction, WhdBus};
use super::{REG_BUS_BLOCK_SIZE_F1, REG_BUS_BLOCK_SIZE_F2};
use crate::config::CONFIG;
use crate::ErrorCode;

/// Largest backplane transfer issued over SDIO.
pub const SDIO_MAX_BACKPLANE_TRANSFER_SIZE: usize = 1536;

/// CMD53 can count at most this many blocks.
const MAX_BLOCK_COUNT: usize = 511;
/// Register addresses are 17 bits wide.
const MAX_REGISTER_ADDRESS: u32 = 0x1FFFF;

register_bitfields![u32,
    /// CMD52 (IO_RW_DIRECT) argument
    pub Cmd52 [
        DATA OFFSET(0) NUMBITS(8) [],
        ADDRESS OFFSET(9) NUMBITS(17) [],
        /// Read after write
        RAW OFFSET(27) NUMBITS(1) [],
        FUNCTION OFFSET(28) NUMBITS(3) [],
        RW OFFSET(31) NUMBITS(1) [
            Read = 0,
            Write = 1
        ]
    ],

    /// CMD53 (IO_RW_EXTENDED) argument
    pub Cmd53 [
        /// Bytes in byte mode (0 means 512), blocks in block mode
        COUNT OFFSET(0) NUMBITS(9) [],
        ADDRESS OFFSET(9) NUMBITS(17) [],
        OP_CODE OFFSET(26) NUMBITS(1) [
            Fixed = 0,
            Incrementing = 1
        ],
        BLOCK_MODE OFFSET(27) NUMBITS(1) [],
        FUNCTION OFFSET(28) NUMBITS(3) [],
        RW OFFSET(31) NUMBITS(1) [
            Read = 0,
            Write = 1
        ]
    ]
];

type Cmd52Val = LocalRegisterCopy<u32, Cmd52::Register>;
type Cmd53Val = LocalRegisterCopy<u32, Cmd53::Register>;

/// SDIO host controller.
pub trait SdioHost {
    /// Issue CMD52 with `argument` and return the data byte of the response.
    fn cmd52(&mut self, argument: u32) -> Result<u8, ErrorCode>;

    /// Issue CMD53 with `argument`, moving `data` in the direction the
    /// argument encodes. In block mode `data.len()` is a whole number of
    /// blocks.
    fn cmd53(&mut self, argument: u32, data: &mut [u8]) -> Result<(), ErrorCode>;
}

pub(crate) fn cmd52_argument(
    direction: BusDirection,
    function: BusFunction,
    address: u32,
    data: u8,
) -> u32 {
    let rw = match direction {
        BusDirection::Read => Cmd52::RW::Read,
        BusDirection::Write => Cmd52::RW::Write,
    };
    let mut argument = Cmd52Val::new(0);
    argument.write(
        rw + Cmd52::FUNCTION.val(function as u32)
            + Cmd52::ADDRESS.val(address)
            + Cmd52::DATA.val(data as u32),
    );
    argument.get()
}

pub(crate) fn cmd53_argument(
    direction: BusDirection,
    function: BusFunction,
    address: u32,
    block_mode: bool,
    count: usize,
) -> u32 {
    let rw = match direction {
        BusDirection::Read => Cmd53::RW::Read,
        BusDirection::Write => Cmd53::RW::Write,
    };
    // The WLAN function is a FIFO; everything else is memory.
    let op = match function {
        BusFunction::Wlan => Cmd53::OP_CODE::Fixed,
        _ => Cmd53::OP_CODE::Incrementing,
    };
    let mode = if block_mode {
        Cmd53::BLOCK_MODE::SET
    } else {
        Cmd53::BLOCK_MODE::CLEAR
    };
    let mut argument = Cmd53Val::new(0);
    argument.write(
        rw + op
            + mode
            + Cmd53::FUNCTION.val(function as u32)
            + Cmd53::ADDRESS.val(address)
            + Cmd53::COUNT.val(count as u32),
    );
    argument.get()
}

pub struct SdioBus<H: SdioHost> {
    host: H,
    block_size: usize,
}

impl<H: SdioHost> SdioBus<H> {
    pub fn new(host: H) -> SdioBus<H> {
        SdioBus {
            host,
            block_size: CONFIG.sdio_block_size,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Program the block size of the backplane and WLAN functions.
    pub fn init(&mut self) -> Result<(), ErrorCode> {
        let size = self.block_size as u32;
        for register in [REG_BUS_BLOCK_SIZE_F1, REG_BUS_BLOCK_SIZE_F2] {
            self.write_register_value(BusFunction::Bus, register, 2, size)?;
        }
        Ok(())
    }
}

impl<H: SdioHost> WhdBus for SdioBus<H> {
    fn transfer_bytes(
        &mut self,
        direction: BusDirection,
        function: BusFunction,
        address: u32,
        data: &mut [u8],
    ) -> Result<(), ErrorCode> {
        if address > MAX_REGISTER_ADDRESS {
            return Err(ErrorCode::PARAMETER);
        }
        let mut done = 0;
        while done < data.len() {
            let remaining = data.len() - done;
            let (block_mode, count, len) = if remaining >= self.block_size {
                let blocks = (remaining / self.block_size).min(MAX_BLOCK_COUNT);
                (true, blocks, blocks * self.block_size)
            } else {
                (false, remaining, remaining)
            };
            let target = match function {
                BusFunction::Wlan => address,
                _ => address + done as u32,
            };
            let argument = cmd53_argument(direction, function, target, block_mode, count);
            if CONFIG.trace_bus {
                trace!("cmd53 {:#010x} ({} bytes)", argument, len);
            }
            self.host.cmd53(argument, &mut data[done..done + len])?;
            done += len;
        }
        Ok(())
    }

    fn write_register_value(
        &mut self,
        function: BusFunction,
        address: u32,
        length: u8,
        value: u32,
    ) -> Result<(), ErrorCode> {
        if length == 0 || length > 4 || address + length as u32 - 1 > MAX_REGISTER_ADDRESS {
            return Err(ErrorCode::PARAMETER);
        }
        for (i, byte) in value.to_le_bytes()[..length as usize].iter().enumerate() {
            let argument = cmd52_argument(BusDirection::Write, function, address + i as u32, *byte);
            self.host.cmd52(argument)?;
        }
        Ok(())
    }

    fn read_register_value(
        &mut self,
        function: BusFunction,
        address: u32,
        length: u8,
    ) -> Result<u32, ErrorCode> {
        if length == 0 || length > 4 || address + length as u32 - 1 > MAX_REGISTER_ADDRESS {
            return Err(ErrorCode::PARAMETER);
        }
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes[..length as usize].iter_mut().enumerate() {
            let argument = cmd52_argument(BusDirection::Read, function, address + i as u32, 0);
            *byte = self.host.cmd52(argument)?;
        }
        Ok(u32::from_le_bytes(bytes))
    }

    fn max_transfer_size(&self) -> usize {
        SDIO_MAX_BACKPLANE_TRANSFER_SIZE
    }
}
