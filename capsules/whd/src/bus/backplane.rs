// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Backplane window management.
//!
//! The backplane function only decodes the low 12 bits of an address. The
//! remaining bits select a 4 KB window through three 8-bit registers holding
//! address bits 31:24, 23:16 and 15:8. Every firmware download block and
//! every register access crosses this path, so the window registers are only
//! rewritten when the target window actually changes, and then only the bytes
//! that differ.
//!
//! [`Backplane`] is not internally synchronized. Its owner must serialize all
//! accesses to the bus (see [`crate::component::NetworkManager`]).

use log::trace;
use tock_registers::{register_bitfields, LocalRegisterCopy};

use super::{BusDirection, BusFunction, WhdBus};
use super::{REG_BACKPLANE_ADDRESS_HIGH, REG_BACKPLANE_ADDRESS_LOW, REG_BACKPLANE_ADDRESS_MID};
use crate::config::CONFIG;
use crate::ErrorCode;

pub(crate) const BACKPLANE_ADDRESS_MASK: u32 = 0xFFF;
pub(crate) const BACKPLANE_WINDOW_SIZE: u32 = BACKPLANE_ADDRESS_MASK + 1;
/// Selects 32-bit wide accesses on the backplane.
pub(crate) const BACKPLANE_ACCESS_4B_FLAG: u32 = 0x08000;

register_bitfields![u32,
    /// A chip address split the way the backplane function decodes it
    pub ChipAddress [
        /// Offset inside the current window, carried by each bus command
        IN_WINDOW OFFSET(0) NUMBITS(12) [],
        /// Window register `SDIO_BACKPLANE_ADDRESS_LOW`
        LOW OFFSET(8) NUMBITS(8) [],
        /// Window register `SDIO_BACKPLANE_ADDRESS_MID`
        MID OFFSET(16) NUMBITS(8) [],
        /// Window register `SDIO_BACKPLANE_ADDRESS_HIGH`
        HIGH OFFSET(24) NUMBITS(8) [],
    ]
];

type ChipAddressVal = LocalRegisterCopy<u32, ChipAddress::Register>;

/// A [`WhdBus`] together with the cached backplane window base.
pub struct Backplane<B: WhdBus> {
    bus: B,
    /// Window base currently programmed in the chip, `None` if unknown.
    window: Option<u32>,
}

impl<B: WhdBus> Backplane<B> {
    pub fn new(bus: B) -> Backplane<B> {
        Backplane { bus, window: None }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// The cached window base, if known.
    pub fn current_window(&self) -> Option<u32> {
        self.window
    }

    /// Forget the cached window, e.g. after the bus was re-initialized. The
    /// next access rewrites all three window registers.
    pub fn invalidate(&mut self) {
        self.window = None;
    }

    /// Point the backplane window at the 4 KB page holding `address`.
    ///
    /// Only window registers whose byte differs from the cached base are
    /// written, highest byte first. If a write fails the error is returned
    /// immediately; the cache then holds exactly the bytes that reached the
    /// chip, so retrying the call only rewrites what is still stale.
    pub fn set_window(&mut self, address: u32) -> Result<(), ErrorCode> {
        let new_base = address & !BACKPLANE_ADDRESS_MASK;
        if self.window == Some(new_base) {
            return Ok(());
        }

        let target = ChipAddressVal::new(new_base);
        let registers = [
            (ChipAddress::HIGH, REG_BACKPLANE_ADDRESS_HIGH),
            (ChipAddress::MID, REG_BACKPLANE_ADDRESS_MID),
            (ChipAddress::LOW, REG_BACKPLANE_ADDRESS_LOW),
        ];
        for (field, register) in registers {
            let byte = target.read(field);
            if let Some(current) = self.window {
                if ChipAddressVal::new(current).read(field) == byte {
                    continue;
                }
            }
            self.bus
                .write_register_value(BusFunction::Backplane, register, 1, byte)?;
            if let Some(current) = self.window.as_mut() {
                let mut cached = ChipAddressVal::new(*current);
                cached.modify(field.val(byte));
                *current = cached.get();
            }
        }
        self.window = Some(new_base);

        if CONFIG.trace_bus {
            trace!("backplane window set to {:#010x}", new_base);
        }
        Ok(())
    }

    fn bus_address(address: u32, wide: bool) -> u32 {
        let offset = ChipAddressVal::new(address).read(ChipAddress::IN_WINDOW);
        if wide {
            offset | BACKPLANE_ACCESS_4B_FLAG
        } else {
            offset
        }
    }

    /// Read a 1, 2 or 4 byte register through the backplane.
    pub fn read_backplane_value(&mut self, address: u32, length: u8) -> Result<u32, ErrorCode> {
        if !matches!(length, 1 | 2 | 4) {
            return Err(ErrorCode::PARAMETER);
        }
        self.set_window(address)?;
        self.bus.read_register_value(
            BusFunction::Backplane,
            Self::bus_address(address, length == 4),
            length,
        )
    }

    /// Write a 1, 2 or 4 byte register through the backplane.
    pub fn write_backplane_value(
        &mut self,
        address: u32,
        length: u8,
        value: u32,
    ) -> Result<(), ErrorCode> {
        if !matches!(length, 1 | 2 | 4) {
            return Err(ErrorCode::PARAMETER);
        }
        self.set_window(address)?;
        self.bus.write_register_value(
            BusFunction::Backplane,
            Self::bus_address(address, length == 4),
            length,
            value,
        )
    }

    /// Length of the next segment starting at `address` when `remaining`
    /// bytes are left: bounded by the bus maximum and by the end of the
    /// window `address` falls in.
    pub fn segment_len(&self, address: u32, remaining: usize) -> usize {
        let in_window = (address & BACKPLANE_ADDRESS_MASK) as usize;
        remaining
            .min(self.bus.max_transfer_size())
            .min(BACKPLANE_WINDOW_SIZE as usize - in_window)
    }

    /// Transfer one segment. `data` must fit in the window of `address` and
    /// within the bus maximum; see [`Backplane::segment_len`].
    pub fn transfer_segment(
        &mut self,
        direction: BusDirection,
        address: u32,
        data: &mut [u8],
    ) -> Result<(), ErrorCode> {
        if data.len() > self.segment_len(address, data.len()) {
            return Err(ErrorCode::PARAMETER);
        }
        self.set_window(address)?;
        if CONFIG.trace_bus {
            trace!("backplane {:?} {} bytes at {:#010x}", direction, data.len(), address);
        }
        self.bus.transfer_bytes(
            direction,
            BusFunction::Backplane,
            Self::bus_address(address, true),
            data,
        )
    }

    /// Transfer an arbitrary range of chip memory, split into segments that
    /// never cross a window boundary.
    pub fn transfer_backplane_bytes(
        &mut self,
        direction: BusDirection,
        mut address: u32,
        data: &mut [u8],
    ) -> Result<(), ErrorCode> {
        let mut done = 0;
        while done < data.len() {
            let len = self.segment_len(address, data.len() - done);
            self.transfer_segment(direction, address, &mut data[done..done + len])?;
            done += len;
            address = address.wrapping_add(len as u32);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBus;

    #[test]
    fn same_page_writes_window_once() {
        let bus = MockBus::new(64);
        let chip = bus.chip();
        let mut backplane = Backplane::new(bus);

        backplane.set_window(0x1810_4123).unwrap();
        assert_eq!(chip.lock().unwrap().window_writes(), 3);
        backplane.set_window(0x1810_4FFC).unwrap();
        backplane.set_window(0x1810_4000).unwrap();
        assert_eq!(chip.lock().unwrap().window_writes(), 3);
        assert_eq!(backplane.current_window(), Some(0x1810_4000));
    }

    #[test]
    fn only_differing_bytes_are_written() {
        let bus = MockBus::new(64);
        let chip = bus.chip();
        let mut backplane = Backplane::new(bus);

        backplane.set_window(0x1800_0000).unwrap();
        chip.lock().unwrap().register_writes.clear();

        backplane.set_window(0x1800_1000).unwrap();
        let writes = chip.lock().unwrap().register_writes.clone();
        assert_eq!(writes, vec![(REG_BACKPLANE_ADDRESS_LOW, 0x10)]);

        backplane.set_window(0x1910_1000).unwrap();
        let writes = chip.lock().unwrap().register_writes.clone();
        assert_eq!(
            writes[1..],
            [
                (REG_BACKPLANE_ADDRESS_HIGH, 0x19),
                (REG_BACKPLANE_ADDRESS_MID, 0x10)
            ]
        );
    }

    #[test]
    fn failed_write_does_not_advance_cache() {
        let bus = MockBus::new(64);
        let chip = bus.chip();
        let mut backplane = Backplane::new(bus);
        backplane.set_window(0x1800_0000).unwrap();

        // The second register write (MID) fails.
        chip.lock().unwrap().fail_after(1);
        assert_eq!(backplane.set_window(0x1910_0000), Err(ErrorCode::SDIO));
        // HIGH reached the chip, MID did not.
        assert_eq!(backplane.current_window(), Some(0x1900_0000));
        assert_eq!(chip.lock().unwrap().window_base(), 0x1900_0000);

        chip.lock().unwrap().register_writes.clear();
        backplane.set_window(0x1910_0000).unwrap();
        assert_eq!(
            chip.lock().unwrap().register_writes,
            vec![(REG_BACKPLANE_ADDRESS_MID, 0x10)]
        );
    }

    #[test]
    fn failure_from_unknown_window_leaves_it_unknown() {
        let bus = MockBus::new(64);
        let chip = bus.chip();
        let mut backplane = Backplane::new(bus);
        chip.lock().unwrap().fail_after(0);
        assert_eq!(backplane.set_window(0x1800_0000), Err(ErrorCode::SDIO));
        assert_eq!(backplane.current_window(), None);
    }

    #[test]
    fn invalidate_forces_full_rewrite() {
        let bus = MockBus::new(64);
        let chip = bus.chip();
        let mut backplane = Backplane::new(bus);
        backplane.set_window(0x1800_0000).unwrap();
        backplane.invalidate();
        backplane.set_window(0x1800_0000).unwrap();
        assert_eq!(chip.lock().unwrap().window_writes(), 6);
    }

    #[test]
    fn values_round_trip_through_window() {
        let mut backplane = Backplane::new(MockBus::new(64));
        backplane.write_backplane_value(0x1800_2024, 4, 0xdead_beef).unwrap();
        backplane.write_backplane_value(0x0000_0010, 1, 0x5a).unwrap();
        assert_eq!(backplane.read_backplane_value(0x1800_2024, 4), Ok(0xdead_beef));
        assert_eq!(backplane.read_backplane_value(0x1800_2024, 2), Ok(0xbeef));
        assert_eq!(backplane.read_backplane_value(0x10, 1), Ok(0x5a));
        assert_eq!(
            backplane.read_backplane_value(0x10, 3),
            Err(ErrorCode::PARAMETER)
        );
    }

    #[test]
    fn bulk_transfers_split_at_window_and_bus_limits() {
        let bus = MockBus::new(64);
        let chip = bus.chip();
        let mut backplane = Backplane::new(bus);

        let mut data: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        backplane
            .transfer_backplane_bytes(BusDirection::Write, 0x0000_0FC0, &mut data)
            .unwrap();

        let transfers = chip.lock().unwrap().transfers.clone();
        let lens: Vec<(u32, usize)> = transfers.iter().map(|t| (t.1, t.2)).collect();
        assert_eq!(lens, vec![(0xFC0, 64), (0x1000, 64), (0x1040, 64), (0x1080, 8)]);

        let mut back = vec![0u8; 200];
        backplane
            .transfer_backplane_bytes(BusDirection::Read, 0x0000_0FC0, &mut back)
            .unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn oversized_segment_is_rejected() {
        let mut backplane = Backplane::new(MockBus::new(64));
        let mut data = [0u8; 65];
        assert_eq!(
            backplane.transfer_segment(BusDirection::Write, 0, &mut data),
            Err(ErrorCode::PARAMETER)
        );
        assert_eq!(backplane.segment_len(0xFF0, 64), 16);
    }
}
