// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Test doubles shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::PacketBuffer;
use crate::bus::backplane::BACKPLANE_ADDRESS_MASK;
use crate::bus::{BusDirection, BusFunction, WhdBus};
use crate::bus::{REG_BACKPLANE_ADDRESS_HIGH, REG_BACKPLANE_ADDRESS_LOW, REG_BACKPLANE_ADDRESS_MID};
use crate::emac::{Interface, WifiInterface};
use crate::ErrorCode;

type TransferHook = Box<dyn FnMut(usize) + Send>;

/// Simulated radio chip: backplane window registers plus a sparse RAM.
#[derive(Default)]
pub(crate) struct MockChip {
    window: [u8; 3],
    memory: HashMap<u32, u8>,
    /// Every register write as `(bus address, value)`.
    pub(crate) register_writes: Vec<(u32, u32)>,
    /// Every successful transfer as `(direction, chip address, length)`.
    pub(crate) transfers: Vec<(BusDirection, u32, usize)>,
    ops: usize,
    fail_at: Option<usize>,
    /// Reads of chip address 0 return a flipped bit.
    pub(crate) corrupt_address_zero: bool,
    on_transfer: Option<TransferHook>,
}

impl MockChip {
    /// Let `n` more bus operations succeed, then fail the next one.
    pub(crate) fn fail_after(&mut self, n: usize) {
        self.fail_at = Some(self.ops + n);
    }

    /// Call `hook` with the transfer index after each successful transfer.
    pub(crate) fn on_transfer(&mut self, hook: impl FnMut(usize) + Send + 'static) {
        self.on_transfer = Some(Box::new(hook));
    }

    /// Bus operations attempted so far.
    pub(crate) fn ops(&self) -> usize {
        self.ops
    }

    pub(crate) fn window_base(&self) -> u32 {
        (self.window[2] as u32) << 24 | (self.window[1] as u32) << 16 | (self.window[0] as u32) << 8
    }

    pub(crate) fn window_writes(&self) -> usize {
        self.register_writes
            .iter()
            .filter(|(reg, _)| {
                matches!(
                    *reg,
                    REG_BACKPLANE_ADDRESS_LOW | REG_BACKPLANE_ADDRESS_MID | REG_BACKPLANE_ADDRESS_HIGH
                )
            })
            .count()
    }

    pub(crate) fn read_memory(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| self.memory.get(&(address + i)).copied().unwrap_or(0))
            .collect()
    }

    pub(crate) fn read_word(&self, address: u32) -> u32 {
        let bytes = self.read_memory(address, 4);
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub(crate) fn write_memory(&mut self, address: u32, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.memory.insert(address + i as u32, *byte);
        }
    }

    fn begin_op(&mut self) -> Result<(), ErrorCode> {
        let index = self.ops;
        self.ops += 1;
        if self.fail_at == Some(index) {
            return Err(ErrorCode::SDIO);
        }
        Ok(())
    }

    fn chip_address(&self, bus_address: u32) -> u32 {
        self.window_base() | (bus_address & BACKPLANE_ADDRESS_MASK)
    }

    fn load(&self, address: u32) -> u8 {
        let value = self.memory.get(&address).copied().unwrap_or(0);
        if address == 0 && self.corrupt_address_zero {
            value ^ 1
        } else {
            value
        }
    }
}

/// A [`WhdBus`] talking to a [`MockChip`] the test keeps a handle on.
pub(crate) struct MockBus {
    chip: Arc<Mutex<MockChip>>,
    max_transfer: usize,
}

impl MockBus {
    pub(crate) fn new(max_transfer: usize) -> MockBus {
        MockBus {
            chip: Arc::new(Mutex::new(MockChip::default())),
            max_transfer,
        }
    }

    pub(crate) fn chip(&self) -> Arc<Mutex<MockChip>> {
        self.chip.clone()
    }
}

impl WhdBus for MockBus {
    fn transfer_bytes(
        &mut self,
        direction: BusDirection,
        function: BusFunction,
        address: u32,
        data: &mut [u8],
    ) -> Result<(), ErrorCode> {
        let mut chip = self.chip.lock().unwrap();
        chip.begin_op()?;
        assert_eq!(function, BusFunction::Backplane);
        assert!(data.len() <= self.max_transfer);
        let base = chip.chip_address(address);
        match direction {
            BusDirection::Write => chip.write_memory(base, data),
            BusDirection::Read => {
                for (i, byte) in data.iter_mut().enumerate() {
                    *byte = chip.load(base + i as u32);
                }
            }
        }
        chip.transfers.push((direction, base, data.len()));
        let index = chip.transfers.len() - 1;
        if let Some(mut hook) = chip.on_transfer.take() {
            hook(index);
            chip.on_transfer = Some(hook);
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
        let mut chip = self.chip.lock().unwrap();
        chip.begin_op()?;
        chip.register_writes.push((address, value));
        match (function, address) {
            (BusFunction::Backplane, REG_BACKPLANE_ADDRESS_LOW) => chip.window[0] = value as u8,
            (BusFunction::Backplane, REG_BACKPLANE_ADDRESS_MID) => chip.window[1] = value as u8,
            (BusFunction::Backplane, REG_BACKPLANE_ADDRESS_HIGH) => chip.window[2] = value as u8,
            (BusFunction::Backplane, _) => {
                let base = chip.chip_address(address);
                let bytes = value.to_le_bytes();
                chip.write_memory(base, &bytes[..length as usize]);
            }
            _ => {}
        }
        Ok(())
    }

    fn read_register_value(
        &mut self,
        function: BusFunction,
        address: u32,
        length: u8,
    ) -> Result<u32, ErrorCode> {
        let mut chip = self.chip.lock().unwrap();
        chip.begin_op()?;
        assert_eq!(function, BusFunction::Backplane);
        let base = chip.chip_address(address);
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().take(length as usize).enumerate() {
            *byte = chip.load(base + i as u32);
        }
        Ok(u32::from_le_bytes(bytes))
    }

    fn max_transfer_size(&self) -> usize {
        self.max_transfer
    }
}

/// A [`WifiInterface`] recording every frame handed to the radio.
#[derive(Default)]
pub(crate) struct MockRadio {
    /// `(interface, headroom, frame)` of every accepted frame.
    pub(crate) sent: Mutex<Vec<(Interface, usize, Vec<u8>)>>,
    pub(crate) up: Mutex<Vec<Interface>>,
    pub(crate) reject: AtomicBool,
}

impl WifiInterface for MockRadio {
    fn interface_up(&self, interface: Interface) -> Result<(), ErrorCode> {
        self.up.lock().unwrap().push(interface);
        Ok(())
    }

    fn interface_down(&self, interface: Interface) -> Result<(), ErrorCode> {
        self.up.lock().unwrap().retain(|i| *i != interface);
        Ok(())
    }

    fn send_ethernet_data(&self, interface: Interface, buffer: PacketBuffer) -> Result<(), ErrorCode> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(ErrorCode::FAIL);
        }
        self.sent
            .lock()
            .unwrap()
            .push((interface, buffer.front_offset(), buffer.data().to_vec()));
        Ok(())
    }

    fn mac_address(&self, interface: Interface) -> Result<[u8; 6], ErrorCode> {
        match interface {
            Interface::Sta => Ok([0x02, 0, 0, 0, 0, 1]),
            Interface::Ap => Ok([0x02, 0, 0, 0, 0, 2]),
        }
    }
}
