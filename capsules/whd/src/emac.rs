// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Ethernet MAC glue between the radio driver and a network stack.
//!
//! Each radio interface role (station or access point) gets one [`WhdEmac`].
//! The radio driver reports received frames and link changes through an
//! [`EmacRegistry`], which routes them to the instance owning that role. The
//! network stack talks to the instance through the usual Ethernet driver
//! shape: `link_out`, input and link-state callbacks, MTU and MAC address.
//!
//! Frames arriving before the stack has registered its input callback are
//! dropped. There is no pre-attach queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace, warn};

use crate::buffer::{BufferManager, Direction, PacketBuffer};
use crate::bus::BUS_HEADER_SIZE;
use crate::ErrorCode;

pub const ETHERNET_MTU: usize = 1500;
pub const ETHERNET_HEADER_SIZE: usize = 14;
pub const MAC_ADDRESS_SIZE: usize = 6;

const SDPCM_HEADER_SIZE: usize = 12;
/// Keeps the BDC header and the frame behind it 4-byte aligned.
const SDPCM_PADDING: usize = 2;
const BDC_HEADER_SIZE: usize = 4;

/// Headroom the radio driver needs in front of every outgoing frame.
pub const LINK_HEADROOM: usize =
    BUS_HEADER_SIZE + SDPCM_HEADER_SIZE + SDPCM_PADDING + BDC_HEADER_SIZE;

/// Radio interface roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Interface {
    Sta,
    Ap,
}

pub type LinkInputCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
pub type LinkStateCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Data path of the radio driver.
pub trait WifiInterface: Send + Sync {
    /// Bring the interface up in the radio firmware.
    fn interface_up(&self, interface: Interface) -> Result<(), ErrorCode>;

    fn interface_down(&self, interface: Interface) -> Result<(), ErrorCode>;

    /// Queue a frame for transmission. The visible window of `buffer` holds
    /// the Ethernet frame with [`LINK_HEADROOM`] bytes available in front.
    fn send_ethernet_data(
        &self,
        interface: Interface,
        buffer: PacketBuffer,
    ) -> Result<(), ErrorCode>;

    fn mac_address(&self, interface: Interface) -> Result<[u8; MAC_ADDRESS_SIZE], ErrorCode>;
}

#[derive(Default)]
struct EmacState {
    powered_up: bool,
    link_up: bool,
    input: Option<LinkInputCallback>,
    link_state: Option<LinkStateCallback>,
}

pub struct WhdEmac<W: WifiInterface> {
    interface: Interface,
    radio: Arc<W>,
    buffers: Arc<BufferManager>,
    state: Mutex<EmacState>,
}

impl<W: WifiInterface> WhdEmac<W> {
    pub fn new(interface: Interface, radio: Arc<W>, buffers: Arc<BufferManager>) -> WhdEmac<W> {
        WhdEmac {
            interface,
            radio,
            buffers,
            state: Mutex::new(EmacState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EmacState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn interface(&self) -> Interface {
        self.interface
    }

    pub fn power_up(&self) -> bool {
        if let Err(e) = self.radio.interface_up(self.interface) {
            warn!("{:?}: power up failed: {:?}", self.interface, e);
            return false;
        }
        self.lock().powered_up = true;
        true
    }

    /// Power the interface down. The link is reported down if it was up.
    pub fn power_down(&self) {
        let callback = {
            let mut state = self.lock();
            state.powered_up = false;
            let was_up = core::mem::replace(&mut state.link_up, false);
            state.link_state.clone().filter(|_| was_up)
        };
        if let Err(e) = self.radio.interface_down(self.interface) {
            warn!("{:?}: power down failed: {:?}", self.interface, e);
        }
        if let Some(callback) = callback {
            callback(false);
        }
    }

    pub fn is_powered_up(&self) -> bool {
        self.lock().powered_up
    }

    pub fn is_link_up(&self) -> bool {
        self.lock().link_up
    }

    pub fn get_mtu_size(&self) -> usize {
        ETHERNET_MTU
    }

    pub fn get_hwaddr_size(&self) -> usize {
        MAC_ADDRESS_SIZE
    }

    pub fn get_hwaddr(&self) -> Result<[u8; MAC_ADDRESS_SIZE], ErrorCode> {
        self.radio.mac_address(self.interface)
    }

    pub fn set_link_input_cb(&self, callback: Option<LinkInputCallback>) {
        self.lock().input = callback;
    }

    pub fn set_link_state_cb(&self, callback: Option<LinkStateCallback>) {
        self.lock().link_state = callback;
    }

    /// Transmit one Ethernet frame. Returns whether the radio accepted it.
    pub fn link_out(&self, frame: &[u8]) -> bool {
        if !self.is_powered_up() {
            debug!("{:?}: link_out while powered down", self.interface);
            return false;
        }
        if frame.len() > ETHERNET_MTU + ETHERNET_HEADER_SIZE {
            warn!("{:?}: frame of {} bytes exceeds MTU", self.interface, frame.len());
            return false;
        }
        let size = LINK_HEADROOM + frame.len();
        let mut buffer = match self.buffers.allocate(Direction::Tx, size, 0) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("{:?}: no TX buffer: {:?}", self.interface, e);
                return false;
            }
        };
        if buffer.add_remove_at_front(LINK_HEADROOM as isize).is_err() {
            return false;
        }
        buffer.data_mut().copy_from_slice(frame);
        match self.radio.send_ethernet_data(self.interface, buffer) {
            Ok(()) => true,
            Err(e) => {
                warn!("{:?}: transmit failed: {:?}", self.interface, e);
                false
            }
        }
    }

    /// A frame arrived from the radio. The radio buffer is always released;
    /// the stack gets its own copy.
    pub fn on_packet(&self, buffer: PacketBuffer) {
        let (input, powered_up) = {
            let state = self.lock();
            (state.input.clone(), state.powered_up)
        };
        let Some(input) = input else {
            if !powered_up {
                debug!("{:?}: dropping frame received before power up", self.interface);
            }
            self.buffers.release(buffer, Direction::Rx);
            return;
        };

        let mut frame = Vec::new();
        let copied = frame.try_reserve_exact(buffer.size()).is_ok();
        if copied {
            frame.extend_from_slice(buffer.data());
        }
        self.buffers.release(buffer, Direction::Rx);

        if copied {
            trace!("{:?}: delivering {} byte frame", self.interface, frame.len());
            input(frame);
        } else {
            warn!("{:?}: no memory for received frame", self.interface);
        }
    }

    /// The radio reported a link change.
    pub fn on_link_state(&self, up: bool) {
        let callback = {
            let mut state = self.lock();
            state.link_up = up;
            state.link_state.clone()
        };
        debug!("{:?}: link {}", self.interface, if up { "up" } else { "down" });
        if let Some(callback) = callback {
            callback(up);
        }
    }
}

/// The EMAC instance of each interface role.
pub struct EmacRegistry<W: WifiInterface> {
    instances: HashMap<Interface, Arc<WhdEmac<W>>>,
}

impl<W: WifiInterface> Default for EmacRegistry<W> {
    fn default() -> Self {
        EmacRegistry {
            instances: HashMap::new(),
        }
    }
}

impl<W: WifiInterface> EmacRegistry<W> {
    pub fn new() -> EmacRegistry<W> {
        EmacRegistry::default()
    }

    /// Add the instance for its role. A role can only be registered once.
    pub fn register(&mut self, emac: Arc<WhdEmac<W>>) -> Result<(), ErrorCode> {
        let interface = emac.interface();
        if self.instances.contains_key(&interface) {
            return Err(ErrorCode::PARAMETER);
        }
        self.instances.insert(interface, emac);
        Ok(())
    }

    pub fn get(&self, interface: Interface) -> Option<&Arc<WhdEmac<W>>> {
        self.instances.get(&interface)
    }

    pub fn link_state_changed(&self, interface: Interface, up: bool) -> Result<(), ErrorCode> {
        let emac = self.get(interface).ok_or(ErrorCode::PARAMETER)?;
        emac.on_link_state(up);
        Ok(())
    }

    /// Route a received frame to its interface. Frames for an unregistered
    /// role are released and reported.
    pub fn packet_received(
        &self,
        interface: Interface,
        buffer: PacketBuffer,
        buffers: &BufferManager,
    ) -> Result<(), ErrorCode> {
        match self.get(interface) {
            Some(emac) => {
                emac.on_packet(buffer);
                Ok(())
            }
            None => {
                buffers.release(buffer, Direction::Rx);
                Err(ErrorCode::PARAMETER)
            }
        }
    }
}
