// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Component wiring the WHD layer together.
//!
//! The resulting [`NetworkManager`] owns the buffer manager, the bus (behind
//! a single lock, so the backplane window cache and the download buffer have
//! exactly one user at a time) and the EMAC instance of every interface role.
//!
//! Usage
//! -----
//! ```rust,ignore
//! let bus = SdioBus::new(host);
//! let manager = capsules_whd::component::WhdComponent::new(bus, radio, ChipInfo::CYW4343W)
//!     .with_rx_pool(PacketPool::new(1600, 16))
//!     .finalize()?;
//! manager.bring_up(&MemoryResource::new(FIRMWARE, NVRAM, 1024))?;
//! let sta = manager.emac(Interface::Sta);
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use log::info;

use crate::buffer::{BufferManager, PacketBuffer, PacketPool};
use crate::bus::{Backplane, WhdBus};
use crate::download::{ChipInfo, DownloadAbort, DownloadCursor, Downloader, ResourceSource};
use crate::emac::{EmacRegistry, Interface, WhdEmac, WifiInterface};
use crate::ErrorCode;

pub struct WhdComponent<B: WhdBus, W: WifiInterface> {
    bus: B,
    radio: Arc<W>,
    chip: ChipInfo,
    rx_pool: Option<Arc<PacketPool>>,
    heap_limit: Option<usize>,
}

impl<B: WhdBus, W: WifiInterface> WhdComponent<B, W> {
    pub fn new(bus: B, radio: Arc<W>, chip: ChipInfo) -> Self {
        Self {
            bus,
            radio,
            chip,
            rx_pool: None,
            heap_limit: None,
        }
    }

    pub fn with_rx_pool(mut self, pool: Arc<PacketPool>) -> Self {
        self.rx_pool = Some(pool);
        self
    }

    pub fn with_heap_limit(mut self, bytes: usize) -> Self {
        self.heap_limit = Some(bytes);
        self
    }

    pub fn finalize(self) -> Result<NetworkManager<B, W>, ErrorCode> {
        let mut buffers = match self.heap_limit {
            Some(bytes) => BufferManager::with_heap_limit(bytes),
            None => BufferManager::new(),
        };
        if let Some(pool) = self.rx_pool {
            buffers = buffers.with_rx_pool(pool);
        }
        let buffers = Arc::new(buffers);

        let mut registry = EmacRegistry::new();
        for interface in [Interface::Sta, Interface::Ap] {
            registry.register(Arc::new(WhdEmac::new(
                interface,
                self.radio.clone(),
                buffers.clone(),
            )))?;
        }

        Ok(NetworkManager {
            buffers,
            backplane: Mutex::new(Backplane::new(self.bus)),
            registry,
            chip: self.chip,
            abort: DownloadAbort::new(),
        })
    }
}

pub struct NetworkManager<B: WhdBus, W: WifiInterface> {
    buffers: Arc<BufferManager>,
    backplane: Mutex<Backplane<B>>,
    registry: EmacRegistry<W>,
    chip: ChipInfo,
    abort: DownloadAbort,
}

impl<B: WhdBus, W: WifiInterface> NetworkManager<B, W> {
    pub fn buffers(&self) -> &Arc<BufferManager> {
        &self.buffers
    }

    pub fn chip(&self) -> ChipInfo {
        self.chip
    }

    pub fn emac(&self, interface: Interface) -> Option<&Arc<WhdEmac<W>>> {
        self.registry.get(interface)
    }

    /// Run `f` with exclusive access to the bus.
    pub fn with_bus<R>(
        &self,
        f: impl FnOnce(&mut Backplane<B>) -> Result<R, ErrorCode>,
    ) -> Result<R, ErrorCode> {
        let mut backplane = self
            .backplane
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut backplane)
    }

    /// Load firmware and NVRAM into the chip. Clears any earlier
    /// cancellation first; [`NetworkManager::cancel_download`] from another
    /// thread stops it at the next segment.
    pub fn bring_up<R: ResourceSource + ?Sized>(
        &self,
        source: &R,
    ) -> Result<(DownloadCursor, DownloadCursor), ErrorCode> {
        self.abort.reset();
        let downloader = Downloader::new(&self.buffers, self.chip, self.abort.clone());
        self.with_bus(|backplane| {
            backplane.invalidate();
            let firmware = downloader.download_firmware(backplane, source)?;
            let nvram = downloader.download_nvram(backplane, source)?;
            info!(
                "chip {}: firmware {} bytes, nvram {} bytes loaded",
                self.chip.chip_id, firmware.image_size, nvram.image_size
            );
            Ok((firmware, nvram))
        })
    }

    pub fn cancel_download(&self) {
        self.abort.abort();
    }

    /// A handle that cancels downloads of this manager.
    pub fn abort_handle(&self) -> DownloadAbort {
        self.abort.clone()
    }

    pub fn link_state_changed(&self, interface: Interface, up: bool) -> Result<(), ErrorCode> {
        self.registry.link_state_changed(interface, up)
    }

    pub fn packet_received(
        &self,
        interface: Interface,
        buffer: PacketBuffer,
    ) -> Result<(), ErrorCode> {
        self.registry
            .packet_received(interface, buffer, &self.buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Direction;
    use crate::download::MemoryResource;
    use crate::testing::{MockBus, MockRadio};

    fn manager(chip: ChipInfo) -> NetworkManager<MockBus, MockRadio> {
        WhdComponent::new(MockBus::new(512), Arc::new(MockRadio::default()), chip)
            .with_rx_pool(PacketPool::new(1600, 4))
            .finalize()
            .unwrap()
    }

    #[test]
    fn bring_up_loads_both_images() {
        let firmware: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let nvram = b"macaddr=00:90:4c:c5:12:38\0\0".to_vec();
        let manager = manager(ChipInfo::CYW43012);
        let chip = manager.with_bus(|backplane| Ok(backplane.bus().chip())).unwrap();

        let (fw, nv) = manager
            .bring_up(&MemoryResource::new(&firmware, &nvram, 1024))
            .unwrap();
        assert_eq!(fw.transfer_progress, 3000);
        assert_eq!(nv.transfer_progress as usize, nvram.len());

        let chip = chip.lock().unwrap();
        assert_eq!(chip.read_memory(0, 3000), firmware);
        let end = ChipInfo::CYW43012.ram_end().unwrap();
        assert_eq!(chip.read_memory(end - 4 - 64, nvram.len()), nvram);
        assert_eq!(manager.buffers().outstanding(), 0);
    }

    #[test]
    fn cancelled_bring_up_can_be_retried() {
        let firmware = vec![0x5a; 4096];
        let manager = manager(ChipInfo::CYW4343W);
        let abort = manager.abort_handle();
        let chip = manager.with_bus(|backplane| Ok(backplane.bus().chip())).unwrap();
        chip.lock().unwrap().on_transfer(move |index| {
            if index == 2 {
                abort.abort();
            }
        });

        let source = MemoryResource::new(&firmware, b"a=1\0", 1024);
        assert_eq!(manager.bring_up(&source), Err(ErrorCode::UNFINISHED));
        assert_eq!(manager.buffers().outstanding(), 0);

        chip.lock().unwrap().on_transfer(|_| {});
        assert!(manager.bring_up(&source).is_ok());
    }

    #[test]
    fn events_reach_role_instances() {
        let manager = manager(ChipInfo::CYW4343W);
        manager.link_state_changed(Interface::Ap, true).unwrap();
        assert!(manager.emac(Interface::Ap).unwrap().is_link_up());
        assert!(!manager.emac(Interface::Sta).unwrap().is_link_up());

        let buffer = manager
            .buffers()
            .allocate(Direction::Rx, 42, 0)
            .unwrap();
        manager.packet_received(Interface::Sta, buffer).unwrap();
        assert_eq!(manager.buffers().outstanding(), 0);
    }
}
