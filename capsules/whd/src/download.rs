// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Firmware and NVRAM download into chip RAM.
//!
//! A resource is pulled block by block from a [`ResourceSource`], staged in a
//! single reusable transfer buffer and pushed over the backplane in segments
//! no larger than the bus allows. The download can be cancelled from another
//! thread through a [`DownloadAbort`] handle; the flag is polled before every
//! segment, so cancellation takes effect within one segment transfer.
//!
//! Either the whole resource reaches the chip or an error is returned and the
//! chip must be treated as not yet operational. Nothing is retried here.
//!
//! CR4-class chips run their firmware from a non-zero RAM base. Their reset
//! vector (the first word of the image) is additionally written to address 0
//! once the image is in place, and verified by reading it back.
//!
//! The NVRAM image sits right below the top of RAM, followed by a size marker
//! word the firmware scans for at boot:
//!
//! ```text
//!  ram_base                     ram_end - 4 - len     ram_end - 4   ram_end
//!  | firmware image ...         | NVRAM (len bytes)   | marker      |
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::buffer::{BufferManager, Direction, PacketBuffer};
use crate::bus::{Backplane, BusDirection, WhdBus, BUS_HEADER_SIZE};
use crate::config::CONFIG;
use crate::ErrorCode;

/// Resources the downloader knows how to place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceType {
    WlanFirmware,
    WlanNvram,
}

/// Source of firmware and NVRAM images.
///
/// Blocks are read in order, from index 0 to `block_count - 1`; every block
/// but the last holds exactly `block_size` bytes.
pub trait ResourceSource {
    fn size(&self, resource: ResourceType) -> Result<u32, ErrorCode>;
    fn block_count(&self, resource: ResourceType) -> Result<u32, ErrorCode>;
    fn block_size(&self, resource: ResourceType) -> Result<u32, ErrorCode>;
    fn get_block(&self, resource: ResourceType, index: u32) -> Result<&[u8], ErrorCode>;
}

/// Images linked into the application binary, served in fixed-size blocks.
pub struct MemoryResource<'a> {
    firmware: &'a [u8],
    nvram: &'a [u8],
    block_size: u32,
}

impl<'a> MemoryResource<'a> {
    pub fn new(firmware: &'a [u8], nvram: &'a [u8], block_size: u32) -> MemoryResource<'a> {
        MemoryResource {
            firmware,
            nvram,
            block_size,
        }
    }

    fn image(&self, resource: ResourceType) -> &'a [u8] {
        match resource {
            ResourceType::WlanFirmware => self.firmware,
            ResourceType::WlanNvram => self.nvram,
        }
    }
}

impl ResourceSource for MemoryResource<'_> {
    fn size(&self, resource: ResourceType) -> Result<u32, ErrorCode> {
        Ok(self.image(resource).len() as u32)
    }

    fn block_count(&self, resource: ResourceType) -> Result<u32, ErrorCode> {
        if self.block_size == 0 {
            return Err(ErrorCode::PARAMETER);
        }
        Ok((self.image(resource).len() as u32).div_ceil(self.block_size))
    }

    fn block_size(&self, _resource: ResourceType) -> Result<u32, ErrorCode> {
        Ok(self.block_size)
    }

    fn get_block(&self, resource: ResourceType, index: u32) -> Result<&[u8], ErrorCode> {
        self.image(resource)
            .chunks(self.block_size.max(1) as usize)
            .nth(index as usize)
            .ok_or(ErrorCode::PARAMETER)
    }
}

/// RAM layout of a supported radio chip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChipInfo {
    pub chip_id: u16,
    pub ram_base: u32,
    pub ram_size: u32,
}

impl ChipInfo {
    pub const CYW4343W: ChipInfo = ChipInfo {
        chip_id: 43430,
        ram_base: 0,
        ram_size: 512 * 1024,
    };
    pub const CYW43012: ChipInfo = ChipInfo {
        chip_id: 43012,
        ram_base: 0,
        ram_size: 640 * 1024,
    };
    pub const CYW43455: ChipInfo = ChipInfo {
        chip_id: 0x4345,
        ram_base: 0x198000,
        ram_size: 800 * 1024,
    };
    pub const CYW4373: ChipInfo = ChipInfo {
        chip_id: 0x4373,
        ram_base: 0x160000,
        ram_size: 896 * 1024,
    };

    /// CR4 cores load their firmware at a non-zero RAM base and need the
    /// reset vector relocated to address 0.
    pub fn is_cr4(&self) -> bool {
        self.ram_base != 0
    }

    /// First address past RAM. A layout that wraps the address space is
    /// rejected with `PARAMETER`.
    pub fn ram_end(&self) -> Result<u32, ErrorCode> {
        self.ram_base
            .checked_add(self.ram_size)
            .ok_or(ErrorCode::PARAMETER)
    }
}

/// Cancels an in-progress download. Clones share the same flag.
#[derive(Clone, Default, Debug)]
pub struct DownloadAbort(Arc<AtomicBool>);

impl DownloadAbort {
    pub fn new() -> DownloadAbort {
        DownloadAbort::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag before starting a new download.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Progress of a resource download.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DownloadCursor {
    pub resource: ResourceType,
    pub image_size: u32,
    /// Payload size of the transfer buffer actually obtained.
    pub block_size: usize,
    pub blocks_transferred: u32,
    /// Image bytes written to the chip so far. Never exceeds `image_size`.
    pub transfer_progress: u32,
    /// First firmware word, captured on CR4 chips only.
    pub reset_vector: Option<u32>,
}

fn round_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

pub struct Downloader<'a> {
    buffers: &'a BufferManager,
    chip: ChipInfo,
    abort: DownloadAbort,
}

impl<'a> Downloader<'a> {
    pub fn new(buffers: &'a BufferManager, chip: ChipInfo, abort: DownloadAbort) -> Downloader<'a> {
        Downloader {
            buffers,
            chip,
            abort,
        }
    }

    /// Load the firmware image at the chip's RAM base. On CR4 chips the reset
    /// vector is then written to address 0 and verified.
    pub fn download_firmware<B: WhdBus, R: ResourceSource + ?Sized>(
        &self,
        backplane: &mut Backplane<B>,
        source: &R,
    ) -> Result<DownloadCursor, ErrorCode> {
        let cursor = self.download_resource(
            backplane,
            source,
            ResourceType::WlanFirmware,
            self.chip.ram_base,
        )?;

        if self.chip.is_cr4() {
            let vector = cursor.reset_vector.ok_or(ErrorCode::NORESOURCE)?;
            backplane.write_backplane_value(0, 4, vector)?;
            let readback = backplane.read_backplane_value(0, 4)?;
            if readback != vector {
                warn!(
                    "reset vector readback mismatch: wrote {:#010x}, read {:#010x}",
                    vector, readback
                );
                return Err(ErrorCode::SDIO);
            }
        }
        Ok(cursor)
    }

    /// Load the NVRAM image below the top of RAM and write the size marker
    /// the firmware looks for.
    pub fn download_nvram<B: WhdBus, R: ResourceSource + ?Sized>(
        &self,
        backplane: &mut Backplane<B>,
        source: &R,
    ) -> Result<DownloadCursor, ErrorCode> {
        let (size, _, _) = Self::metadata(source, ResourceType::WlanNvram)?;
        let image_len = round_up(size as usize, CONFIG.download_alignment) as u32;
        let marker_address = self
            .chip
            .ram_end()?
            .checked_sub(4)
            .ok_or(ErrorCode::PARAMETER)?;
        let address = marker_address
            .checked_sub(image_len)
            .filter(|address| *address >= self.chip.ram_base)
            .ok_or(ErrorCode::SIZE)?;

        let cursor = self.download_resource(backplane, source, ResourceType::WlanNvram, address)?;

        let words = image_len / 4;
        let marker = (!words << 16) | (words & 0xFFFF);
        backplane.write_backplane_value(marker_address, 4, marker)?;
        Ok(cursor)
    }

    /// Transfer `resource` from `source` to chip RAM at `address`.
    pub fn download_resource<B: WhdBus, R: ResourceSource + ?Sized>(
        &self,
        backplane: &mut Backplane<B>,
        source: &R,
        resource: ResourceType,
        address: u32,
    ) -> Result<DownloadCursor, ErrorCode> {
        let (image_size, block_size, block_count) = Self::metadata(source, resource)?;
        u32::try_from(round_up(image_size as usize, CONFIG.download_alignment))
            .ok()
            .and_then(|len| address.checked_add(len))
            .ok_or(ErrorCode::PARAMETER)?;
        let mut buffer = self.allocate_transfer_buffer(block_size as usize)?;

        let mut cursor = DownloadCursor {
            resource,
            image_size,
            block_size: buffer.size(),
            blocks_transferred: 0,
            transfer_progress: 0,
            reset_vector: None,
        };
        let result = self.transfer_blocks(
            backplane,
            source,
            &mut buffer,
            &mut cursor,
            address,
            block_count,
        );
        self.buffers.release(buffer, Direction::Tx);

        result?;
        if CONFIG.debug_download {
            debug!(
                "{:?}: {} bytes in {} blocks",
                resource, cursor.transfer_progress, cursor.blocks_transferred
            );
        }
        Ok(cursor)
    }

    fn metadata<R: ResourceSource + ?Sized>(
        source: &R,
        resource: ResourceType,
    ) -> Result<(u32, u32, u32), ErrorCode> {
        let size = source.size(resource).map_err(|_| ErrorCode::NORESOURCE)?;
        let block_size = source
            .block_size(resource)
            .map_err(|_| ErrorCode::NORESOURCE)?;
        let block_count = source
            .block_count(resource)
            .map_err(|_| ErrorCode::NORESOURCE)?;
        if size == 0 || block_size == 0 || block_count == 0 {
            warn!("{:?} missing or empty", resource);
            return Err(ErrorCode::NORESOURCE);
        }
        Ok((size, block_size, block_count))
    }

    /// Obtain a TX buffer with `block_size` bytes of payload behind the bus
    /// header, halving the request on exhaustion down to the configured floor.
    fn allocate_transfer_buffer(&self, block_size: usize) -> Result<PacketBuffer, ErrorCode> {
        let alignment = CONFIG.download_alignment;
        let mut request = round_up(block_size, alignment);
        loop {
            match self
                .buffers
                .allocate(Direction::Tx, request + BUS_HEADER_SIZE, 0)
            {
                Ok(mut buffer) => {
                    buffer.add_remove_at_front(BUS_HEADER_SIZE as isize)?;
                    return Ok(buffer);
                }
                Err(ErrorCode::NOMEM) if request / 2 >= CONFIG.download_block_floor => {
                    request = round_up(request / 2, alignment);
                    debug!("download buffer unavailable, retrying with {} bytes", request);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn transfer_blocks<B: WhdBus, R: ResourceSource + ?Sized>(
        &self,
        backplane: &mut Backplane<B>,
        source: &R,
        buffer: &mut PacketBuffer,
        cursor: &mut DownloadCursor,
        mut address: u32,
        block_count: u32,
    ) -> Result<(), ErrorCode> {
        let capture_vector = cursor.resource == ResourceType::WlanFirmware && self.chip.is_cr4();
        let payload = buffer.size();

        for index in 0..block_count {
            let block = source
                .get_block(cursor.resource, index)
                .map_err(|_| ErrorCode::NORESOURCE)?;
            let left = (cursor.image_size - cursor.transfer_progress) as usize;
            let block = &block[..block.len().min(left)];

            for chunk in block.chunks(payload) {
                // Chip DMA needs aligned lengths; the padding is zeroed.
                let padded = round_up(chunk.len(), CONFIG.download_alignment);
                let data = buffer.data_mut();
                data[..chunk.len()].copy_from_slice(chunk);
                data[chunk.len()..padded].fill(0);

                if capture_vector && cursor.transfer_progress == 0 && chunk.len() >= 4 {
                    cursor.reset_vector =
                        Some(u32::from_le_bytes([data[0], data[1], data[2], data[3]]));
                }

                let mut sent = 0;
                while sent < padded {
                    if self.abort.is_aborted() {
                        warn!(
                            "{:?} download aborted at {} of {} bytes",
                            cursor.resource, cursor.transfer_progress, cursor.image_size
                        );
                        return Err(ErrorCode::UNFINISHED);
                    }
                    let target = address
                        .checked_add(sent as u32)
                        .ok_or(ErrorCode::PARAMETER)?;
                    let len = backplane.segment_len(target, padded - sent);
                    backplane.transfer_segment(
                        BusDirection::Write,
                        target,
                        &mut buffer.data_mut()[sent..sent + len],
                    )?;
                    sent += len;
                }

                address = address
                    .checked_add(chunk.len() as u32)
                    .ok_or(ErrorCode::PARAMETER)?;
                cursor.transfer_progress += chunk.len() as u32;
            }
            cursor.blocks_transferred += 1;
            if CONFIG.debug_download {
                debug!(
                    "{:?} block {}/{} ({} bytes)",
                    cursor.resource,
                    index + 1,
                    block_count,
                    cursor.transfer_progress
                );
            }
        }

        if cursor.transfer_progress != cursor.image_size {
            warn!(
                "{:?} source ended after {} of {} bytes",
                cursor.resource, cursor.transfer_progress, cursor.image_size
            );
            return Err(ErrorCode::NORESOURCE);
        }
        Ok(())
    }
}
