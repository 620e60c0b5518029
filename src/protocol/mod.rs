// Copyright lowRISC contributors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! The bootloader protocol driver.
//!
//! [`Session`] is generic over [`Transport`] the same way the wire helpers
//! below are generic over their byte channel: production code plugs in
//! [`crate::transport::SerialTransport`], tests plug in a scripted double.
//! There is no explicit state machine type; "before handshake" / "after
//! handshake" / "device known" is just which fields have been populated.

pub mod opcode;
pub mod wire;

use std::thread;
use std::time::Duration;

use crate::device::DeviceParameters;
use crate::error::{Error, Result};
use crate::image::SparseImage;
use crate::transport::Transport;
use opcode::{OpCode, SupportedCommands};

/// Number of times the handshake sends the autobaud sync byte before giving
/// up: one initial send plus ten retries.
const HANDSHAKE_ATTEMPTS: u32 = 11;

/// DTR pulse width used to kick a device into bootloader mode on common
/// USB-to-serial wiring. A no-op on adapters that don't wire DTR to reset.
const DTR_PULSE: Duration = Duration::from_millis(10);

/// A live session with a bootloader, from autobaud handshake through `GO`.
pub struct Session<T: Transport> {
    transport: T,
    bootloader_version: u8,
    supported_commands: SupportedCommands,
    device: DeviceParameters,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            bootloader_version: 0,
            supported_commands: SupportedCommands::empty(),
            device: DeviceParameters::default(),
        }
    }

    /// The resolved device parameters. Placeholder defaults until
    /// [`Self::discover`] succeeds.
    pub fn device(&self) -> &DeviceParameters {
        &self.device
    }

    /// Pulses DTR, then sends the autobaud sync byte up to
    /// [`HANDSHAKE_ATTEMPTS`] times until the device ACKs.
    pub fn handshake(&mut self) -> Result<()> {
        self.transport.set_dtr(true)?;
        thread::sleep(DTR_PULSE);
        self.transport.set_dtr(false)?;
        thread::sleep(DTR_PULSE);

        for attempt in 1..=HANDSHAKE_ATTEMPTS {
            self.transport.write_all(&[wire::AUTOBAUD_SYNC])?;
            self.transport.flush()?;
            let mut buf = [0u8; 1];
            if self.transport.read_exact(&mut buf).is_ok() && buf[0] == wire::ACK {
                log::debug!("autobaud handshake succeeded on attempt {attempt}");
                return Ok(());
            }
        }
        Err(Error::NotDetected)
    }

    /// Runs `GET_VERSION` then `GET_ID`, and resolves the device table.
    pub fn discover(&mut self) -> Result<()> {
        self.get_version()?;
        let product_id = self.get_id()?;
        self.device =
            DeviceParameters::lookup(product_id, self.bootloader_version, self.supported_commands)
                .ok_or(Error::UnsupportedDevice(product_id))?;
        log::info!("discovered device: {}", self.device);
        Ok(())
    }

    fn get_version(&mut self) -> Result<()> {
        wire::send_command(&mut self.transport, OpCode::GetVersion)?;
        let mut header = [0u8; 2];
        self.transport.read_exact(&mut header)?;
        let opcode_count = header[0] as usize;
        let mut opcodes = vec![0u8; opcode_count];
        self.transport.read_exact(&mut opcodes)?;
        wire::read_ack(&mut self.transport)?;

        self.bootloader_version = header[1];
        self.supported_commands = SupportedCommands::from_bytes(&opcodes);
        Ok(())
    }

    fn get_id(&mut self) -> Result<u16> {
        wire::send_command(&mut self.transport, OpCode::GetId)?;
        let mut len_byte = [0u8; 1];
        self.transport.read_exact(&mut len_byte)?;
        if len_byte[0] != 1 {
            return Err(Error::MalformedIdResponse(len_byte[0]));
        }
        let mut id_bytes = [0u8; 2];
        self.transport.read_exact(&mut id_bytes)?;
        wire::read_ack(&mut self.transport)?;
        Ok(u16::from_be_bytes(id_bytes))
    }

    /// Erases `count` pages starting at `first`. A no-op when `count` is 0.
    ///
    /// Prefers the legacy `ERASE` command when advertised, falling back to
    /// `EXTENDED_ERASE`; fails with [`Error::CommandUnsupported`] if neither
    /// is advertised.
    pub fn erase_pages(&mut self, first: u32, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        if self.supports(OpCode::Erase) {
            if count > 256 {
                return Err(Error::InvalidArgument(format!(
                    "legacy ERASE supports at most 256 pages, got {count}"
                )));
            }
            let pages: Vec<u8> = (first..first + count).map(|p| p as u8).collect();
            self.send_legacy_erase(&pages)
        } else if self.supports(OpCode::ExtendedErase) {
            if count > 0xFFF0 {
                return Err(Error::InvalidArgument(format!(
                    "EXTENDED_ERASE supports at most 0xFFF0 pages, got {count}"
                )));
            }
            let pages: Vec<u16> = (first..first + count).map(|p| p as u16).collect();
            self.send_extended_erase(&pages)
        } else {
            Err(Error::CommandUnsupported("ERASE/EXTENDED_ERASE"))
        }
    }

    /// Attempts the device's global-erase form; on NACK, falls back to
    /// erasing every page individually.
    pub fn erase_all(&mut self) -> Result<()> {
        let total_pages = self.device.total_pages();
        let acked = if self.supports(OpCode::Erase) {
            self.send_legacy_global_erase()?
        } else if self.supports(OpCode::ExtendedErase) {
            self.send_extended_global_erase()?
        } else {
            return Err(Error::CommandUnsupported("ERASE/EXTENDED_ERASE"));
        };

        if acked {
            thread::sleep(Duration::from_micros(self.device.erase_delay_us));
            return Ok(());
        }
        log::warn!("device NACKed global erase, falling back to page-by-page erase");
        self.erase_pages(0, total_pages)
    }

    fn send_legacy_erase(&mut self, pages: &[u8]) -> Result<()> {
        wire::send_command(&mut self.transport, OpCode::Erase)
            .map_err(|e| Error::EraseFailed(e.to_string()))?;
        let count = (pages.len() - 1) as u8;
        let mut checksum = wire::Checksum::new();
        checksum.update(count);
        checksum.update_slice(pages);
        self.transport.write_all(&[count])?;
        self.transport.write_all(pages)?;
        self.transport.write_all(&[checksum.value()])?;
        self.transport.flush()?;
        wire::read_ack(&mut self.transport).map_err(|e| Error::EraseFailed(e.to_string()))
    }

    fn send_legacy_global_erase(&mut self) -> Result<bool> {
        wire::send_command(&mut self.transport, OpCode::Erase)
            .map_err(|e| Error::EraseFailed(e.to_string()))?;
        // Global erase is a sentinel frame: count byte 0xFF, checksum fixed
        // at 0x00 rather than XORed.
        self.transport.write_all(&[0xFF, 0x00])?;
        self.transport.flush()?;
        Ok(wire::read_ack_or_nack(&mut self.transport)?)
    }

    fn send_extended_erase(&mut self, pages: &[u16]) -> Result<()> {
        wire::send_command(&mut self.transport, OpCode::ExtendedErase)
            .map_err(|e| Error::EraseFailed(e.to_string()))?;
        let count = (pages.len() - 1) as u16;
        let mut checksum = wire::Checksum::new();
        let count_bytes = count.to_be_bytes();
        checksum.update_slice(&count_bytes);
        self.transport.write_all(&count_bytes)?;
        for &page in pages {
            let page_bytes = page.to_be_bytes();
            checksum.update_slice(&page_bytes);
            self.transport.write_all(&page_bytes)?;
        }
        self.transport.write_all(&[checksum.value()])?;
        self.transport.flush()?;
        wire::read_ack(&mut self.transport).map_err(|e| Error::EraseFailed(e.to_string()))
    }

    fn send_extended_global_erase(&mut self) -> Result<bool> {
        wire::send_command(&mut self.transport, OpCode::ExtendedErase)
            .map_err(|e| Error::EraseFailed(e.to_string()))?;
        self.transport.write_all(&[0xFF, 0xFF, 0x00])?;
        self.transport.flush()?;
        Ok(wire::read_ack_or_nack(&mut self.transport)?)
    }

    /// Streams `image` to the device in up-to-256-byte chunks that never
    /// cross a block boundary, pacing each chunk by `write_delay_us`.
    pub fn write_image(&mut self, image: &mut SparseImage) -> Result<()> {
        if !self.supports(OpCode::WriteMem) {
            return Err(Error::CommandUnsupported("WRITE_MEM"));
        }
        image.rewind();
        loop {
            let Some(addr) = image.current_address() else {
                break;
            };
            let chunk = image.read(wire::MAX_BLOCK_LEN);
            if chunk.is_empty() {
                break;
            }
            if addr % 4 != 0 {
                return Err(Error::InvalidArgument(format!(
                    "write address 0x{addr:08x} is not 4-byte aligned"
                )));
            }
            let addr = addr as u32;
            wire::send_command(&mut self.transport, OpCode::WriteMem)
                .map_err(|e| Error::WriteFailed(e.to_string()))?;
            wire::send_address(&mut self.transport, addr)
                .map_err(|e| Error::WriteFailed(e.to_string()))?;
            wire::send_data_block(&mut self.transport, &chunk)
                .map_err(|e| Error::WriteFailed(e.to_string()))?;
            thread::sleep(Duration::from_micros(self.device.write_delay_us));
        }
        Ok(())
    }

    /// Reads `image`'s address ranges back from the device and compares
    /// byte-for-byte, failing on the first mismatch.
    pub fn verify_image(&mut self, image: &mut SparseImage) -> Result<()> {
        if !self.supports(OpCode::ReadMem) {
            return Err(Error::CommandUnsupported("READ_MEM"));
        }
        image.rewind();
        loop {
            let Some(addr) = image.current_address() else {
                break;
            };
            let expected = image.read(wire::MAX_BLOCK_LEN);
            if expected.is_empty() {
                break;
            }
            wire::send_command(&mut self.transport, OpCode::ReadMem)
                .map_err(|e| Error::VerifyFailed(e.to_string()))?;
            wire::send_address(&mut self.transport, addr as u32)
                .map_err(|e| Error::VerifyFailed(e.to_string()))?;
            let mut actual = vec![0u8; expected.len()];
            wire::read_data_block(&mut self.transport, &mut actual)
                .map_err(|e| Error::VerifyFailed(e.to_string()))?;

            if let Some(i) = mismatch_index(&expected, &actual) {
                return Err(Error::VerifyFailed(format!(
                    "readback mismatch at address 0x{:08x}",
                    addr + i as u64
                )));
            }
        }
        Ok(())
    }

    /// Sends `GO` at `addr`, handing control to user code. The session is
    /// unusable afterward.
    pub fn go(&mut self, addr: u32) -> Result<()> {
        if addr % 4 != 0 {
            return Err(Error::InvalidArgument(format!(
                "go address 0x{addr:08x} is not 4-byte aligned"
            )));
        }
        wire::send_command(&mut self.transport, OpCode::Go)?;
        wire::send_address(&mut self.transport, addr)
    }

    fn supports(&self, op: OpCode) -> bool {
        self.device.supported_commands.contains(op)
    }
}

fn mismatch_index(expected: &[u8], actual: &[u8]) -> Option<usize> {
    expected.iter().zip(actual).position(|(a, b)| a != b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::ScriptedTransport;

    fn device_with(commands: &[OpCode]) -> DeviceParameters {
        let mut supported = SupportedCommands::empty();
        for &op in commands {
            supported.insert(op);
        }
        DeviceParameters {
            bootloader_version: 0x22,
            supported_commands: supported,
            flash_begin: 0,
            flash_end: 0x800,
            page_size: 0x100,
            pages_per_sector: 4,
            erase_delay_us: 0,
            write_delay_us: 0,
        }
    }

    #[test]
    fn handshake_happy_path_no_retry() {
        let mut session = Session::new(ScriptedTransport::with_script(&[wire::ACK]));
        session.handshake().unwrap();
        assert_eq!(session.transport.written, vec![wire::AUTOBAUD_SYNC]);
        assert_eq!(session.transport.dtr_history, vec![true, false]);
    }

    #[test]
    fn handshake_retries_then_succeeds() {
        // three non-ACK bytes, then ACK on the fourth send
        let mut session =
            Session::new(ScriptedTransport::with_script(&[0x00, 0x00, 0x00, wire::ACK]));
        session.handshake().unwrap();
        assert_eq!(session.transport.written.len(), 4);
    }

    #[test]
    fn handshake_gives_up_after_eleven_attempts() {
        let mut session = Session::new(ScriptedTransport::with_script(&[0x00; 11]));
        let err = session.handshake().unwrap_err();
        assert!(matches!(err, Error::NotDetected));
        assert_eq!(session.transport.written.len(), 11);
    }

    #[test]
    fn discover_resolves_med_density_device_parameters() {
        let mut script = vec![wire::ACK]; // GET_VERSION command ack
        script.push(0x0B); // opcode count
        script.push(0x22); // bootloader version byte
        script.extend_from_slice(&[0x00, 0x01, 0x02, 0x11, 0x21, 0x31, 0x43, 0x63, 0x73, 0x82, 0x92]);
        script.push(wire::ACK); // GET_VERSION trailer ack
        script.push(wire::ACK); // GET_ID command ack
        script.push(0x01); // id length byte
        script.extend_from_slice(&[0x04, 0x10]); // product id 0x0410
        script.push(wire::ACK); // GET_ID trailer ack

        let mut session = Session::new(ScriptedTransport::with_script(&script));
        session.discover().unwrap();

        assert_eq!(session.device().flash_end, 0x0802_0000);
        assert_eq!(session.device().page_size, 1024);
        assert!(session.device().supported_commands.contains(OpCode::Erase));
        assert!(!session.device().supported_commands.contains(OpCode::ExtendedErase));
    }

    #[test]
    fn erase_three_pages_legacy_frame_matches_checksum() {
        let mut session = Session::new(ScriptedTransport::with_script(&[wire::ACK, wire::ACK]));
        session.device = device_with(&[OpCode::Erase]);
        session.erase_pages(0, 3).unwrap();

        let w = &session.transport.written;
        assert_eq!(w[0], 0x43);
        assert_eq!(w[1], !0x43u8);
        assert_eq!(w[2], 0x02); // count = pages - 1
        assert_eq!(&w[3..6], &[0x00, 0x01, 0x02]);
        assert_eq!(w[6], 0x02 ^ 0x00 ^ 0x01 ^ 0x02); // == 0x01
    }

    #[test]
    fn global_extended_erase_nack_falls_back_to_page_erase() {
        let mut script = vec![wire::ACK]; // global extended erase command ack
        script.push(wire::NACK); // device refuses global erase
        script.push(wire::ACK); // fallback extended erase command ack
        script.push(wire::ACK); // fallback extended erase data ack

        let mut session = Session::new(ScriptedTransport::with_script(&script));
        session.device = device_with(&[OpCode::ExtendedErase]); // 8 pages total
        session.erase_all().unwrap();

        // 2 command frames (opcode+complement) x 2 bytes, plus the global
        // frame (0xFF,0xFF,0x00) and the fallback frame for 8 pages.
        let w = &session.transport.written;
        assert_eq!(&w[0..2], &[0x44, !0x44u8]);
        assert_eq!(&w[2..5], &[0xFF, 0xFF, 0x00]);
        assert_eq!(&w[5..7], &[0x44, !0x44u8]);
        assert_eq!(&w[7..9], &0x0007u16.to_be_bytes()); // count = 8 pages - 1
    }

    #[test]
    fn write_300_byte_image_splits_into_two_chunks() {
        let mut session = Session::new(ScriptedTransport::with_script(&[wire::ACK; 6]));
        session.device = {
            let mut d = device_with(&[OpCode::WriteMem]);
            d.flash_begin = 0x0800_0000;
            d
        };
        let mut image = SparseImage::new();
        image.insert(crate::image::MemBlock::new(0x0800_0000, vec![0xAAu8; 300]));

        session.write_image(&mut image).unwrap();

        let w = &session.transport.written;
        // first WRITE_MEM frame: command(2) + address(5) + block(1+256+0+1)
        assert_eq!(&w[0..2], &[0x31, !0x31u8]);
        assert_eq!(&w[2..6], &0x0800_0000u32.to_be_bytes());
        assert_eq!(w[7], 0xFF); // N for a full 256-byte block
        let second_frame_start = 2 + 5 + 258;
        assert_eq!(&w[second_frame_start..second_frame_start + 2], &[0x31, !0x31u8]);
        let second_addr_start = second_frame_start + 2;
        assert_eq!(
            &w[second_addr_start..second_addr_start + 4],
            &0x0800_0100u32.to_be_bytes()
        );
        assert_eq!(w[second_addr_start + 5], 43); // N = 44 - 1, no padding
    }

    #[test]
    fn verify_fails_on_first_byte_mismatch_after_one_round_trip() {
        let mut good = vec![0xAAu8; 256];
        good[17] = 0xAB;
        // READ_MEM command ack, address-frame ack, length-prefix ack
        let mut script = vec![wire::ACK, wire::ACK, wire::ACK];
        script.extend_from_slice(&good);

        let mut session = Session::new(ScriptedTransport::with_script(&script));
        session.device = device_with(&[OpCode::ReadMem]);
        let mut image = SparseImage::new();
        image.insert(crate::image::MemBlock::new(0, vec![0xAAu8; 256]));

        let err = session.verify_image(&mut image).unwrap_err();
        assert!(matches!(err, Error::VerifyFailed(_)));
        // exactly one READ_MEM round-trip: command(2) + address(5) + length-prefix(2)
        assert_eq!(session.transport.written.len(), 2 + 5 + 2);
    }
}
