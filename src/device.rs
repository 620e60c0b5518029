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

//! The product-ID -> Flash layout table and the device parameters it feeds.

use crate::protocol::opcode::SupportedCommands;

/// Flash base address for every STM32 device this table knows about.
pub const FLASH_BASE: u32 = 0x0800_0000;

/// Flash layout and timing for one STM32 product family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FlashLayout {
    product_id: u16,
    flash_end: u32,
    page_size: u32,
    pages_per_sector: u32,
}

/// Device-model table, keyed by the 16-bit product ID `GET_ID` returns.
///
/// Flash base is always [`FLASH_BASE`]; `flash_end` is exclusive.
const DEVICE_TABLE: &[FlashLayout] = &[
    FlashLayout { product_id: 0x0412, flash_end: 0x0800_8000, page_size: 1024, pages_per_sector: 4 }, // low-density
    FlashLayout { product_id: 0x0410, flash_end: 0x0802_0000, page_size: 1024, pages_per_sector: 4 }, // med-density
    FlashLayout { product_id: 0x0414, flash_end: 0x0808_0000, page_size: 2048, pages_per_sector: 2 }, // hi-density
    FlashLayout { product_id: 0x0418, flash_end: 0x0804_0000, page_size: 2048, pages_per_sector: 2 }, // connectivity
    FlashLayout { product_id: 0x0420, flash_end: 0x0802_0000, page_size: 1024, pages_per_sector: 4 }, // med-value
    FlashLayout { product_id: 0x0428, flash_end: 0x0808_0000, page_size: 2048, pages_per_sector: 2 }, // hi-value
    FlashLayout { product_id: 0x0430, flash_end: 0x0810_0000, page_size: 2048, pages_per_sector: 2 }, // xl-density
    FlashLayout { product_id: 0x0436, flash_end: 0x0806_0000, page_size: 256, pages_per_sector: 16 }, // med-ulp
    FlashLayout { product_id: 0x0416, flash_end: 0x0802_0000, page_size: 256, pages_per_sector: 16 }, // hi-ulp
];

/// Flash layout, timing hints, and advertised command set for the device a
/// session is talking to.
///
/// Immutable after discovery: built once by [`DeviceParameters::default`]
/// (used before `GET_ID` succeeds) or [`DeviceParameters::lookup`], and
/// never mutated in place thereafter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceParameters {
    pub bootloader_version: u8,
    pub supported_commands: SupportedCommands,
    pub flash_begin: u32,
    pub flash_end: u32,
    pub page_size: u32,
    pub pages_per_sector: u32,
    pub erase_delay_us: u64,
    pub write_delay_us: u64,
}

impl Default for DeviceParameters {
    /// Placeholder values used before `GET_ID` succeeds.
    ///
    /// The protocol makes `GET_ID` mandatory, so in a successful session
    /// these defaults are never actually used to program a device.
    fn default() -> Self {
        Self {
            bootloader_version: 0,
            supported_commands: SupportedCommands::empty(),
            flash_begin: FLASH_BASE,
            flash_end: 0x0800_8000,
            page_size: 1024,
            pages_per_sector: 4,
            erase_delay_us: 40_000,
            write_delay_us: 80_000,
        }
    }
}

impl DeviceParameters {
    /// Resolves `product_id` against the device table, keeping whatever
    /// `bootloader_version`/`supported_commands` were already discovered via
    /// `GET_VERSION`.
    ///
    /// Returns `None` for an unknown product id; the caller reports
    /// [`crate::error::Error::UnsupportedDevice`].
    pub fn lookup(
        product_id: u16,
        bootloader_version: u8,
        supported_commands: SupportedCommands,
    ) -> Option<Self> {
        let layout = DEVICE_TABLE
            .iter()
            .find(|entry| entry.product_id == product_id)?;
        Some(Self {
            bootloader_version,
            supported_commands,
            flash_begin: FLASH_BASE,
            flash_end: layout.flash_end,
            page_size: layout.page_size,
            pages_per_sector: layout.pages_per_sector,
            erase_delay_us: 40_000,
            write_delay_us: 80_000,
        })
    }

    /// Total number of erasable pages in Flash.
    pub fn total_pages(&self) -> u32 {
        (self.flash_end - self.flash_begin) / self.page_size
    }
}

impl std::fmt::Display for DeviceParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "bootloader v{}.{}, flash 0x{:08x}..0x{:08x} ({} x {}-byte pages)",
            self.bootloader_version >> 4,
            self.bootloader_version & 0x0F,
            self.flash_begin,
            self.flash_end,
            self.total_pages(),
            self.page_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn med_density_lookup_matches_datasheet_values() {
        let params = DeviceParameters::lookup(0x0410, 0x34, SupportedCommands::empty()).unwrap();
        assert_eq!(params.flash_end, 0x0802_0000);
        assert_eq!(params.page_size, 1024);
        assert_eq!(params.bootloader_version >> 4, 3);
        assert_eq!(params.bootloader_version & 0x0F, 4);
    }

    #[test]
    fn unknown_product_id_is_none() {
        assert!(DeviceParameters::lookup(0xFFFF, 0, SupportedCommands::empty()).is_none());
    }

    #[test]
    fn total_pages_is_exact_for_every_entry() {
        for &(id, _, _) in &[
            (0x0412u16, 8u32, 1024u32),
            (0x0410, 32, 1024),
            (0x0414, 256, 2048),
            (0x0418, 128, 2048),
            (0x0420, 32, 1024),
            (0x0428, 256, 2048),
            (0x0430, 512, 2048),
            (0x0436, 384, 256),
            (0x0416, 128, 256),
        ] {
            let params = DeviceParameters::lookup(id, 0, SupportedCommands::empty()).unwrap();
            assert_eq!((params.flash_end - params.flash_begin) % params.page_size, 0);
        }
    }
}
