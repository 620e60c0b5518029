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

//! The bootloader's opcode table.
//!
//! A convenience macro similar in spirit to a `wire_enum!`: it generates a
//! plain C-like enum together with a `from_wire_value`/`to_wire_value` pair,
//! so opcode <-> byte conversion is a straight match rather than a
//! fall-through switch.

macro_rules! opcode_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident {
        $($(#[$meta_variant:meta])* $variant:ident = $value:literal,)*
    }) => {
        $(#[$meta])*
        #[repr(u8)]
        #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
        $vis enum $name {
            $(
                $(#[$meta_variant])*
                $variant = $value,
            )*
        }

        impl $name {
            /// All known variants, in command-table index order.
            pub const ALL: &'static [$name] = &[
                $($name::$variant,)*
            ];

            pub const fn to_wire_value(self) -> u8 {
                self as u8
            }

            pub fn from_wire_value(wire: u8) -> Option<Self> {
                match wire {
                    $($value => Some(Self::$variant),)*
                    _ => None,
                }
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant),)*
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                write!(f, "{}", self.name())
            }
        }
    }
}

opcode_enum! {
    /// The 12 opcodes the bootloader protocol tracks.
    ///
    /// Index in [`OpCode::ALL`] is the bit position used by
    /// [`SupportedCommands`].
    pub enum OpCode {
        /// Gets the version and the list of supported commands.
        GetVersion = 0x00,
        /// Gets the bootloader version and read-protection status.
        GetReadStatus = 0x01,
        /// Gets the chip (product) ID.
        GetId = 0x02,
        /// Reads up to 256 bytes of memory.
        ReadMem = 0x11,
        /// Jumps to user code.
        Go = 0x21,
        /// Writes up to 256 bytes of memory.
        WriteMem = 0x31,
        /// Erases up to 256 pages (legacy, single-byte page indices).
        Erase = 0x43,
        /// Erases up to 0xFFF0 pages (two-byte page indices).
        ExtendedErase = 0x44,
        /// Enables write protection for some sectors.
        WriteProtect = 0x63,
        /// Disables write protection for all sectors.
        WriteUnprotect = 0x73,
        /// Enables read protection.
        ReadProtect = 0x82,
        /// Disables read protection.
        ReadUnprotect = 0x92,
    }
}

/// The device's advertised command set, as reported by `GET_VERSION`.
///
/// Backed by a `u16` bitmap indexed by the opcode's position in
/// [`OpCode::ALL`]; unknown opcodes reported by the device are silently
/// ignored rather than rejected.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct SupportedCommands(u16);

impl SupportedCommands {
    pub const fn empty() -> Self {
        Self(0)
    }

    fn bit_index(op: OpCode) -> usize {
        OpCode::ALL
            .iter()
            .position(|&candidate| candidate == op)
            .expect("OpCode::ALL contains every OpCode variant")
    }

    pub fn insert(&mut self, op: OpCode) {
        self.0 |= 1 << Self::bit_index(op);
    }

    pub fn contains(&self, op: OpCode) -> bool {
        self.0 & (1 << Self::bit_index(op)) != 0
    }

    /// Builds a command set from the raw opcode bytes `GET_VERSION` returns.
    /// Bytes that do not correspond to a known [`OpCode`] are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut set = Self::empty();
        for &byte in bytes {
            if let Some(op) = OpCode::from_wire_value(byte) {
                set.insert(op);
            }
        }
        set
    }
}
