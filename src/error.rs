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

//! Error taxonomy for the programmer.

use std::io;

/// Errors surfaced by the CLI, protocol driver, and orchestrator.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad CLI usage.
    #[error("{0}")]
    Argument(String),

    /// Serial open/read/write failure, or a short read/write.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Handshake exceeded its retry budget.
    #[error("no bootloader detected (autobaud handshake failed)")]
    NotDetected,

    /// GET_ID missing, malformed, or returned an unknown product id.
    #[error("unsupported device (product id 0x{0:04x})")]
    UnsupportedDevice(u16),

    /// GET_ID's id-length byte was not the expected value.
    #[error("unexpected GET_ID response (id length byte was {0}, expected 1)")]
    MalformedIdResponse(u8),

    /// A required opcode is absent from the device's advertised command set.
    #[error("device does not support the {0} command")]
    CommandUnsupported(&'static str),

    /// Erase count out of range, or an unaligned address.
    #[error("{0}")]
    InvalidArgument(String),

    /// NACK or protocol violation while writing.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// NACK or protocol violation while erasing.
    #[error("erase failed: {0}")]
    EraseFailed(String),

    /// Read-back mismatch, or protocol violation while verifying.
    #[error("verify failed: {0}")]
    VerifyFailed(String),

    /// Firmware file could not be opened or read.
    #[error("failed to read firmware file {path}: {source}")]
    FileError {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The device responded with a byte that is neither ACK nor NACK.
    #[error("unexpected response byte 0x{0:02x} from bootloader")]
    UnexpectedResponse(u8),

    /// The device NACKed a command.
    #[error("bootloader NACKed the command")]
    Nack,
}

pub type Result<T> = std::result::Result<T, Error>;
