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

//! The serial transport collaborator.
//!
//! Framing and timing are the protocol driver's responsibility; this module
//! only provides a blocking, exact-length byte channel plus a DTR control
//! line, and a production implementation of it over the `serialport` crate.

use std::io;
use std::time::Duration;

/// Baud rates the bootloader's autobaud handshake can lock onto.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600, 115200, 230400,
];

/// A full-duplex byte channel with a DTR control line.
///
/// All reads/writes are blocking and all-or-nothing: a short read or write
/// is reported as an error rather than returning a partial length.
pub trait Transport {
    /// Reads exactly `buf.len()` bytes, or returns an error.
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Writes all of `buf`, or returns an error.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Sets the DTR control line.
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;

    /// Flushes any buffered output.
    fn flush(&mut self) -> io::Result<()>;
}

/// Read timeout applied to the underlying serial port.
///
/// Short reads past this point are reported as I/O errors; there is no
/// mid-command retry inside a protocol frame.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// A [`Transport`] backed by a real serial port via the `serialport` crate.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Opens `device` at `baud`, configured 8 data bits / even parity / 1
    /// stop bit / raw mode, per the bootloader's wire requirements.
    pub fn open(device: &str, baud: u32) -> io::Result<Self> {
        let port = serialport::new(device, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::Even)
            .stop_bits(serialport::StopBits::One)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        io::Read::read_exact(&mut self.port, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.port, buf)
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.port
            .write_data_terminal_ready(level)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.port)
    }
}
