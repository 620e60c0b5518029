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

//! Command-line surface.
//!
//! `-h`/`--help` and usage-on-error are `clap`'s own doing; the validation
//! rules that can't be expressed as `clap` constraints (at least one of
//! `-e`/`-r`/`-w`; `-v` requires `-w`) are checked explicitly in
//! [`Args::validate`].

use clap::Parser;

use crate::error::{Error, Result};
use crate::transport::SUPPORTED_BAUD_RATES;

/// STM32 USART bootloader programmer (AN3155).
#[derive(Parser, Debug)]
#[command(name = "stm32sprog", version)]
pub struct Args {
    /// Serial baud rate.
    #[arg(short = 'b', long = "baud", default_value_t = 115200)]
    pub baud: u32,

    /// Serial device path.
    #[arg(short = 'd', long = "device", default_value = "/dev/ttyUSB0")]
    pub device: String,

    /// Erase the device (global erase, or exactly the pages needed when
    /// combined with `-w`).
    #[arg(short = 'e')]
    pub erase: bool,

    /// Jump to user code after any erase/write/verify.
    #[arg(short = 'r')]
    pub run: bool,

    /// Verify the image by reading it back after writing. Requires `-w`.
    #[arg(short = 'v')]
    pub verify: bool,

    /// RAW firmware image to write.
    #[arg(short = 'w', long = "write", value_name = "FILE")]
    pub write: Option<String>,
}

impl Args {
    /// Parses `argv`-style arguments and applies the rules `clap` itself
    /// can't express.
    pub fn parse_and_validate() -> Result<Self> {
        let args = Self::try_parse().map_err(|e| Error::Argument(e.to_string()))?;
        args.validate()?;
        Ok(args)
    }

    fn validate(&self) -> Result<()> {
        if !self.erase && !self.run && self.write.is_none() {
            return Err(Error::Argument(
                "at least one of -e, -r, -w is required".to_string(),
            ));
        }
        if self.verify && self.write.is_none() {
            return Err(Error::Argument("-v requires -w".to_string()));
        }
        if !SUPPORTED_BAUD_RATES.contains(&self.baud) {
            return Err(Error::Argument(format!(
                "unsupported baud rate {}; expected one of {:?}",
                self.baud, SUPPORTED_BAUD_RATES
            )));
        }
        Ok(())
    }
}
