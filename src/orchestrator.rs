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

//! Sequences a whole run: open, handshake, discover, erase, write, verify,
//! go. Thin by design -- all the interesting behavior lives in
//! [`crate::protocol::Session`] and [`crate::image::SparseImage`].

use std::fs;

use crate::cli::Args;
use crate::error::{Error, Result};
use crate::image::{MemBlock, SparseImage};
use crate::protocol::Session;
use crate::transport::{SerialTransport, Transport};

/// Runs one programming session against a real serial device, per `args`.
pub fn run(args: &Args) -> Result<()> {
    let transport = SerialTransport::open(&args.device, args.baud)?;
    run_with_transport(args, transport)
}

/// Runs one programming session over any [`Transport`], letting tests
/// substitute a scripted double for the serial port.
pub fn run_with_transport<T: Transport>(args: &Args, transport: T) -> Result<()> {
    let mut session = Session::new(transport);

    session.handshake()?;
    session.discover()?;

    let mut image = args
        .write
        .as_ref()
        .map(|path| load_raw_image(path, session.device().flash_begin))
        .transpose()?;

    if let Some(image) = image.as_mut() {
        if args.erase {
            session.erase_all()?;
        } else {
            let page_size = session.device().page_size;
            let pages_needed = div_ceil(image.total_size(), page_size as u64) as u32;
            session.erase_pages(0, pages_needed)?;
        }
        session.write_image(image)?;
        if args.verify {
            session.verify_image(image)?;
        }
    } else if args.erase {
        session.erase_all()?;
    }

    if args.run {
        session.go(session.device().flash_begin)?;
    }

    Ok(())
}

/// Loads `path` as a single contiguous RAW block and shifts it onto
/// `flash_begin`.
fn load_raw_image(path: &str, flash_begin: u32) -> Result<SparseImage> {
    let bytes = fs::read(path).map_err(|source| Error::FileError {
        path: path.to_string(),
        source,
    })?;
    let mut image = SparseImage::new();
    image.insert(MemBlock::new(0, bytes));
    image.shift(flash_begin as i64);
    Ok(image)
}

fn div_ceil(numerator: u64, denominator: u64) -> u64 {
    (numerator + denominator - 1) / denominator
}
