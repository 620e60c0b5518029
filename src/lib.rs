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

//! STM32 USART bootloader programmer (AN3155).
//!
//! The library surface exposes the protocol driver and the sparse image
//! model so both are independently testable and reusable outside the CLI
//! binary that wraps them.

pub mod cli;
pub mod device;
pub mod error;
pub mod image;
pub mod logging;
pub mod orchestrator;
pub mod protocol;
pub mod transport;

pub use error::{Error, Result};
