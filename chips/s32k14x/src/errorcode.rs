// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Error codes returned by the DMA engine and its peripheral adapters.

/// Errors reported by driver operations.
///
/// Every failure is detected synchronously and returned; nothing is retried
/// internally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum ErrorCode {
    /// Invalid channel, empty or undersized buffer, out of range loop count,
    /// or a peripheral without a DMA request slot.
    FAIL = 1,
    /// A bounded wait ran out of iterations before the hardware signaled
    /// completion. The channel has been stopped.
    TIMEOUT = 2,
    /// The engine was used before `Dma::init`.
    UNINITIALIZED = 3,
}

impl From<ErrorCode> for usize {
    fn from(err: ErrorCode) -> usize {
        err as usize
    }
}

/// Status code for a driver result: `0` on success, otherwise the
/// `ErrorCode` discriminant.
pub fn into_status_code(result: Result<(), ErrorCode>) -> usize {
    match result {
        Ok(()) => 0,
        Err(err) => err.into(),
    }
}
