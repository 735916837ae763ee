// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Standard error enum for the WHD integration layer.
//!
//! Every fallible operation in this crate returns `Result<T, ErrorCode>`. The
//! set of codes is closed and carries no message strings: callers that need
//! the raw sentinel (for example a C network stack) can convert an
//! [`ErrorCode`] into its negative `i32` value.
//!
//! The socket-facing codes reuse the values of the embedding network-socket
//! API (`-3001` and up); the driver-facing codes live in their own `-4000`
//! range so that both can travel through the same return path.

use core::convert::TryFrom;

/// Errors of the WHD bus, buffer and socket layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// Generic failure condition
    FAIL = -1,

    /// Operation would block; the only error with built-in retry logic
    WOULDBLOCK = -3001,
    /// Operation or command is unsupported for this socket kind
    UNSUPPORTED = -3002,
    /// An invalid parameter was passed
    PARAMETER = -3003,
    /// Socket is not open, or was closed while the call was in progress
    NOSOCKET = -3005,
    /// No peer address is set for an operation that needs one
    NOADDRESS = -3006,
    /// Memory required not available (permanent, not retryable)
    NOMEM = -3007,
    /// Host name lookup failed
    DNSFAILURE = -3009,

    /// A buffer front/back adjustment would leave negative space
    UNDERFLOW = -4001,
    /// A requested size exceeds the underlying allocation
    SIZE = -4002,
    /// Resource image is missing or its metadata could not be read
    NORESOURCE = -4003,
    /// Download was aborted before completion
    UNFINISHED = -4004,
    /// Bus or chip error, including reset vector verification failures
    SDIO = -4005,
    /// The component is powered down
    OFF = -4006,
}

impl From<ErrorCode> for i32 {
    fn from(err: ErrorCode) -> i32 {
        err as i32
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = ();

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(ErrorCode::FAIL),
            -3001 => Ok(ErrorCode::WOULDBLOCK),
            -3002 => Ok(ErrorCode::UNSUPPORTED),
            -3003 => Ok(ErrorCode::PARAMETER),
            -3005 => Ok(ErrorCode::NOSOCKET),
            -3006 => Ok(ErrorCode::NOADDRESS),
            -3007 => Ok(ErrorCode::NOMEM),
            -3009 => Ok(ErrorCode::DNSFAILURE),
            -4001 => Ok(ErrorCode::UNDERFLOW),
            -4002 => Ok(ErrorCode::SIZE),
            -4003 => Ok(ErrorCode::NORESOURCE),
            -4004 => Ok(ErrorCode::UNFINISHED),
            -4005 => Ok(ErrorCode::SDIO),
            -4006 => Ok(ErrorCode::OFF),
            _ => Err(()),
        }
    }
}

/// Convert a `Result<usize, ErrorCode>` into the signed return convention of
/// the socket API: byte counts on success, negative sentinels on failure.
pub fn into_retval(res: Result<usize, ErrorCode>) -> isize {
    match res {
        Ok(n) => n as isize,
        Err(e) => i32::from(e) as isize,
    }
}
