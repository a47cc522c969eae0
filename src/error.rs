//! Errno-oriented error type shared by every layer.
//!
//! The wire protocol (OBEX response codes, transport failures) maps onto
//! POSIX errno values rather than a bespoke error hierarchy, following the
//! rest of this stack's habit of speaking directly in terms of the errno
//! space a FUSE-style host expects back.

use std::fmt;
use std::io;

/// An error carrying a raw errno plus a short description of where it came
/// from (a response byte, a timeout, a malformed header, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    errno: libc::c_int,
    context: &'static str,
}

impl Error {
    /// Builds an error from a raw errno value.
    pub const fn new(errno: libc::c_int, context: &'static str) -> Self {
        Self { errno, context }
    }

    /// I/O failure: CRC mismatch, dropped ACK, short read after retries.
    pub const fn io(context: &'static str) -> Self {
        Self::new(libc::EIO, context)
    }

    /// Malformed OBEX response (response byte below 0x30, bad header).
    pub const fn protocol(context: &'static str) -> Self {
        Self::new(libc::EPROTO, context)
    }

    /// The raw errno value this error carries.
    pub const fn errno(&self) -> libc::c_int {
        self.errno
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({})",
            self.context,
            io::Error::from_raw_os_error(self.errno)
        )
    }
}

impl std::error::Error for Error {}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        io::Error::from_raw_os_error(e.errno)
    }
}

/// Maps the top-7 bits of an OBEX response byte to an errno, following the
/// original `geterrno` response table.
pub fn errno_for_response(response: u8) -> libc::c_int {
    let code = response & 0x7F;
    if code < 0x30 {
        return libc::EPROTO;
    }
    match code {
        0x40 => libc::EINVAL,
        0x41 => libc::EACCES,
        0x43 => libc::EACCES,
        0x44 => libc::ENOENT,
        0x45 => libc::EINVAL,
        0x46 => libc::EPERM,
        0x48 => libc::ETIMEDOUT,
        0x49 => libc::EINVAL,
        0x4D => libc::EFBIG,
        0x4F => libc::EIO,
        0x50 => libc::EIO,
        0x51 => libc::ENOSYS,
        0x53 => libc::ENODEV,
        0x60 => libc::ENOSPC,
        0x61 => libc::EBUSY,
        _ => libc::EIO,
    }
}

/// `true` for the OBEX final-success response (`0xA0`).
pub const fn is_success(response: u8) -> bool {
    response == 0xA0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_table() {
        let cases: &[(u8, libc::c_int)] = &[
            (0x40, libc::EINVAL),
            (0x41, libc::EACCES),
            (0x43, libc::EACCES),
            (0x44, libc::ENOENT),
            (0x45, libc::EINVAL),
            (0x46, libc::EPERM),
            (0x48, libc::ETIMEDOUT),
            (0x49, libc::EINVAL),
            (0x4D, libc::EFBIG),
            (0x4F, libc::EIO),
            (0x50, libc::EIO),
            (0x51, libc::ENOSYS),
            (0x53, libc::ENODEV),
            (0x60, libc::ENOSPC),
            (0x61, libc::EBUSY),
        ];
        for &(resp, expected) in cases {
            assert_eq!(errno_for_response(resp), expected, "response {resp:#x}");
            assert_eq!(errno_for_response(resp | 0x80), expected);
        }
    }

    #[test]
    fn below_0x30_is_protocol_violation() {
        assert_eq!(errno_for_response(0x10), libc::EPROTO);
        assert_eq!(errno_for_response(0x2F), libc::EPROTO);
    }

    #[test]
    fn unmapped_is_eio() {
        assert_eq!(errno_for_response(0x70), libc::EIO);
    }

    #[test]
    fn success_codes() {
        assert!(is_success(0xA0));
        assert!(!is_success(0x90));
        assert!(!is_success(0xA4));
    }
}
