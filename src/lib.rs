//! Virtual filesystem access to a Siemens mobile phone's file area over a
//! serial OBEX link.
//!
//! The phone speaks OBEX over one of two link layers depending on model:
//! BFB (a framed, CRC-checked, ACK'd protocol) or QWE3 (raw datagrams with
//! no framing at all). [`transport::TransportConn`] picks between them and
//! presents a single reliable byte-oriented `send`/`recv` interface to
//! [`obex::ObexSession`], which drives the connect handshake, directory
//! navigation, and GET/PUT object transfers that [`fs::FsState`] exposes as
//! a path-based filesystem through the [`fs::PhoneFilesystem`] trait.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod charset;
pub mod config;
mod crc;
pub mod error;
pub mod fs;
pub mod obex;
pub mod serial;
pub mod transport;

pub use charset::Charset;
pub use config::FsConfig;
pub use error::errno_for_response;
pub use fs::{FileAttr, FsState, OpenMode, PhoneFilesystem, StatFs};
pub use obex::{DirEntry, ObexSession};
pub use serial::{SerialIo, SerialPort};
