//! Blocking serial I/O with a termios-style inter-byte timeout.
//!
//! [`SerialPort`] is the only thing in this crate that talks to a real
//! device node. Everything above it is written against the [`SerialIo`]
//! trait so tests can substitute an in-memory pipe, per the transport's
//! design notes.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use log::debug;
use nix::sys::termios::{self, BaudRate, SetArg, SpecialCharacterIndices, Termios};

/// What the transport layer needs from a serial line: blocking,
/// short-read-on-timeout RX/TX plus the handful of line-discipline knobs
/// AT dialog and speed negotiation depend on.
pub trait SerialIo: std::fmt::Debug {
    /// Reads up to `buf.len()` bytes, blocking until at least one byte
    /// arrives or the inter-byte timeout elapses. Returns the number of
    /// bytes actually read (may be 0 on timeout, and may be less than
    /// `buf.len()` even without a timeout).
    fn rx(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes all of `buf`, blocking as needed. Returns the number of
    /// bytes actually written before a short write or error.
    fn tx(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Re-opens/re-initialises the port with its stored speed and
    /// timeout, in "raw" 8N1 mode with no modem control.
    fn restore(&mut self) -> io::Result<()>;

    /// Changes the line speed. Unknown baud rates are rejected with
    /// `EINVAL`.
    fn set_speed(&mut self, baud: u32) -> io::Result<()>;

    /// Current line speed in baud.
    fn speed(&self) -> u32;

    /// Changes the inter-byte read timeout, in deciseconds (termios
    /// `VTIME` units).
    fn set_timeout(&mut self, deciseconds: u8) -> io::Result<()>;

    /// Current inter-byte read timeout, in deciseconds.
    fn timeout(&self) -> u8;

    /// Drains a short break and releases the underlying handle.
    fn close(self: Box<Self>);
}

fn baud_rate(baud: u32) -> io::Result<BaudRate> {
    use nix::sys::termios::BaudRate::*;
    Ok(match baud {
        2400 => B2400,
        9600 => B9600,
        19200 => B19200,
        38400 => B38400,
        57600 => B57600,
        115200 => B115200,
        230400 => B230400,
        _ => return Err(io::Error::from_raw_os_error(libc::EINVAL)),
    })
}

/// A real serial device node (e.g. `/dev/ttyACM0`, `/dev/rfcomm0`).
#[derive(Debug)]
pub struct SerialPort {
    device: CString,
    fd: OwnedFd,
    speed: u32,
    timeout: u8,
}

impl SerialPort {
    const DEFAULT_SPEED: u32 = 19200;
    const DEFAULT_TIMEOUT: u8 = 30;

    /// Opens `device` exclusively, read-write, without making it the
    /// controlling terminal. Does not touch line settings; call
    /// [`SerialIo::restore`] before using the port.
    pub fn open(device: &str) -> io::Result<Self> {
        let path = CString::new(device).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        let fd = nix::fcntl::open(
            path.as_c_str(),
            nix::fcntl::OFlag::O_RDWR | nix::fcntl::OFlag::O_NOCTTY | nix::fcntl::OFlag::O_EXCL,
            nix::sys::stat::Mode::empty(),
        )
        .map_err(io::Error::from)?;
        debug!("opened serial port {device}");
        Ok(Self {
            device: path,
            fd,
            speed: Self::DEFAULT_SPEED,
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    fn borrowed(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl SerialIo for SerialPort {
    fn rx(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match nix::unistd::read(self.borrowed(), &mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn tx(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match nix::unistd::write(self.borrowed(), &buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn restore(&mut self) -> io::Result<()> {
        let fd = nix::fcntl::open(
            self.device.as_c_str(),
            nix::fcntl::OFlag::O_RDWR | nix::fcntl::OFlag::O_NOCTTY | nix::fcntl::OFlag::O_EXCL,
            nix::sys::stat::Mode::empty(),
        )
        .map_err(io::Error::from)?;
        self.fd = fd;

        let mut tio: Termios = termios::tcgetattr(self.borrowed())?;
        termios::cfmakeraw(&mut tio);
        tio.control_flags.set(termios::ControlFlags::PARODD, true);
        tio.control_flags.set(termios::ControlFlags::HUPCL, true);
        tio.control_flags.set(termios::ControlFlags::CLOCAL, true);
        tio.control_flags.set(termios::ControlFlags::CREAD, true);
        tio.control_flags
            .remove(termios::ControlFlags::CSIZE);
        tio.control_flags.insert(termios::ControlFlags::CS8);
        tio.input_flags.insert(
            termios::InputFlags::IGNPAR | termios::InputFlags::IGNBRK,
        );
        tio.output_flags = termios::OutputFlags::empty();
        tio.local_flags = termios::LocalFlags::empty();
        tio.control_chars[SpecialCharacterIndices::VTIME as usize] = self.timeout;
        tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        termios::cfsetspeed(&mut tio, baud_rate(self.speed)?)?;
        termios::tcflush(self.borrowed(), termios::FlushArg::TCIOFLUSH)?;
        termios::tcsetattr(self.borrowed(), SetArg::TCSANOW, &tio)?;
        Ok(())
    }

    fn set_speed(&mut self, baud: u32) -> io::Result<()> {
        let rate = baud_rate(baud)?;
        let mut tio = termios::tcgetattr(self.borrowed())?;
        termios::cfsetspeed(&mut tio, rate)?;
        termios::tcsetattr(self.borrowed(), SetArg::TCSANOW, &tio)?;
        self.speed = baud;
        Ok(())
    }

    fn speed(&self) -> u32 {
        self.speed
    }

    fn set_timeout(&mut self, deciseconds: u8) -> io::Result<()> {
        let mut tio = termios::tcgetattr(self.borrowed())?;
        tio.control_chars[SpecialCharacterIndices::VTIME as usize] = deciseconds;
        termios::tcsetattr(self.borrowed(), SetArg::TCSANOW, &tio)?;
        self.timeout = deciseconds;
        Ok(())
    }

    fn timeout(&self) -> u8 {
        self.timeout
    }

    fn close(self: Box<Self>) {
        let _ = termios::tcsendbreak(self.borrowed(), 0);
        drop(self.fd);
    }
}

/// Sends `cmd` followed by `\r\n` and waits for a terminated response
/// line, for AT dialog during link discovery.
pub fn printf_line(io: &mut dyn SerialIo, cmd: &str) -> std::io::Result<()> {
    let mut line = cmd.as_bytes().to_vec();
    line.extend_from_slice(b"\r\n");
    let n = io.tx(&line)?;
    if n != line.len() {
        return Err(std::io::Error::from_raw_os_error(libc::EIO));
    }
    Ok(())
}

/// Reads one line terminated by `\n`, up to `size` bytes, as `comm_getline`
/// does: blocks byte-by-byte on the port's timeout, stops at `\n` or a
/// short read.
pub fn getline(io: &mut dyn SerialIo, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(size.min(256));
    let mut one = [0u8; 1];
    while buf.len() < size {
        let n = io.rx(&mut one)?;
        if n == 0 {
            break;
        }
        buf.push(one[0]);
        if one[0] == b'\n' {
            break;
        }
    }
    Ok(buf)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::SerialIo;
    use std::collections::VecDeque;
    use std::io;

    /// An in-memory loopback-style fixture standing in for a real port:
    /// bytes written by the code under test go to `sent`; bytes queued in
    /// `to_read` are handed back by `rx`, one scripted chunk at a time,
    /// with 0 returned (a timeout) once the queue is drained.
    #[derive(Debug, Default)]
    pub struct FakePort {
        pub sent: Vec<u8>,
        pub to_read: VecDeque<Vec<u8>>,
        pub speed: u32,
        pub timeout: u8,
    }

    impl FakePort {
        pub fn new() -> Self {
            Self {
                speed: 19200,
                timeout: 30,
                ..Default::default()
            }
        }

        pub fn queue(&mut self, bytes: impl Into<Vec<u8>>) {
            self.to_read.push_back(bytes.into());
        }
    }

    impl SerialIo for FakePort {
        fn rx(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(mut chunk) = self.to_read.pop_front() else {
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.to_read.push_front(chunk.split_off(n));
            }
            Ok(n)
        }

        fn tx(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn restore(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn set_speed(&mut self, baud: u32) -> io::Result<()> {
            super::baud_rate(baud)?;
            self.speed = baud;
            Ok(())
        }

        fn speed(&self) -> u32 {
            self.speed
        }

        fn set_timeout(&mut self, deciseconds: u8) -> io::Result<()> {
            self.timeout = deciseconds;
            Ok(())
        }

        fn timeout(&self) -> u8 {
            self.timeout
        }

        fn close(self: Box<Self>) {}
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakePort;
    use super::*;

    #[test]
    fn getline_stops_at_newline() {
        let mut p = FakePort::new();
        p.queue(*b"O");
        p.queue(*b"K\r\n");
        let line = getline(&mut p, 254).unwrap();
        assert_eq!(line, b"OK\r\n");
    }

    #[test]
    fn getline_short_read_on_timeout() {
        let mut p = FakePort::new();
        p.queue(*b"OK");
        let line = getline(&mut p, 254).unwrap();
        assert_eq!(line, b"OK");
    }

    #[test]
    fn rejects_unknown_baud() {
        let mut p = FakePort::new();
        assert!(p.set_speed(460_000).is_err());
    }
}
