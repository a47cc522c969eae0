//! QWE3 link: raw OBEX packets with no framing, CRC, or sequencing. Each
//! datagram is a 3-byte header `[opcode, len_hi, len_lo]` followed by
//! `len - 3` body bytes; `send`/`recv` just move those bytes as-is.

use std::io;

use crate::serial::SerialIo;

/// Writes `buf` verbatim; QWE3 carries no framing of its own so the caller
/// is expected to have already shaped it as an OBEX packet.
pub(super) fn send(port: &mut dyn SerialIo, buf: &[u8]) -> io::Result<usize> {
    let n = port.tx(buf)?;
    if n != buf.len() {
        return Err(io::Error::from_raw_os_error(libc::EIO));
    }
    Ok(n)
}

/// Reads one raw OBEX packet: a 3-byte header giving the total length,
/// then the remaining `len - 3` body bytes.
pub(super) fn recv(port: &mut dyn SerialIo, buf: &mut [u8]) -> io::Result<usize> {
    let mut head = [0u8; 3];
    if port.rx(&mut head)? < 3 {
        return Err(io::Error::from_raw_os_error(libc::EIO));
    }
    let total = (head[1] as usize) << 8 | head[2] as usize;
    if total < 3 {
        return Err(io::Error::from_raw_os_error(libc::EIO));
    }
    let body_len = total - 3;
    if body_len + 3 > buf.len() {
        return Err(io::Error::from_raw_os_error(libc::EIO));
    }
    buf[..3].copy_from_slice(&head);
    let mut got = 0;
    while got < body_len {
        let n = port.rx(&mut buf[3 + got..3 + body_len])?;
        if n == 0 {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        got += n;
    }
    Ok(3 + body_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::test_support::FakePort;

    #[test]
    fn roundtrip() {
        let mut port = FakePort::new();
        let packet = [0x80u8, 0x00, 0x07, 0x10, 0x00, 0x20, 0x00];
        port.queue(packet.to_vec());
        let mut buf = [0u8; 32];
        let n = recv(&mut port, &mut buf).unwrap();
        assert_eq!(n, packet.len());
        assert_eq!(&buf[..n], &packet[..]);
    }

    #[test]
    fn send_is_passthrough() {
        let mut port = FakePort::new();
        let packet = [0xFFu8, 0x00, 0x03];
        let n = send(&mut port, &packet).unwrap();
        assert_eq!(n, 3);
        assert_eq!(port.sent, packet);
    }

    #[test]
    fn short_header_is_io_error() {
        let mut port = FakePort::new();
        port.queue(vec![0x80]);
        let mut buf = [0u8; 8];
        let err = recv(&mut port, &mut buf).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EIO));
    }
}
