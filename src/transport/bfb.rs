//! BFB ("binary framing block") datagram framing: chunked, CRC-checked,
//! sequenced, ACKed.

use std::io;

use log::{debug, warn};

use super::TransportConn;
use crate::crc::crc16;

const ACK: &[u8] = b"\x16\x02\x14\x01\xfe";
const CHUNK_MAX: usize = 0x20;
const MAX_ATTEMPTS: usize = 3;

fn send_ack(conn: &mut TransportConn) -> io::Result<()> {
    debug!(">ack");
    conn.port.tx(ACK)?;
    Ok(())
}

fn wait_ack(conn: &mut TransportConn) -> io::Result<bool> {
    let mut buf = [0u8; 5];
    let n = conn.port.rx(&mut buf)?;
    Ok(n == 5 && buf == *ACK)
}

/// Wraps `payload` as `[start, ~start, seq, len_hi, len_lo, payload, crc_lo,
/// crc_hi]` and sends it in <=32-byte control-prefixed chunks, retrying up
/// to three times with a flush+ACK resync between attempts.
pub(super) fn send(conn: &mut TransportConn, payload: &[u8]) -> io::Result<usize> {
    let len = payload.len();
    let start = if conn.out_seq == 0 { 0x02u8 } else { 0x03u8 };
    let mut frame = Vec::with_capacity(len + 7);
    frame.push(start);
    frame.push(!start);
    frame.push(conn.out_seq);
    frame.push((len >> 8) as u8);
    frame.push((len & 0xff) as u8);
    frame.extend_from_slice(payload);
    let csum = crc16(&frame[2..5 + len]);
    frame.push((csum & 0xff) as u8);
    frame.push((csum >> 8) as u8);

    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            debug!("bfb send retry {attempt}");
            conn.flush();
            send_ack(conn)?;
        }

        let mut ok = true;
        let mut offset = 0;
        while offset < frame.len() {
            let chunk_len = (frame.len() - offset).min(CHUNK_MAX);
            let header = [0x16u8, chunk_len as u8, 0x16 ^ chunk_len as u8];
            if conn.port.tx(&header)? < 3 {
                ok = false;
                break;
            }
            if conn.port.tx(&frame[offset..offset + chunk_len])? < chunk_len {
                ok = false;
                break;
            }
            offset += chunk_len;
        }

        if ok && wait_ack(conn)? {
            conn.out_seq = conn.out_seq.wrapping_add(1);
            return Ok(len);
        }
    }

    warn!("bfb send failed after {MAX_ATTEMPTS} attempts");
    Err(io::Error::from_raw_os_error(libc::EIO))
}

/// Reads one `0x16`-prefixed control chunk: `[0x16, len, 0x16^len,
/// payload[len]]`.
fn get_block(conn: &mut TransportConn, buf: &mut [u8]) -> io::Result<usize> {
    let mut head = [0u8; 3];
    if conn.port.rx(&mut head)? < 3 {
        return Err(io::Error::from_raw_os_error(libc::EIO));
    }
    if head[0] != 0x16 {
        return Err(io::Error::from_raw_os_error(libc::EIO));
    }
    let l = head[1] as usize;
    if l < 1 || l > CHUNK_MAX || (l as u8 ^ head[0]) != head[2] {
        return Err(io::Error::from_raw_os_error(libc::EIO));
    }
    let n = conn.port.rx(&mut buf[..l])?;
    Ok(n)
}

/// Reassembles control-prefixed chunks into one BFB frame, verifies CRC
/// and sequence, and copies the payload into `buf`. A retransmission
/// (matching `in_seq`) is re-ACKed and not delivered.
pub(super) fn recv(conn: &mut TransportConn, buf: &mut [u8]) -> io::Result<usize> {
    // A duplicate-sequence retransmission doesn't consume a retry attempt:
    // it re-synchronises the peer and we keep listening for the real frame.
    let mut attempts = 0;
    while attempts < MAX_ATTEMPTS {
        if attempts > 0 {
            debug!("bfb recv retry {attempts}");
            conn.flush();
        }

        let mut head = [0u8; 32];
        let n = match get_block(conn, &mut head) {
            Ok(n) if n >= 5 => n,
            _ => {
                attempts += 1;
                continue;
            }
        };

        if (head[0] | 1) != 0x03 || (head[0] ^ head[1]) != 0xff {
            attempts += 1;
            continue;
        }
        let seq = head[2];
        if seq == conn.in_seq {
            debug!("duplicate seq {seq}, re-ack");
            conn.flush();
            send_ack(conn)?;
            continue;
        }

        let payload_len = ((head[3] as usize) << 8) + head[4] as usize;
        if payload_len > buf.len() {
            warn!("bfb recv: buffer too small for {payload_len} bytes");
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }

        let mut frame = Vec::with_capacity(payload_len + 7);
        frame.extend_from_slice(&head[..n]);
        let mut remaining = (payload_len + 2) as isize - (n as isize - 5);

        while remaining > 0 {
            let mut chunk = [0u8; 32];
            let got = match get_block(conn, &mut chunk) {
                Ok(g) if g > 0 => g,
                _ => break,
            };
            frame.extend_from_slice(&chunk[..got]);
            remaining -= got as isize;
        }

        if remaining != 0 {
            warn!("bfb recv: short frame");
            attempts += 1;
            continue;
        }

        let csum_lo = frame[frame.len() - 2];
        let csum_hi = frame[frame.len() - 1];
        let csum = (csum_lo as u16) | ((csum_hi as u16) << 8);
        if csum != crc16(&frame[2..5 + payload_len]) {
            warn!("bfb recv: CRC error");
            attempts += 1;
            continue;
        }

        conn.in_seq = seq;
        send_ack(conn)?;
        buf[..payload_len].copy_from_slice(&frame[5..5 + payload_len]);
        return Ok(payload_len);
    }

    warn!("bfb recv failed after {MAX_ATTEMPTS} attempts");
    Err(io::Error::from_raw_os_error(libc::EIO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::test_support::FakePort;
    use crate::transport::TransportConn;

    fn chunk_bytes(frame: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in frame.chunks(0x20) {
            out.push(0x16);
            out.push(chunk.len() as u8);
            out.push(0x16 ^ chunk.len() as u8);
            out.extend_from_slice(chunk);
        }
        out
    }

    fn build_frame(seq: u8, payload: &[u8]) -> Vec<u8> {
        let start = if seq == 0 { 0x02 } else { 0x03 };
        let mut frame = vec![start, !start, seq, (payload.len() >> 8) as u8, (payload.len() & 0xff) as u8];
        frame.extend_from_slice(payload);
        let csum = crc16(&frame[2..]);
        frame.push((csum & 0xff) as u8);
        frame.push((csum >> 8) as u8);
        frame
    }

    #[test]
    fn roundtrip_various_lengths() {
        for &len in &[0usize, 1, 31, 32, 33, 1024, 2048] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
            let mut port = FakePort::new();
            port.queue(ACK.to_vec());
            let mut tc = TransportConn::open(Box::new(port), 0, 30);
            tc.link = super::super::LinkType::Bfb;
            let sent = send(&mut tc, &payload).unwrap();
            assert_eq!(sent, len);
            assert_eq!(tc.out_seq, 1);

            // now feed the encoded frame back in and receive it; a fresh
            // TransportConn's in_seq starts at 0xFF so seq 0 is always new
            let frame = build_frame(0, &payload);
            let mut rx_port = FakePort::new();
            rx_port.queue(chunk_bytes(&frame));
            let mut rx_tc = TransportConn::open(Box::new(rx_port), 0, 30);
            rx_tc.link = super::super::LinkType::Bfb;
            let mut out = vec![0u8; len.max(1)];
            let n = recv(&mut rx_tc, &mut out).unwrap();
            assert_eq!(n, len);
            assert_eq!(&out[..n], &payload[..]);
            assert_eq!(rx_tc.in_seq, 0);
        }
    }

    #[test]
    fn duplicate_sequence_is_reacked_once() {
        let payload = b"hello";
        let frame = build_frame(0, payload);
        let mut port = FakePort::new();
        // prime in_seq to 0 by receiving once
        port.queue(chunk_bytes(&frame));
        let mut tc = TransportConn::open(Box::new(port), 0, 30);
        tc.link = super::super::LinkType::Bfb;
        let mut buf = [0u8; 16];
        recv(&mut tc, &mut buf).unwrap();
        assert_eq!(tc.in_seq, 0);

        // now send the exact same frame again: should be re-acked, not delivered,
        // followed by a fresh frame with seq 1 which is delivered.
        let frame1 = build_frame(1, payload);
        let mut port2 = FakePort::new();
        port2.queue(chunk_bytes(&frame));
        // empty marker: lets the duplicate-seq branch's `flush()` see an
        // immediate timeout instead of eating the start of `frame1`
        port2.queue(Vec::new());
        port2.queue(chunk_bytes(&frame1));
        let mut tc2 = TransportConn::open(Box::new(port2), 0, 30);
        tc2.link = super::super::LinkType::Bfb;
        tc2.in_seq = 0;
        let n = recv(&mut tc2, &mut buf).unwrap();
        assert_eq!(&buf[..n], payload);
        assert_eq!(tc2.in_seq, 1);
    }

    #[test]
    fn corrupted_frame_exhausts_retries() {
        let payload = b"xyz";
        let mut frame = build_frame(0, payload);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF; // corrupt CRC
        let mut port = FakePort::new();
        for i in 0..3 {
            if i > 0 {
                // marks the gap the retry's `flush()` drains before re-reading
                port.queue(Vec::new());
            }
            port.queue(chunk_bytes(&frame));
        }
        let mut tc = TransportConn::open(Box::new(port), 0, 30);
        tc.link = super::super::LinkType::Bfb;
        let mut buf = [0u8; 16];
        let err = recv(&mut tc, &mut buf).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EIO));
    }
}
