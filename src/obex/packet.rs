//! OBEX packet buffer: header layout, building, and lookup.
//!
//! A packet is `[opcode, len_hi, len_lo, header...]`. Each header starts
//! with a one-byte identifier whose top two bits say how to size it:
//! `0x00`/`0x40` carry a two-byte big-endian length covering themselves,
//! `0x80` is a single value byte, `0xc0` is a fixed four-byte value.

/// Name header: UTF-16BE string, null-terminated.
pub const HDR_NAME: u8 = 0x01;
/// Type header: null-terminated ASCII MIME type.
pub const HDR_TYPE: u8 = 0x42;
/// Length header: four-byte big-endian object length.
pub const HDR_LENGTH: u8 = 0xC3;
/// Body header: non-final chunk of object data.
pub const HDR_BODY: u8 = 0x48;
/// End-of-body header: final chunk of object data.
pub const HDR_END_OF_BODY: u8 = 0x49;
/// Who/Target header: application identity bytes.
pub const HDR_WHO: u8 = 0x46;
/// Application-parameters header: vendor TLV blob.
pub const HDR_APP_PARAMS: u8 = 0x4C;

/// Connect opcode.
pub const OP_CONNECT: u8 = 0x80;
/// Disconnect opcode.
pub const OP_DISCONNECT: u8 = 0x81;
/// Put, not final.
pub const OP_PUT: u8 = 0x02;
/// Put, final chunk.
pub const OP_PUT_FINAL: u8 = 0x82;
/// Get.
pub const OP_GET: u8 = 0x83;
/// SetPath.
pub const OP_SET_PATH: u8 = 0x85;
/// Abort.
pub const OP_ABORT: u8 = 0xFF;

/// Final-success response.
pub const RESP_SUCCESS: u8 = 0xA0;
/// Continuation response (more data follows).
pub const RESP_CONTINUE: u8 = 0x90;
/// End-of-folder-listing response (non-standard, phone-specific).
pub const RESP_END_OF_LISTING: u8 = 0xA4;

/// A growable OBEX packet buffer, built header-by-header and finalised
/// with its own length prefix before being handed to the transport.
#[derive(Debug, Clone, Default)]
pub struct ObexPacket {
    data: Vec<u8>,
}

impl ObexPacket {
    pub fn new() -> Self {
        Self { data: Vec::with_capacity(256) }
    }

    /// Resets the buffer to hold just `opcode`, with a placeholder length.
    pub fn init(&mut self, opcode: u8) {
        self.data.clear();
        self.data.push(opcode);
        self.data.push(0);
        self.data.push(0);
    }

    pub fn opcode(&self) -> u8 {
        self.data[0]
    }

    pub fn append_byte(&mut self, v: u8) {
        self.data.push(v);
    }

    /// Appends a class-`0x40` header carrying `payload` verbatim.
    pub fn append_data(&mut self, header: u8, payload: &[u8]) {
        let size = payload.len() + 3;
        self.data.push(header);
        self.data.push((size >> 8) as u8);
        self.data.push((size & 0xff) as u8);
        self.data.extend_from_slice(payload);
    }

    /// Appends a class-`0x40` header carrying `s` as null-terminated ASCII.
    pub fn append_string(&mut self, header: u8, s: &str) {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.append_data(header, &bytes);
    }

    /// Appends a class-`0x40` header carrying `s` as null-terminated
    /// UTF-16BE, the encoding every OBEX Name header on this link uses.
    pub fn append_unicode(&mut self, header: u8, s: &str) {
        let mut buf = Vec::with_capacity(s.len() * 2 + 2);
        for unit in s.encode_utf16() {
            buf.push((unit >> 8) as u8);
            buf.push((unit & 0xff) as u8);
        }
        buf.push(0);
        buf.push(0);
        self.append_data(header, &buf);
    }

    /// Writes the overall packet length into bytes 1-2 and returns the
    /// finished buffer, ready for [`crate::transport::TransportConn::send`].
    pub fn finish(&mut self) -> &[u8] {
        let len = self.data.len();
        self.data[1] = (len >> 8) as u8;
        self.data[2] = (len & 0xff) as u8;
        &self.data
    }

    /// Raw buffer, sized to `len`, for receiving into.
    pub fn buf_mut(&mut self, capacity: usize) -> &mut Vec<u8> {
        self.data.clear();
        self.data.resize(capacity, 0);
        &mut self.data
    }

    pub fn truncate_to(&mut self, len: usize) {
        self.data.truncate(len);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Finds the first header of kind `h`, returning the bytes immediately
    /// after the header identifier (so callers must interpret the length
    /// prefix themselves for class `0x00`/`0x40` headers).
    ///
    /// Scans starting right after the 3-byte prefix, so it only applies to
    /// opcodes whose first byte there is a header id — true for GET/PUT,
    /// not for Connect/SetPath, which place fixed non-header bytes there
    /// instead. `handshake`/`cdtop`/`cdup`/`cddown` read those fixed bytes
    /// directly rather than through this method.
    pub fn find_header(&self, h: u8) -> Option<&[u8]> {
        let total = ((self.data[1] as usize) << 8) + self.data[2] as usize;
        let mut s = 3usize;
        while s < total && s < self.data.len() {
            if self.data[s] == h {
                return Some(&self.data[s + 1..]);
            }
            let step = match self.data[s] & 0xc0 {
                0x80 => 2,
                0xc0 => 5,
                _ => {
                    if s + 2 >= self.data.len() {
                        break;
                    }
                    ((self.data[s + 1] as usize) << 8) + self.data[s + 2] as usize
                }
            };
            if step == 0 {
                break;
            }
            s += step;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `find_header` scans from byte 3 onward, same as the original's
    // `find_header` — it assumes the first byte after the 3-byte prefix is
    // a header id. That holds for GET/PUT packets, but not for Connect or
    // SetPath, which write fixed non-header bytes (version/flags/maxpacket,
    // or flags/constants) right after the prefix; `handshake`/`cdtop`/
    // `cdup`/`cddown` read those fixed fields by hand instead of going
    // through `find_header`, exactly as the original does. Headers are
    // only ever looked up through `find_header` on GET/PUT packets, so
    // these tests build against one of those opcodes.

    #[test]
    fn builds_packet_and_finds_target() {
        let mut p = ObexPacket::new();
        p.init(OP_PUT);
        p.append_data(HDR_WHO, b"0123456789ABCDEF");
        p.finish();

        let found = p.find_header(HDR_WHO).unwrap();
        assert_eq!(&found[2..2 + 17], b"0123456789ABCDEF");
    }

    #[test]
    fn append_unicode_is_utf16be_null_terminated() {
        let mut p = ObexPacket::new();
        p.init(OP_PUT);
        p.append_unicode(HDR_NAME, "ab");
        p.finish();

        let found = p.find_header(HDR_NAME).unwrap();
        // skip the 2-byte length prefix that append_data wrote
        assert_eq!(&found[2..], &[0x00, b'a', 0x00, b'b', 0x00, 0x00]);
    }

    #[test]
    fn missing_header_is_none() {
        let mut p = ObexPacket::new();
        p.init(OP_ABORT);
        p.finish();
        assert!(p.find_header(HDR_BODY).is_none());
    }
}
