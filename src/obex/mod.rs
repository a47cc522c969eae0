//! OBEX session: connect handshake, working-directory navigation, and the
//! GET/PUT object transfers the filesystem layer rides on top of.

pub mod dirlist;
pub mod packet;

use std::io;

use log::{debug, warn};

use crate::error::errno_for_response;
use crate::serial::SerialIo;
use crate::transport::TransportConn;
pub use dirlist::DirEntry;
use packet::{
    ObexPacket, HDR_APP_PARAMS, HDR_BODY, HDR_END_OF_BODY, HDR_LENGTH, HDR_NAME, HDR_TYPE,
    HDR_WHO, OP_ABORT, OP_CONNECT, OP_DISCONNECT, OP_GET, OP_PUT, OP_PUT_FINAL, OP_SET_PATH,
    RESP_CONTINUE, RESP_END_OF_LISTING, RESP_SUCCESS,
};

/// Object size at which a PUT flushes a chunk and a GET requests the next
/// one.
const BLOCKSIZE: usize = 2048;
const DEFAULT_MAX_PACKET: usize = BLOCKSIZE + 6;

/// AT-startup timeout, in deciseconds, used for the underlying transport.
pub const DEFAULT_TIMEOUT: u8 = 70;

/// Connect header Target/Who value identifying this as a "flex" (file
/// area) OBEX session, as opposed to sync (calendar/contacts) access.
const SIG_FLEX: [u8; 16] = [
    0x6b, 0x01, 0xcb, 0x31, 0x41, 0x06, 0x11, 0xd4, 0x9a, 0x77, 0x00, 0x50, 0xda, 0x3f, 0x47, 0x1f,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    Get,
    Put,
}

/// A live OBEX session above the reliable transport: connect state,
/// current working directory, and whichever GET/PUT transfer (if any) is
/// in flight.
#[derive(Debug)]
pub struct ObexSession {
    conn: TransportConn,
    connected: bool,
    maxsize: usize,
    mode: Mode,
    pc: ObexPacket,
    pd: ObexPacket,
    data_pos: usize,
    data_len: usize,
    eof: bool,
    current_dir: Vec<String>,
    dirlist: String,
    dir_pos: usize,
    filename: Option<String>,
    offset: u64,
    put_buf: Vec<u8>,
    put_len: usize,
}

fn last_component(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

fn utf16be(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() * 2);
    for unit in s.encode_utf16() {
        out.push((unit >> 8) as u8);
        out.push((unit & 0xff) as u8);
    }
    out
}

impl ObexSession {
    /// Opens `device` without performing any on-wire negotiation; the
    /// first call that needs the link (handshake, readdir, get/put, ...)
    /// will do that lazily, exactly as [`Self::handshake`] does on every
    /// entry point.
    pub fn with_port(port: Box<dyn SerialIo>, baud_rate: u32) -> Self {
        Self {
            conn: TransportConn::open(port, baud_rate, DEFAULT_TIMEOUT),
            connected: false,
            maxsize: DEFAULT_MAX_PACKET,
            mode: Mode::Idle,
            pc: ObexPacket::new(),
            pd: ObexPacket::new(),
            data_pos: 0,
            data_len: 0,
            eof: true,
            current_dir: Vec::new(),
            dirlist: String::new(),
            dir_pos: 0,
            filename: None,
            offset: 0,
            put_buf: Vec::new(),
            put_len: 0,
        }
    }

    /// Opens the real serial device at `device`.
    pub fn open(device: &str, baud_rate: u32) -> io::Result<Self> {
        let port = crate::serial::SerialPort::open(device)?;
        Ok(Self::with_port(Box::new(port), baud_rate))
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.conn.send(bytes) {
            Ok(_) => Ok(()),
            Err(e) => {
                let _ = self.abort_exchange();
                Err(e)
            }
        }
    }

    fn send_pc(&mut self) -> io::Result<()> {
        let bytes = self.pc.finish().to_vec();
        self.send_bytes(&bytes)
    }

    fn recv_pc(&mut self) -> io::Result<u8> {
        let cap = self.maxsize + 16;
        let buf = self.pc.buf_mut(cap);
        match self.conn.recv(buf) {
            Ok(0) => {
                let _ = self.abort_exchange();
                Err(io::Error::from_raw_os_error(libc::EIO))
            }
            Ok(n) => {
                self.pc.truncate_to(n);
                Ok(self.pc.as_bytes()[0])
            }
            Err(e) => {
                let _ = self.abort_exchange();
                Err(e)
            }
        }
    }

    fn send_pd(&mut self) -> io::Result<()> {
        let bytes = self.pd.finish().to_vec();
        self.send_bytes(&bytes)
    }

    fn recv_pd(&mut self) -> io::Result<u8> {
        let cap = self.maxsize + 16;
        let buf = self.pd.buf_mut(cap);
        match self.conn.recv(buf) {
            Ok(0) => {
                let _ = self.abort_exchange();
                Err(io::Error::from_raw_os_error(libc::EIO))
            }
            Ok(n) => {
                self.pd.truncate_to(n);
                Ok(self.pd.as_bytes()[0])
            }
            Err(e) => {
                let _ = self.abort_exchange();
                Err(e)
            }
        }
    }

    /// Sends Abort and waits for its response, independent of `pc`/`pd`.
    fn abort_exchange(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 256];
        self.conn.send(&[OP_ABORT, 0x00, 0x03])?;
        let n = self.conn.recv(&mut buf)?;
        if n == 0 {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        if buf[0] == RESP_SUCCESS {
            Ok(())
        } else {
            Err(io::Error::from_raw_os_error(errno_for_response(buf[0])))
        }
    }

    fn cdtop(&mut self) -> io::Result<()> {
        self.pc.init(OP_SET_PATH);
        self.pc.append_byte(0x02);
        self.pc.append_byte(0x00);
        self.pc.append_byte(0x01);
        self.pc.append_byte(0x00);
        self.pc.append_byte(0x03);
        self.send_pc()?;
        let resp = self.recv_pc()?;
        if resp != RESP_SUCCESS {
            return Err(io::Error::from_raw_os_error(errno_for_response(resp)));
        }
        Ok(())
    }

    fn cdup(&mut self) -> io::Result<()> {
        self.pc.init(OP_SET_PATH);
        self.pc.append_byte(0x03);
        self.pc.append_byte(0x00);
        self.send_pc()?;
        let resp = self.recv_pc()?;
        if resp != RESP_SUCCESS {
            return Err(io::Error::from_raw_os_error(errno_for_response(resp)));
        }
        Ok(())
    }

    fn cddown(&mut self, name: &str, create_if_missing: bool) -> io::Result<()> {
        self.pc.init(OP_SET_PATH);
        self.pc.append_byte(if create_if_missing { 0x00 } else { 0x02 });
        self.pc.append_byte(0x00);
        self.pc.append_unicode(HDR_NAME, name);
        self.send_pc()?;
        let resp = self.recv_pc()?;
        if resp != RESP_SUCCESS {
            return Err(io::Error::from_raw_os_error(errno_for_response(resp)));
        }
        Ok(())
    }

    /// Moves the phone's working directory cursor to the directory
    /// containing `name` (or to `name` itself if `strip_last` is false),
    /// creating missing components along the way when `create_if_missing`
    /// is set. Minimises SetPath round trips by diffing against the
    /// cursor's current path and choosing between `cdtop`+redescend or
    /// `cdup`*N, whichever is cheaper.
    fn cdto(&mut self, name: &str, strip_last: bool, create_if_missing: bool) -> io::Result<()> {
        let mut components: Vec<String> = name
            .split(['/', '\\'])
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if strip_last {
            components.pop();
        }

        let result = (|| -> io::Result<()> {
            let mut eq = 0;
            while eq < components.len() && eq < self.current_dir.len() {
                if !self.current_dir[eq].eq_ignore_ascii_case(&components[eq]) {
                    break;
                }
                eq += 1;
            }

            let mut depth = self.current_dir.len();
            if eq < depth {
                if eq <= depth / 2 {
                    self.cdtop()?;
                    depth = 0;
                } else {
                    while depth > eq {
                        self.cdup()?;
                        depth -= 1;
                    }
                }
            }

            while depth < components.len() {
                self.cddown(&components[depth], create_if_missing)?;
                depth += 1;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.current_dir = components;
                Ok(())
            }
            Err(e) => {
                self.current_dir.clear();
                let _ = self.cdtop();
                Err(e)
            }
        }
    }

    /// Ensures the link is up and the phone's file area is connected,
    /// reusing an already-live session where possible.
    pub fn handshake(&mut self) -> io::Result<()> {
        self.connected = false;

        if self.conn.test(3).is_ok() {
            self.connected = true;
            return Ok(());
        }

        if self.conn.initiate().is_err() {
            if self.conn.test(20).is_ok() {
                self.connected = true;
                return Ok(());
            }
            warn!("handshake: link could not be established");
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }

        self.pc.init(OP_CONNECT);
        self.pc.append_byte(0x10);
        self.pc.append_byte(0x00);
        self.pc.append_byte((self.maxsize >> 8) as u8);
        self.pc.append_byte((self.maxsize & 0xff) as u8);
        self.pc.append_data(HDR_WHO, &SIG_FLEX);
        self.send_pc()?;
        let resp = self.recv_pc()?;
        if resp != RESP_SUCCESS {
            return Err(io::Error::from_raw_os_error(errno_for_response(resp)));
        }

        let bytes = self.pc.as_bytes();
        if bytes.len() >= 7 {
            let peer_max = ((bytes[5] as usize) << 8) + bytes[6] as usize;
            if self.maxsize > peer_max {
                self.maxsize = peer_max;
            }
        }

        self.dirlist.clear();
        self.dir_pos = 0;
        self.current_dir.clear();
        self.connected = true;
        debug!("handshake complete, maxsize={}", self.maxsize);
        Ok(())
    }

    /// Disconnects and releases the underlying transport.
    pub fn shutdown(mut self) {
        if self.connected {
            self.pc.init(OP_DISCONNECT);
            self.pc.append_byte(0xcb);
            self.pc.append_byte(0x00);
            self.pc.append_byte(0x00);
            self.pc.append_byte(0x00);
            self.pc.append_byte(0x01);
            if self.send_pc().is_ok() {
                let _ = self.recv_pc();
            }
        }
        self.conn.close();
    }

    /// Fetches the folder listing for `dir` into an internal buffer;
    /// walk it with repeated [`Self::next_entry`] calls.
    pub fn readdir(&mut self, dir: &str) -> io::Result<()> {
        self.handshake()?;
        self.cdto(dir, false, false)?;

        self.pc.init(OP_GET);
        self.pc.append_string(HDR_TYPE, "x-obex/folder-listing");

        let mut listing = String::new();
        loop {
            self.send_pc()?;
            let resp = self.recv_pc()?;
            if resp == RESP_END_OF_LISTING {
                break;
            }
            if resp != RESP_CONTINUE && resp != RESP_SUCCESS {
                return Err(io::Error::from_raw_os_error(errno_for_response(resp)));
            }

            let chunk = self
                .pc
                .find_header(HDR_BODY)
                .or_else(|| self.pc.find_header(HDR_END_OF_BODY))
                .filter(|s| s.len() >= 2)
                .and_then(|s| {
                    let n = ((s[0] as usize) << 8) + s[1] as usize;
                    let n = n.saturating_sub(3);
                    s.get(2..2 + n).map(|b| b.to_vec())
                });
            if let Some(bytes) = chunk {
                listing.push_str(&String::from_utf8_lossy(&bytes));
            }

            if resp == RESP_SUCCESS {
                break;
            }
            self.pc.init(OP_GET);
        }

        self.dirlist = listing;
        self.dir_pos = 0;
        Ok(())
    }

    /// Returns the next entry from the listing fetched by
    /// [`Self::readdir`], or `None` once exhausted.
    pub fn next_entry(&mut self) -> Option<DirEntry> {
        let (entry, next_pos) = dirlist::next_entry(&self.dirlist, self.dir_pos)?;
        self.dir_pos = next_pos;
        Some(entry)
    }

    fn handle_data(&mut self) {
        let opcode = self.pd.as_bytes()[0];
        self.eof = opcode != RESP_CONTINUE;
        self.data_len = 0;
        self.data_pos = 0;

        let header = self
            .pd
            .find_header(HDR_BODY)
            .or_else(|| self.pd.find_header(HDR_END_OF_BODY))
            .filter(|s| s.len() >= 2)
            .map(|s| {
                let offset = s.as_ptr() as usize - self.pd.as_bytes().as_ptr() as usize;
                let l = ((s[0] as usize) << 8) + s[1] as usize;
                (offset, l.saturating_sub(3))
            });

        if let Some((offset, l)) = header {
            // Clamp to what actually arrived: a truncated frame must not
            // make later reads slice past the end of `self.pd`.
            let avail = self.pd.as_bytes().len().saturating_sub(offset + 2);
            let l = l.min(avail);
            self.data_len = l;
            if l > 0 {
                self.data_pos = offset + 2;
            }
        }
    }

    fn begin_get_request(&mut self) -> io::Result<i64> {
        self.handshake()?;
        let filename = self
            .filename
            .clone()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        self.cdto(&filename, true, false)?;

        self.pd.init(OP_GET);
        self.pd.append_unicode(HDR_NAME, last_component(&filename));

        let shift = self.offset % BLOCKSIZE as u64;
        let pos = self.offset - shift;
        if pos != 0 {
            let mut tbuf = [0u8; 6];
            tbuf[0] = 0x37;
            tbuf[1] = 0x04;
            let mut v = pos;
            for i in (2..6).rev() {
                tbuf[i] = (v & 0xff) as u8;
                v >>= 8;
            }
            self.pd.append_data(HDR_APP_PARAMS, &tbuf);
        }

        self.send_pd()?;
        let resp = self.recv_pd()?;
        if resp != RESP_CONTINUE && resp != RESP_SUCCESS {
            return Err(io::Error::from_raw_os_error(errno_for_response(resp)));
        }

        let mut len: i64 = 0;
        if let Some(s) = self.pd.find_header(HDR_LENGTH) {
            if s.len() >= 4 {
                for &b in &s[..4] {
                    len = (len << 8) + b as i64;
                }
            }
        }

        self.mode = Mode::Get;
        self.handle_data();
        let shift = shift.min(self.data_len as u64) as usize;
        self.data_pos += shift;
        self.data_len -= shift;

        Ok(len)
    }

    /// Begins streaming `name` from `offset`. Returns the object's total
    /// length as reported by the phone (which may be unavailable and
    /// come back as `0`).
    pub fn get(&mut self, name: &str, offset: u64) -> io::Result<i64> {
        self.filename = Some(name.to_string());
        self.offset = offset;
        self.begin_get_request()
    }

    /// Reads up to `buf.len()` bytes from the transfer started by
    /// [`Self::get`], fetching further chunks as needed. Returns fewer
    /// bytes than requested only at end of file.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut avail = buf.len();
        let mut written = 0;

        while avail > 0 {
            let l = avail.min(self.data_len);
            if l > 0 {
                let src_pos = self.data_pos;
                let chunk = self.pd.as_bytes()[src_pos..src_pos + l].to_vec();
                buf[written..written + l].copy_from_slice(&chunk);
            }
            written += l;
            avail -= l;
            self.data_pos += l;
            self.data_len -= l;
            self.offset += l as u64;

            if self.data_len == 0 {
                if self.eof {
                    break;
                }
                self.pd.init(OP_GET);
                self.send_pd()?;
                let resp = self.recv_pd()?;
                if resp != RESP_CONTINUE && resp != RESP_SUCCESS {
                    return Err(io::Error::from_raw_os_error(errno_for_response(resp)));
                }
                self.handle_data();
            }
        }

        Ok(written)
    }

    fn begin_put_request(&mut self) -> io::Result<()> {
        self.handshake()?;
        let filename = self
            .filename
            .clone()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        self.cdto(&filename, true, false)?;

        self.pd.init(OP_PUT);
        self.pd.append_unicode(HDR_NAME, last_component(&filename));
        self.send_pd()?;
        let resp = self.recv_pd()?;
        if resp != RESP_CONTINUE {
            return Err(io::Error::from_raw_os_error(errno_for_response(resp)));
        }

        self.mode = Mode::Put;
        self.put_buf.clear();
        self.put_buf.resize(6, 0);
        self.put_len = 6;
        Ok(())
    }

    /// Begins streaming `name` to the phone, truncating any existing
    /// object of that name.
    pub fn put(&mut self, name: &str) -> io::Result<()> {
        self.filename = Some(name.to_string());
        self.offset = 0;
        self.begin_put_request()
    }

    fn flush_put(&mut self, opcode: u8, body_header: u8, expect: u8) -> io::Result<()> {
        self.put_buf[0] = opcode;
        let total = self.put_len;
        self.put_buf[1] = (total >> 8) as u8;
        self.put_buf[2] = (total & 0xff) as u8;
        self.put_buf[3] = body_header;
        let body_len = total - 3;
        self.put_buf[4] = (body_len >> 8) as u8;
        self.put_buf[5] = (body_len & 0xff) as u8;
        self.put_buf.truncate(total);

        let bytes = std::mem::take(&mut self.put_buf);
        self.send_bytes(&bytes)?;

        let cap = self.maxsize + 16;
        let buf = self.pd.buf_mut(cap);
        let resp = match self.conn.recv(buf) {
            Ok(0) => {
                let _ = self.abort_exchange();
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }
            Ok(n) => {
                self.pd.truncate_to(n);
                self.pd.as_bytes()[0]
            }
            Err(e) => {
                let _ = self.abort_exchange();
                return Err(e);
            }
        };
        if resp != expect {
            return Err(io::Error::from_raw_os_error(errno_for_response(resp)));
        }

        self.put_buf.clear();
        self.put_buf.resize(6, 0);
        self.put_len = 6;
        Ok(())
    }

    /// Buffers `data`, flushing full [`BLOCKSIZE`]-ish chunks to the
    /// phone as they fill.
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut n = data.len();
        let mut pos = 0;

        while n > 0 {
            let space = self.maxsize - self.put_len;
            let l = space.min(n);
            if self.put_buf.len() < self.put_len + l {
                self.put_buf.resize(self.put_len + l, 0);
            }
            self.put_buf[self.put_len..self.put_len + l]
                .copy_from_slice(&data[pos..pos + l]);
            self.put_len += l;
            self.offset += l as u64;
            pos += l;
            n -= l;

            if self.put_len == self.maxsize {
                self.flush_put(OP_PUT, HDR_BODY, RESP_CONTINUE)?;
            }
        }

        Ok(data.len())
    }

    /// Ends the active transfer (if any): aborts an incomplete GET, or
    /// flushes and finalises a PUT.
    pub fn close(&mut self) -> io::Result<()> {
        let result = match self.mode {
            Mode::Get => {
                if !self.eof {
                    let _ = self.abort_exchange();
                }
                Ok(())
            }
            Mode::Put => self.flush_put(OP_PUT_FINAL, HDR_END_OF_BODY, RESP_SUCCESS),
            Mode::Idle => Ok(()),
        };
        self.filename = None;
        self.mode = Mode::Idle;
        result
    }

    /// Aborts the in-flight transfer without finalising it, leaving
    /// enough state to [`Self::resume`] later.
    pub fn suspend(&mut self) -> io::Result<()> {
        self.abort_exchange()
    }

    /// Re-issues the GET or PUT that was active when [`Self::suspend`]
    /// was called.
    pub fn resume(&mut self) -> io::Result<()> {
        match self.mode {
            Mode::Get => self.begin_get_request().map(|_| ()),
            Mode::Put => self.begin_put_request(),
            Mode::Idle => Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
    }

    /// Creates `name` (and any missing parent directories).
    pub fn mkdir(&mut self, name: &str) -> io::Result<()> {
        self.handshake()?;
        self.cdto(name, false, true)
    }

    fn getinfo(&mut self, req: u8) -> u64 {
        if self.handshake().is_err() {
            return 0;
        }
        self.pc.init(OP_GET);
        self.pc.append_data(HDR_APP_PARAMS, &[0x32, 0x01, req]);
        if self.send_pc().is_err() {
            return 0;
        }
        let resp = match self.recv_pc() {
            Ok(r) => r,
            Err(_) => return 0,
        };
        if resp != RESP_SUCCESS {
            return 0;
        }
        self.pc
            .find_header(HDR_APP_PARAMS)
            .filter(|s| s.len() > 3 && s[2] == 0x32)
            .map(|s| {
                let l = s[3] as usize;
                let mut n: u64 = 0;
                for &b in &s[4..4 + l.min(s.len() - 4)] {
                    n = (n << 8) + b as u64;
                }
                n
            })
            .unwrap_or(0)
    }

    /// Total storage capacity reported by the phone, in bytes (`0` if
    /// unavailable).
    pub fn capacity(&mut self) -> u64 {
        self.getinfo(0x01)
    }

    /// Free storage reported by the phone, in bytes (`0` if unavailable).
    pub fn available(&mut self) -> u64 {
        self.getinfo(0x02)
    }

    /// Renames/moves `src` to `dest` (both absolute paths) in one
    /// request. Names longer than 255 UTF-16BE bytes are rejected rather
    /// than silently truncated to fit the wire format's one-byte length
    /// prefix.
    pub fn move_entry(&mut self, src: &str, dest: &str) -> io::Result<()> {
        self.handshake()?;

        let src_u16 = utf16be(src);
        let dest_u16 = utf16be(dest);
        if src_u16.len() > 255 || dest_u16.len() > 255 {
            return Err(io::Error::from_raw_os_error(libc::ENAMETOOLONG));
        }

        let mut params = Vec::with_capacity(6 + src_u16.len() + dest_u16.len());
        params.extend_from_slice(b"\x34\x04move");
        params.push(0x35);
        params.push(src_u16.len() as u8);
        params.extend_from_slice(&src_u16);
        params.push(0x36);
        params.push(dest_u16.len() as u8);
        params.extend_from_slice(&dest_u16);

        self.pc.init(OP_PUT_FINAL);
        self.pc.append_data(HDR_APP_PARAMS, &params);
        self.send_pc()?;
        let resp = self.recv_pc()?;
        if resp != RESP_SUCCESS {
            return Err(io::Error::from_raw_os_error(errno_for_response(resp)));
        }
        Ok(())
    }

    /// Deletes `name`.
    pub fn delete(&mut self, name: &str) -> io::Result<()> {
        self.handshake()?;
        self.cdto(name, true, false)?;

        self.pc.init(OP_PUT_FINAL);
        self.pc.append_unicode(HDR_NAME, last_component(name));
        self.send_pc()?;
        let resp = self.recv_pc()?;
        if resp != RESP_SUCCESS {
            return Err(io::Error::from_raw_os_error(errno_for_response(resp)));
        }
        Ok(())
    }

    /// Sets `name`'s owner/group read-write-delete bits from the low
    /// byte pairs of `mode` (`(mode>>7)&3` for owner, `(mode>>4)&3` for
    /// group), the same bit layout `chmod(2)` uses for `rw-`.
    pub fn chmod(&mut self, name: &str, mode: u32) -> io::Result<()> {
        self.handshake()?;
        self.cdto(name, true, false)?;

        const USER: [&str; 4] = ["\"D\"", "\"WD\"", "\"RD\"", "\"RWD\""];
        const GROUP: [&str; 4] = ["\"\"", "\"W\"", "\"R\"", "\"RW\""];
        let perm = format!(
            "{}{}",
            USER[((mode >> 7) & 0x03) as usize],
            GROUP[((mode >> 4) & 0x03) as usize]
        );

        self.pc.init(OP_PUT_FINAL);
        self.pc.append_unicode(HDR_NAME, last_component(name));
        let mut buf = Vec::with_capacity(perm.len() + 2);
        buf.push(0x38);
        buf.push(perm.len() as u8);
        buf.extend_from_slice(perm.as_bytes());
        self.pc.append_data(HDR_APP_PARAMS, &buf);
        self.send_pc()?;
        let resp = self.recv_pc()?;
        if resp != RESP_SUCCESS {
            return Err(io::Error::from_raw_os_error(errno_for_response(resp)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_component_handles_both_separators() {
        assert_eq!(last_component("a/b\\c"), "c");
        assert_eq!(last_component("nosep"), "nosep");
        assert_eq!(last_component("/root"), "root");
    }

    #[test]
    fn utf16be_encodes_ascii() {
        assert_eq!(utf16be("AB"), vec![0x00, b'A', 0x00, b'B']);
    }
}
