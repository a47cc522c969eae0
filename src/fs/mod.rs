//! Path-based filesystem session: directory-listing cache, the
//! session/exchange locking discipline, and the operation table a FUSE-style
//! host drives.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;

use crate::config::FsConfig;
use crate::obex::{DirEntry, ObexSession};

/// Directory-listing freshness window while no transfer is in progress.
const IDLE_FRESH: Duration = Duration::from_secs(2);
/// Directory-listing freshness window while a GET/PUT is active (cache
/// longer, since the wire is busier and round trips costlier).
const XFER_FRESH: Duration = Duration::from_secs(5);
/// How many 100ms rounds [`FsState::start_session`] retries before giving
/// up with `EBUSY`.
const SESSION_RETRIES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Idle,
    Get,
    Put,
}

/// Which direction [`PhoneFilesystem::open`] is opening a file for; the
/// phone's OBEX link can't support read-write simultaneously on one
/// handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
}

/// A `stat(2)`-shaped attribute record for one path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileAttr {
    pub is_dir: bool,
    pub size: u64,
    pub mtime: i64,
    pub mode: u32,
}

/// A `statfs(2)`-shaped capacity record.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatFs {
    pub block_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
    pub name_len: u32,
}

struct Inner {
    obex: ObexSession,
    current_dir: Option<String>,
    dirlist: Vec<DirEntry>,
    last_scan: Option<Instant>,
    operation: Operation,
    current_file: Option<String>,
    current_pos: u64,
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("/", path),
    }
}

fn is_ancestor_or_self(cur: &str, path: &str) -> bool {
    let l = path.len();
    if cur.len() < l {
        return false;
    }
    if !cur[..l].eq_ignore_ascii_case(path) {
        return false;
    }
    cur.len() == l || cur.as_bytes()[l] == b'/'
}

fn same_file(current: &Option<String>, path: &str) -> bool {
    current
        .as_deref()
        .map(|f| f.eq_ignore_ascii_case(path))
        .unwrap_or(false)
}

fn put_and_close(inner: &mut Inner, path: &str) -> io::Result<()> {
    inner.obex.put(path)?;
    inner.obex.close()
}

fn delete_then_put(inner: &mut Inner, path: &str) -> io::Result<()> {
    inner.obex.delete(path)?;
    inner.obex.put(path)?;
    inner.obex.close()
}

/// The path-based filesystem operations a phone mount exposes, mirroring
/// the original's `fuse_operations` table rather than a modern
/// inode-based FUSE ABI: every call addresses its target by absolute
/// path, and the host is responsible for any inode-number bookkeeping a
/// particular mount layer wants on top.
pub trait PhoneFilesystem {
    /// `stat(2)`-equivalent lookup for `path`.
    fn getattr(&self, path: &str) -> io::Result<FileAttr>;
    /// Lists the entries of directory `path`.
    fn readdir(&self, path: &str) -> io::Result<Vec<DirEntry>>;
    /// Creates directory `path`, including any missing parents.
    fn mkdir(&self, path: &str) -> io::Result<()>;
    /// Removes file `path`.
    fn unlink(&self, path: &str) -> io::Result<()>;
    /// Removes (empty) directory `path`.
    fn rmdir(&self, path: &str) -> io::Result<()>;
    /// Truncates `path`; only truncation to empty is meaningful here,
    /// since the phone has no partial-overwrite primitive.
    fn truncate(&self, path: &str, size: u64) -> io::Result<()>;
    /// Moves/renames `from` to `to`.
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;
    /// Creates an empty regular file at `path`.
    fn mknod(&self, path: &str, mode: u32) -> io::Result<()>;
    /// Opens `path` for reading or writing, starting the underlying
    /// transfer; the session stays reserved until [`Self::release`].
    fn open(&self, path: &str, mode: OpenMode) -> io::Result<()>;
    /// Ends the transfer started by [`Self::open`] and releases the
    /// session reservation.
    fn release(&self, path: &str) -> io::Result<()>;
    /// Reads from the file opened at `path`, seeking first if `offset`
    /// doesn't match the transfer's current position.
    fn read(&self, path: &str, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
    /// Writes to the file opened at `path`; `offset` must match the
    /// transfer's current position, since the link can't seek mid-PUT.
    fn write(&self, path: &str, offset: u64, buf: &[u8]) -> io::Result<usize>;
    /// Reports phone storage capacity/availability.
    fn statfs(&self) -> io::Result<StatFs>;
    /// No-op: permission bits aren't meaningful metadata the phone's
    /// file area enforces. Default implementation always succeeds;
    /// override only if a host integration needs otherwise.
    fn chmod(&self, _path: &str, _mode: u32) -> io::Result<()> {
        Ok(())
    }
    /// No-op, for the same reason as [`Self::chmod`].
    fn chown(&self, _path: &str, _uid: u32, _gid: u32) -> io::Result<()> {
        Ok(())
    }
    /// No-op: the phone doesn't expose a way to set a file's timestamp
    /// independent of writing its content.
    fn utime(&self, _path: &str) -> io::Result<()> {
        Ok(())
    }
    /// Always fails with `EPERM`: the phone's file area has no symlinks.
    fn readlink(&self, _path: &str) -> io::Result<String> {
        Err(io::Error::from_raw_os_error(libc::EPERM))
    }
    /// Always fails with `EPERM`: no hard links.
    fn link(&self, _from: &str, _to: &str) -> io::Result<()> {
        Err(io::Error::from_raw_os_error(libc::EPERM))
    }
    /// Always fails with `EPERM`: no symlinks.
    fn symlink(&self, _from: &str, _to: &str) -> io::Result<()> {
        Err(io::Error::from_raw_os_error(libc::EPERM))
    }
}

/// A mounted session: one phone link, one directory-listing cache, and
/// the locking discipline a multithreaded FUSE host needs around it.
///
/// Every entry point takes the `exchange` lock (the wire is inherently
/// sequential); metadata operations additionally suspend and resume an
/// in-flight GET/PUT around that section so the wire can be shared
/// without aborting the transfer outright. `mknod`/`open` additionally
/// take a best-effort `session` gate so a second writer can't start a
/// competing transfer while one is already open, rather than blocking
/// indefinitely.
pub struct FsState {
    config: FsConfig,
    session_active: AtomicBool,
    exchange: Mutex<Inner>,
}

impl FsState {
    /// Opens `config.device` and builds a session around it. Mirrors the
    /// original's `obex_startup`: no communication happens until the
    /// first real operation triggers a handshake.
    pub fn new(config: FsConfig) -> io::Result<Self> {
        let obex = ObexSession::open(&config.device, config.resolved_baud())?;
        Ok(Self::with_session(config, obex))
    }

    /// Builds a session around an already-constructed [`ObexSession`],
    /// for hosts (and tests) that want to supply their own transport.
    pub fn with_session(config: FsConfig, obex: ObexSession) -> Self {
        Self {
            config,
            session_active: AtomicBool::new(false),
            exchange: Mutex::new(Inner {
                obex,
                current_dir: None,
                dirlist: Vec::new(),
                last_scan: None,
                operation: Operation::Idle,
                current_file: None,
                current_pos: 0,
            }),
        }
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    fn start_session(&self) -> io::Result<()> {
        for _ in 0..SESSION_RETRIES {
            if self
                .session_active
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        Err(io::Error::from_raw_os_error(libc::EBUSY))
    }

    fn end_session(&self) {
        self.session_active.store(false, Ordering::Release);
    }

    fn dir_attr(&self) -> FileAttr {
        FileAttr {
            is_dir: true,
            size: 0,
            mtime: 0,
            mode: self.config.dir_mode(),
        }
    }

    /// Whether the cached listing already covers `path` and hasn't aged
    /// past the freshness window for the current transfer state. Mirrors
    /// `getdir`'s `t - g_lastscan < d` check, which runs before anything
    /// touches the wire or the session lock.
    fn dir_is_fresh(&self, inner: &Inner, path: &str) -> bool {
        let freshness = if inner.operation == Operation::Idle {
            IDLE_FRESH
        } else {
            XFER_FRESH
        };
        match (&inner.current_dir, inner.last_scan) {
            (Some(cur), Some(t)) => cur.eq_ignore_ascii_case(path) && t.elapsed() < freshness,
            _ => false,
        }
    }

    /// Refetches the directory listing for `path` from the phone and
    /// replaces the cache. Always touches the wire; callers check
    /// [`Self::dir_is_fresh`] first to skip this on a cache hit.
    fn rescan_dir(&self, inner: &mut Inner, path: &str) -> io::Result<()> {
        inner.obex.readdir(path)?;
        let mut entries = Vec::new();
        while let Some(e) = inner.obex.next_entry() {
            entries.push(e);
        }
        inner.dirlist = entries;
        inner.current_dir = Some(path.to_string());
        inner.last_scan = Some(Instant::now());
        Ok(())
    }

    fn lookup_locked(&self, inner: &Inner, name: &str) -> io::Result<FileAttr> {
        inner
            .dirlist
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .map(|e| FileAttr {
                is_dir: e.is_dir,
                size: e.size,
                mtime: e.mtime,
                mode: if e.is_dir {
                    self.config.dir_mode()
                } else {
                    self.config.file_mode()
                },
            })
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }
}

impl PhoneFilesystem for FsState {
    fn getattr(&self, path: &str) -> io::Result<FileAttr> {
        if path == "/" {
            return Ok(self.dir_attr());
        }

        let mut inner = self.exchange.lock();
        if let Some(cur) = inner.current_dir.clone() {
            if is_ancestor_or_self(&cur, path) {
                return Ok(self.dir_attr());
            }
        }
        let (parent, name) = split_parent(path);
        if self.dir_is_fresh(&inner, parent) {
            return self.lookup_locked(&inner, name);
        }

        let suspended = inner.operation != Operation::Idle;
        if suspended {
            let _ = inner.obex.suspend();
        }
        let result = self.rescan_dir(&mut inner, parent);
        if suspended {
            let _ = inner.obex.resume();
        }
        result?;
        self.lookup_locked(&inner, name)
    }

    fn readdir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let mut inner = self.exchange.lock();
        if !self.dir_is_fresh(&inner, path) {
            let suspended = inner.operation != Operation::Idle;
            if suspended {
                let _ = inner.obex.suspend();
            }
            let result = self.rescan_dir(&mut inner, path);
            if suspended {
                let _ = inner.obex.resume();
            }
            result?;
        }

        let hide_telecom = path == "/" && self.config.hide_telecom;
        Ok(inner
            .dirlist
            .iter()
            .filter(|e| !(hide_telecom && e.name.eq_ignore_ascii_case("telecom")))
            .cloned()
            .collect())
    }

    fn mkdir(&self, path: &str) -> io::Result<()> {
        let mut inner = self.exchange.lock();
        let suspended = inner.operation != Operation::Idle;
        if suspended {
            let _ = inner.obex.suspend();
        }
        let result = inner.obex.mkdir(path);
        inner.last_scan = None;
        if suspended {
            let _ = inner.obex.resume();
        }
        result
    }

    fn unlink(&self, path: &str) -> io::Result<()> {
        let mut inner = self.exchange.lock();
        let suspended = inner.operation != Operation::Idle;
        if suspended {
            let _ = inner.obex.suspend();
        }
        let result = inner.obex.delete(path);
        inner.last_scan = None;
        if suspended {
            let _ = inner.obex.resume();
        }
        result
    }

    fn rmdir(&self, path: &str) -> io::Result<()> {
        self.unlink(path)
    }

    fn truncate(&self, path: &str, _size: u64) -> io::Result<()> {
        let mut inner = self.exchange.lock();
        let suspended = inner.operation != Operation::Idle;
        if suspended {
            let _ = inner.obex.suspend();
        }
        let result = delete_then_put(&mut inner, path);
        inner.last_scan = None;
        if suspended {
            let _ = inner.obex.resume();
        }
        result
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let mut inner = self.exchange.lock();
        let suspended = inner.operation != Operation::Idle;
        if suspended {
            let _ = inner.obex.suspend();
        }
        let result = inner.obex.move_entry(from, to);
        inner.last_scan = None;
        if suspended {
            let _ = inner.obex.resume();
        }
        result
    }

    fn mknod(&self, path: &str, mode: u32) -> io::Result<()> {
        let file_type = mode & 0o170000;
        if file_type != 0 && file_type != 0o100000 {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }

        self.start_session()?;
        let mut inner = self.exchange.lock();
        let result = put_and_close(&mut inner, path);
        inner.last_scan = None;
        drop(inner);
        self.end_session();
        result
    }

    fn open(&self, path: &str, mode: OpenMode) -> io::Result<()> {
        self.start_session()?;
        let mut inner = self.exchange.lock();
        let result = match mode {
            OpenMode::ReadOnly => inner.obex.get(path, 0).map(|_| ()),
            OpenMode::WriteOnly => inner.obex.put(path),
        };
        match result {
            Ok(()) => {
                inner.current_file = Some(path.to_string());
                inner.operation = match mode {
                    OpenMode::ReadOnly => Operation::Get,
                    OpenMode::WriteOnly => Operation::Put,
                };
                inner.current_pos = 0;
                Ok(())
            }
            Err(e) => {
                drop(inner);
                self.end_session();
                Err(e)
            }
        }
    }

    fn release(&self, path: &str) -> io::Result<()> {
        let mut inner = self.exchange.lock();
        if inner.operation != Operation::Idle && same_file(&inner.current_file, path) {
            if let Err(e) = inner.obex.close() {
                debug!("release: obex close failed: {e}");
            }
            inner.current_file = None;
            inner.operation = Operation::Idle;
            inner.last_scan = None;
            drop(inner);
            self.end_session();
        }
        Ok(())
    }

    fn read(&self, path: &str, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.exchange.lock();
        if inner.operation != Operation::Get || !same_file(&inner.current_file, path) {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        if offset != inner.current_pos {
            let _ = inner.obex.close();
            inner.obex.get(path, offset)?;
            inner.current_pos = offset;
        }
        let n = inner.obex.read(buf)?;
        inner.current_pos += n as u64;
        Ok(n)
    }

    fn write(&self, path: &str, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.exchange.lock();
        if inner.operation != Operation::Put || !same_file(&inner.current_file, path) {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        if offset != inner.current_pos {
            return Err(io::Error::from_raw_os_error(libc::ESPIPE));
        }
        let n = inner.obex.write(buf)?;
        inner.current_pos += n as u64;
        Ok(n)
    }

    fn statfs(&self) -> io::Result<StatFs> {
        let mut inner = self.exchange.lock();
        let suspended = inner.operation != Operation::Idle;
        if suspended {
            let _ = inner.obex.suspend();
        }
        let capacity = inner.obex.capacity();
        let available = inner.obex.available();
        if suspended {
            let _ = inner.obex.resume();
        }
        drop(inner);

        let mut out = StatFs::default();
        if capacity > 0 {
            out.block_size = 512;
            out.blocks = capacity / 512;
            out.blocks_free = available / 512;
            out.name_len = 255;
        }
        Ok(out)
    }

    // chmod/chown/utime/readlink/link/symlink all keep the trait's default
    // bodies: the original's FUSE table wires the first three to
    // unconditional no-ops even though the OBEX layer (`ObexSession::chmod`)
    // can express ownership changes, and the file area has neither hard nor
    // symbolic links.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::test_support::FakePort;

    #[test]
    fn split_parent_handles_root_and_nested() {
        assert_eq!(split_parent("/foo"), ("/", "foo"));
        assert_eq!(split_parent("/foo/bar"), ("/foo", "bar"));
        assert_eq!(split_parent("noslash"), ("/", "noslash"));
    }

    #[test]
    fn ancestor_check_respects_boundary() {
        assert!(is_ancestor_or_self("/a/b", "/a/b"));
        assert!(is_ancestor_or_self("/a/b", "/a"));
        assert!(!is_ancestor_or_self("/ab", "/a"));
    }

    /// A fresh cache hit must resolve without ever reaching the wire: the
    /// fixture's `FakePort` has nothing queued, so any attempted
    /// handshake/readdir would surface as an `Err` here instead of the
    /// expected attributes.
    #[test]
    fn getattr_cache_hit_skips_wire() {
        let _ = env_logger::try_init();

        let port = FakePort::new();
        let obex = ObexSession::with_port(Box::new(port), 19200);
        let state = FsState::with_session(FsConfig::default(), obex);

        {
            let mut inner = state.exchange.lock();
            inner.current_dir = Some("/".to_string());
            inner.dirlist = vec![DirEntry {
                name: "note.txt".to_string(),
                is_dir: false,
                size: 5,
                mtime: 0,
                mode: 0o100644,
            }];
            inner.last_scan = Some(Instant::now());
        }

        let attr = state.getattr("/note.txt").expect("cache hit must not touch the wire");
        assert_eq!(attr.size, 5);
        assert!(!attr.is_dir);
    }
}
