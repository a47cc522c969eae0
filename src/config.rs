//! Mount-time configuration, parsed the way the original accepted its
//! comma-separated `-o` option string.

use crate::charset::{Charset, Utf8Charset};

/// Baud rate the transport falls back to when none is requested.
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Everything a mounted session needs besides the device path: ownership
/// to report for every inode, the baud rate to request, whether to hide
/// the `telecom` directory some phones expose at the root, and the
/// charset host paths are assumed to be encoded in.
#[derive(Debug, Clone)]
pub struct FsConfig {
    pub device: String,
    /// Requested baud rate, or `None` if the mount option was never
    /// given. Mirrors the original's `g_baudrate = -1` sentinel; resolved
    /// to [`DEFAULT_BAUD_RATE`] by [`Self::resolved_baud`] at the same
    /// point the original resolves it, right before opening the session.
    pub baud: Option<u32>,
    pub uid: u32,
    pub gid: u32,
    pub umask: u32,
    pub hide_telecom: bool,
    pub charset: &'static str,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            device: "/dev/mobile".to_string(),
            baud: None,
            uid: 0,
            gid: 0,
            umask: 0o022,
            hide_telecom: true,
            charset: "utf8",
        }
    }
}

impl FsConfig {
    /// The baud rate to actually request: `baud` if the mount option set
    /// one, [`DEFAULT_BAUD_RATE`] otherwise.
    pub fn resolved_baud(&self) -> u32 {
        self.baud.unwrap_or(DEFAULT_BAUD_RATE)
    }

    /// The `st_mode` to report for directories, `umask`-adjusted.
    pub fn dir_mode(&self) -> u32 {
        0o040777 & !self.umask
    }

    /// The `st_mode` to report for regular files, `umask`-adjusted.
    pub fn file_mode(&self) -> u32 {
        0o100666 & !self.umask
    }

    /// Builds a [`Charset`] for [`Self::charset`]. Only `"utf8"` is
    /// recognised; everything else is a caller error, as in the original's
    /// `init_charset` refusing to start on an unknown charset.
    pub fn charset_impl(&self) -> Option<Box<dyn Charset>> {
        match self.charset {
            "utf8" | "UTF-8" | "UTF8" => Some(Box::new(Utf8Charset)),
            _ => None,
        }
    }

    /// Parses a comma-separated option string
    /// (`baudrate=,uid=,gid=,umask=,iocharset=,nohide,device=`), applying
    /// each recognised key in order and ignoring unknown ones.
    pub fn parse(&mut self, options: &str) {
        for item in options.split(',') {
            if let Some(v) = item.strip_prefix("baudrate=") {
                if let Ok(n) = v.parse() {
                    self.baud = Some(n);
                }
            } else if let Some(v) = item.strip_prefix("uid=") {
                if let Ok(n) = v.parse() {
                    self.uid = n;
                }
            } else if let Some(v) = item.strip_prefix("gid=") {
                if let Ok(n) = v.parse() {
                    self.gid = n;
                }
            } else if let Some(v) = item.strip_prefix("umask=") {
                if let Ok(n) = u32::from_str_radix(v, 8) {
                    self.umask = n;
                }
            } else if let Some(v) = item.strip_prefix("iocharset=") {
                self.charset = Box::leak(v.to_string().into_boxed_str());
            } else if item == "nohide" {
                self.hide_telecom = false;
            } else if let Some(v) = item.strip_prefix("device=") {
                self.device = v.to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_keys() {
        let mut cfg = FsConfig::default();
        cfg.parse("baudrate=57600,uid=1000,gid=1000,umask=002,nohide,device=/dev/ttyACM0");
        assert_eq!(cfg.baud, Some(57600));
        assert_eq!(cfg.resolved_baud(), 57600);
        assert_eq!(cfg.uid, 1000);
        assert_eq!(cfg.gid, 1000);
        assert_eq!(cfg.umask, 0o002);
        assert!(!cfg.hide_telecom);
        assert_eq!(cfg.device, "/dev/ttyACM0");
    }

    #[test]
    fn unset_baud_resolves_to_default() {
        let cfg = FsConfig::default();
        assert_eq!(cfg.baud, None);
        assert_eq!(cfg.resolved_baud(), DEFAULT_BAUD_RATE);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut cfg = FsConfig::default();
        cfg.parse("bogus=1,uid=5");
        assert_eq!(cfg.uid, 5);
    }

    #[test]
    fn modes_respect_umask() {
        let mut cfg = FsConfig::default();
        cfg.umask = 0o022;
        assert_eq!(cfg.dir_mode(), 0o040755);
        assert_eq!(cfg.file_mode(), 0o100644);
    }
}
