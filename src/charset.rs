//! Local-filesystem/phone charset translation.
//!
//! OBEX names on the wire are always UTF-16BE (see [`crate::obex::packet`]);
//! this module only concerns itself with what a *path supplied by the host
//! kernel* is encoded as before it becomes a Rust `&str`, mirroring the
//! original's `iocharset` mount option. The default, and the only
//! implementation shipped here, treats host paths as already UTF-8.

/// Translates byte strings the host filesystem API hands us into UTF-8 and
/// back. Mount options name a charset (`iocharset=...`); everything beyond
/// the UTF-8 default is an external collaborator a host integration can
/// supply.
pub trait Charset: std::fmt::Debug {
    /// Decodes a host-supplied path component into UTF-8.
    fn to_utf8(&self, bytes: &[u8]) -> String;

    /// Encodes a UTF-8 string back into the host's charset.
    fn from_utf8(&self, s: &str) -> Vec<u8>;
}

/// The default `iocharset=utf8`: host paths are assumed to already be
/// UTF-8, so this is a passthrough.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Charset;

impl Charset for Utf8Charset {
    fn to_utf8(&self, bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    fn from_utf8(&self, s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_roundtrip() {
        let cs = Utf8Charset;
        let s = cs.to_utf8("dossier".as_bytes());
        assert_eq!(s, "dossier");
        assert_eq!(cs.from_utf8(&s), b"dossier");
    }
}
