//! 8.3 filename handling: validation and conversion between the caller's
//! dotted form and the space-padded 11-byte form stored on disk.

use crate::error::{Error, Result};

/// A filename in dotted 8.3 form, at most 12 bytes ("ABCDEFGH.EXT").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileName {
    buf: [u8; 12],
    len: u8,
}

impl FileName {
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }

    /// The name as a string slice. Names containing bytes above 127 are not
    /// UTF-8; those render as empty.
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(self.as_bytes()).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl core::fmt::Display for FileName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for &byte in self.as_bytes() {
            write!(f, "{}", byte as char)?;
        }
        Ok(())
    }
}

impl PartialEq<&str> for FileName {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

/// Check a name against the 8.3 rules: non-empty, at most 8 bytes for a
/// directory or 12 for a file, drawn from the allowed character set.
pub(crate) fn validate(name: &str, is_dir: bool) -> Result<()> {
    let limit = if is_dir { 8 } else { 12 };
    let bytes = name.as_bytes();

    if bytes.is_empty() || bytes.len() > limit {
        return Err(Error::InvalidName);
    }

    for &byte in bytes {
        let allowed = byte.is_ascii_alphanumeric()
            || matches!(
                byte,
                b'!' | b'#' | b'$' | b'%' | b'&' | b'(' | b')' | b'-' | b'@' | b'^' | b'_'
                    | b'`' | b'{' | b'}' | b'~' | b' ' | b'.'
            )
            || byte > 127;
        if !allowed {
            return Err(Error::InvalidName);
        }
    }
    Ok(())
}

/// Convert a dotted name to the on-disk form: base space-padded to 8 bytes,
/// extension to 3, uppercased, no dot.
pub(crate) fn to_disk(name: &str) -> [u8; 11] {
    let bytes = name.as_bytes();
    let mut on_disk = [b' '; 11];

    let mut in_index = 0;
    let mut out_index = 0;
    while out_index < 11 && in_index < 12 && in_index < bytes.len() {
        let byte = bytes[in_index];
        if byte == b'.' {
            // jump to the extension field
            while out_index < 8 {
                on_disk[out_index] = b' ';
                out_index += 1;
            }
            in_index += 1;
        } else {
            on_disk[out_index] = byte.to_ascii_uppercase();
            in_index += 1;
            out_index += 1;
        }
    }
    on_disk
}

/// The on-disk form used when resolving a name: `.` and `..` are stored
/// literally, everything else goes through [`to_disk`].
pub(crate) fn search_form(name: &str) -> [u8; 11] {
    match name {
        "." => *b".          ",
        ".." => *b"..         ",
        _ => to_disk(name),
    }
}

/// Convert an on-disk name back to dotted form, trimming the padding and
/// reintroducing the dot only when there is an extension.
pub(crate) fn from_disk(on_disk: &[u8; 11]) -> FileName {
    let mut buf = [0u8; 12];
    let mut out_index = 0;
    let mut in_index = 0;
    let mut wrote_dot = false;

    while in_index < 11 && out_index < 12 {
        if in_index < 8 {
            if on_disk[in_index] == b' ' {
                in_index = 8; // base over, skip to the extension
                continue;
            }
            buf[out_index] = on_disk[in_index];
            out_index += 1;
        } else if on_disk[in_index] != b' ' {
            if !wrote_dot {
                buf[out_index] = b'.';
                out_index += 1;
                wrote_dot = true;
            }
            buf[out_index] = on_disk[in_index];
            out_index += 1;
        }
        in_index += 1;
    }

    FileName {
        buf,
        len: out_index as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_limits() {
        assert!(validate("test.txt", false).is_ok());
        assert!(validate("testdir", true).is_ok());
        assert_eq!(validate("", false), Err(Error::InvalidName));
        assert_eq!(validate("toolongname", true), Err(Error::InvalidName));
        assert_eq!(validate("muchtoolong.x", false), Err(Error::InvalidName));
        assert_eq!(validate("bad*name", false), Err(Error::InvalidName));
        assert_eq!(validate("bad/name", false), Err(Error::InvalidName));
        assert!(validate("A_B-C~1.TXT", false).is_ok());
    }

    #[test]
    fn to_disk_pads_and_uppercases() {
        assert_eq!(&to_disk("test.txt"), b"TEST    TXT");
        assert_eq!(&to_disk("a.b"), b"A       B  ");
        assert_eq!(&to_disk("noext"), b"NOEXT      ");
        assert_eq!(&to_disk("LONGNAME.BIN"), b"LONGNAMEBIN");
    }

    #[test]
    fn from_disk_restores_dot() {
        assert_eq!(from_disk(b"TEST    TXT").as_str(), "TEST.TXT");
        assert_eq!(from_disk(b"NOEXT      ").as_str(), "NOEXT");
        assert_eq!(from_disk(b".          ").as_str(), ".");
        assert_eq!(from_disk(b"..         ").as_str(), "..");
    }

    #[test]
    fn disk_form_round_trips() {
        // to_disk . from_disk is the identity on valid on-disk names
        for on_disk in [b"TEST    TXT", b"A          ", b"12345678ABC", b"LOG     TXT"] {
            assert_eq!(&to_disk(from_disk(on_disk).as_str()), on_disk);
        }
    }

    #[test]
    fn dotted_form_round_trips_up_to_case() {
        for name in ["TEST.TXT", "NOEXT", "A.B", "12345678.ABC"] {
            assert_eq!(from_disk(&to_disk(name)).as_str(), name);
        }
        // lowercase folds to upper on the way in
        assert_eq!(from_disk(&to_disk("test.txt")).as_str(), "TEST.TXT");
    }

    #[test]
    fn search_form_dot_names() {
        assert_eq!(&search_form("."), b".          ");
        assert_eq!(&search_form(".."), b"..         ");
        assert_eq!(&search_form("file.txt"), b"FILE    TXT");
    }
}
