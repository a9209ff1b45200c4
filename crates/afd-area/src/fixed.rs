//! NUL-terminated fixed-width string fields inside mapped records.

/// Read a fixed-width field up to its NUL terminator.
///
/// Non-UTF-8 bytes cannot appear in fields written through [`set`]; if the
/// area was corrupted externally the field reads as empty.
pub fn get(buf: &[u8]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..end]).unwrap_or("")
}

/// Store `s` into a fixed-width field, always NUL-terminating.
///
/// Returns `true` when the value had to be truncated to fit.
pub fn set(buf: &mut [u8], s: &str) -> bool {
    let max = buf.len().saturating_sub(1);
    let bytes = s.as_bytes();
    let n = if bytes.len() > max {
        // Back off to a char boundary so the field stays valid UTF-8.
        let mut n = max;
        while n > 0 && !s.is_char_boundary(n) {
            n -= 1;
        }
        n
    } else {
        bytes.len()
    };
    buf[..n].copy_from_slice(&bytes[..n]);
    for b in &mut buf[n..] {
        *b = 0;
    }
    bytes.len() > max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut buf = [0u8; 9];
        assert!(!set(&mut buf, "ducsfax"));
        assert_eq!(get(&buf), "ducsfax");
    }

    #[test]
    fn test_truncates_and_reports() {
        let mut buf = [0u8; 5];
        assert!(set(&mut buf, "toolongalias"));
        assert_eq!(get(&buf), "tool");
    }

    #[test]
    fn test_overwrite_clears_tail() {
        let mut buf = [0u8; 9];
        set(&mut buf, "longname");
        set(&mut buf, "ab");
        assert_eq!(get(&buf), "ab");
        assert_eq!(&buf[3..], &[0u8; 6]);
    }
}
