use std::io;

/// Build an I/O error from an errno, replacing the generic OS message with
/// a verb-specific explanation when one exists.
pub(crate) fn os_error_explained(
    code: i32,
    f: impl FnOnce(i32) -> Option<&'static str>,
) -> io::Error {
    let err = io::Error::from_raw_os_error(code);
    match f(code) {
        Some(msg) => io::Error::new(err.kind(), msg),
        None => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explained() {
        let e = os_error_explained(libc::EINVAL, |_| Some("invalid work request"));
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(e.to_string(), "invalid work request");

        let e = os_error_explained(libc::EIO, |_| None);
        assert_eq!(e.raw_os_error(), Some(libc::EIO));
    }
}
