// Segment file naming and discovery for EWF image sets
//
// EWF v1: image.E01 .. image.E99, then image.EAA .. image.EZZ, image.FAA ..
// image.ZZZ. The first letter is the format letter (E, L, lower-case s for
// SMART). EWF v2 uses image.Ex01 .. image.Ex99.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::ewf::{EwfError, EwfResult};

/// Extension of segment `segment_number` (1-based) in the v1 naming scheme
pub fn segment_extension(format_letter: char, segment_number: u32) -> EwfResult<String> {
    const OP: &str = "segments::segment_extension";

    if segment_number == 0 {
        return Err(EwfError::invalid_argument(OP, "segment numbers start at 1"));
    }
    if segment_number < 100 {
        return Ok(format!("{}{:02}", format_letter, segment_number));
    }

    let (base, last) = if format_letter.is_ascii_lowercase() { (b'a', b'z') } else { (b'A', b'Z') };
    let mut remainder = segment_number - 100;
    let third = base + (remainder % 26) as u8;
    remainder /= 26;
    let second = base + (remainder % 26) as u8;
    remainder /= 26;

    let first = (format_letter as u32) + remainder;
    if !format_letter.is_ascii_alphabetic() || first > last as u32 {
        return Err(EwfError::out_of_range(
            OP,
            format!("segment {} exceeds the naming scheme of '{}'", segment_number, format_letter),
        ));
    }
    Ok(format!("{}{}{}", first as u8 as char, second as char, third as char))
}

/// Extension of segment `segment_number` in the v2 naming scheme (`Ex01`)
pub fn segment_extension_v2(format_letter: char, segment_number: u32) -> EwfResult<String> {
    const OP: &str = "segments::segment_extension_v2";

    if segment_number == 0 || segment_number > 99 {
        return Err(EwfError::out_of_range(OP, format!("segment {} outside [1, 99]", segment_number)));
    }
    Ok(format!("{}x{:02}", format_letter, segment_number))
}

/// Naming scheme recognised from a segment path
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scheme {
    V1(char),
    V2(char),
}

impl Scheme {
    fn from_extension(extension: &str) -> Option<Self> {
        let chars: Vec<char> = extension.chars().collect();
        match chars.as_slice() {
            [letter, a, b] if letter.is_ascii_alphabetic() && a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric() => {
                Some(Scheme::V1(*letter))
            }
            [letter, x, a, b] if letter.is_ascii_alphabetic() && x.eq_ignore_ascii_case(&'x') && a.is_ascii_digit() && b.is_ascii_digit() => {
                Some(Scheme::V2(*letter))
            }
            _ => None,
        }
    }

    fn extension(&self, segment_number: u32) -> EwfResult<String> {
        match *self {
            Scheme::V1(letter) => segment_extension(letter, segment_number),
            Scheme::V2(letter) => segment_extension_v2(letter, segment_number),
        }
    }

    fn with_case(&self, upper: bool) -> Self {
        let convert = |c: char| if upper { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() };
        match *self {
            Scheme::V1(letter) => Scheme::V1(convert(letter)),
            Scheme::V2(letter) => Scheme::V2(convert(letter)),
        }
    }
}

/// Discover every segment of the set `path` belongs to, in segment order.
///
/// Probing starts at segment 1 and stops at the first missing name. Each
/// name is tried in the case of the given path first, then in the other case.
pub fn discover_ewf_segments(path: impl AsRef<Path>) -> EwfResult<Vec<PathBuf>> {
    const OP: &str = "segments::discover_ewf_segments";

    let path = path.as_ref();
    debug!(?path, "Discovering EWF segments");

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .ok_or_else(|| EwfError::invalid_argument(OP, format!("{} has no file name", path.display())))?
        .to_string_lossy()
        .into_owned();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned()).unwrap_or_default();
    let scheme = Scheme::from_extension(&extension).ok_or_else(|| {
        EwfError::invalid_argument(OP, format!("{} is not an EWF segment file name", path.display()))
    })?;

    let upper = extension.chars().next().is_some_and(|c| c.is_ascii_uppercase());
    let schemes = [scheme.with_case(upper), scheme.with_case(!upper)];

    let mut paths = Vec::new();
    for segment_number in 1u32.. {
        let mut found = None;
        for candidate_scheme in &schemes {
            let candidate_extension = match candidate_scheme.extension(segment_number) {
                Ok(extension) => extension,
                Err(EwfError::OutOfRange { .. }) if !paths.is_empty() => break,
                Err(err) => return Err(err),
            };
            let candidate = parent.join(format!("{}.{}", stem, candidate_extension));
            if candidate.is_file() {
                found = Some(candidate);
                break;
            }
        }
        match found {
            Some(segment_path) => {
                trace!(segment_number, ?segment_path, "Found EWF segment");
                paths.push(segment_path);
            }
            None => break,
        }
    }

    if paths.is_empty() {
        return Err(EwfError::io(
            OP,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("first segment of {} not found", path.display()),
            ),
        ));
    }

    debug!(segment_count = paths.len(), "EWF segments discovered");
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_numeric_extensions() {
        assert_eq!(segment_extension('E', 1).unwrap(), "E01");
        assert_eq!(segment_extension('E', 99).unwrap(), "E99");
        assert_eq!(segment_extension('s', 7).unwrap(), "s07");
        assert_eq!(segment_extension_v2('E', 1).unwrap(), "Ex01");
        assert!(segment_extension('E', 0).is_err());
    }

    #[test]
    fn test_alphabetic_extensions() {
        assert_eq!(segment_extension('E', 100).unwrap(), "EAA");
        assert_eq!(segment_extension('E', 101).unwrap(), "EAB");
        assert_eq!(segment_extension('E', 126).unwrap(), "EBA");
        assert_eq!(segment_extension('E', 775).unwrap(), "EZZ");
        assert_eq!(segment_extension('E', 776).unwrap(), "FAA");
        assert_eq!(segment_extension('s', 100).unwrap(), "saa");
        assert_eq!(segment_extension('L', 100).unwrap(), "LAA");
    }

    #[test]
    fn test_extension_limit() {
        // 'E' has 22 first letters (E..=Z) of 676 names each
        let last = 100 + 22 * 676 - 1;
        assert_eq!(segment_extension('E', last).unwrap(), "ZZZ");
        assert!(matches!(segment_extension('E', last + 1), Err(EwfError::OutOfRange { .. })));
        assert!(matches!(segment_extension_v2('E', 100), Err(EwfError::OutOfRange { .. })));
    }

    #[test]
    fn test_discover_segments() {
        let dir = TempDir::new().unwrap();
        for name in ["disk.E01", "disk.E02", "disk.e03", "disk.E05", "other.E01"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let paths = discover_ewf_segments(dir.path().join("disk.E01")).unwrap();
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["disk.E01", "disk.E02", "disk.e03"]);
    }

    #[test]
    fn test_discover_from_later_segment() {
        let dir = TempDir::new().unwrap();
        for name in ["disk.Ex01", "disk.Ex02"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let paths = discover_ewf_segments(dir.path().join("disk.Ex02")).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("disk.Ex01"));
    }

    #[test]
    fn test_discover_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            discover_ewf_segments(dir.path().join("disk.E01")),
            Err(EwfError::Io { .. })
        ));
        assert!(matches!(
            discover_ewf_segments(dir.path().join("disk.raw0")),
            Err(EwfError::InvalidArgument { .. })
        ));
    }
}
