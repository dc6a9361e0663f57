//! Granule ID extraction

use regex::Regex;
use tracing::warn;

/// Derive a granule ID from a file name
///
/// Returns the first capture group of `pattern` when it matches, otherwise
/// the file name unchanged. Never fails: an invalid pattern is logged and
/// treated as a non-match.
pub fn extract_granule_id(file_name: &str, pattern: &str) -> String {
    let regex = match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(e) => {
            warn!(pattern, error = %e, "Invalid granuleIdExtraction pattern, using file name");
            return file_name.to_string();
        },
    };

    regex
        .captures(file_name)
        .and_then(|captures| captures.get(1))
        .map(|group| group.as_str().to_string())
        .unwrap_or_else(|| file_name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_first_group() {
        assert_eq!(
            extract_granule_id("MOD09GQ.A2017224.h09v02.006.2017227165020.hdf", r"^(.*)\.hdf"),
            "MOD09GQ.A2017224.h09v02.006.2017227165020"
        );
        assert_eq!(
            extract_granule_id("PENS-MOD87GQ.A2017224.h09v02.006.2017227165020.hdf", r"^PENS-(.*)\.hdf"),
            "MOD87GQ.A2017224.h09v02.006.2017227165020"
        );
    }

    #[test]
    fn test_falls_back_to_file_name() {
        assert_eq!(extract_granule_id("foo.bin", r"^(.*)\.hdf"), "foo.bin");
    }

    #[test]
    fn test_match_without_group_uses_file_name() {
        assert_eq!(extract_granule_id("foo.hdf", r"\.hdf$"), "foo.hdf");
        assert_eq!(extract_granule_id("foo.hdf", r"^(bar)?foo\.hdf$"), "foo.hdf");
    }

    #[test]
    fn test_invalid_pattern_uses_file_name() {
        assert_eq!(extract_granule_id("foo.hdf", r"^(.*\.hdf"), "foo.hdf");
    }
}
