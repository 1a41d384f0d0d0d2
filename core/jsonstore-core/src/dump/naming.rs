//! Dump file names.
//!
//! ```text
//! <prefix><yyyyMM|yyyyMMdd>_<8 random digits>.txt[.gz]
//! ```

use crate::config::Rotation;
use chrono::{DateTime, Utc};
use rand::Rng;

pub const TXT_EXTENSION: &str = ".txt";
pub const GZ_EXTENSION: &str = ".gz";
pub const INVALID_EXTENSION: &str = ".invalid";

/// UTC date suffix of `now` at the given rotation granularity.
pub fn date_suffix(now: DateTime<Utc>, rotation: Rotation) -> String {
    now.format(rotation.format()).to_string()
}

/// Fresh name for a dump file of period `suffix`.
pub fn dump_file_name(prefix: &str, suffix: &str) -> String {
    let tag: u32 = rand::thread_rng().gen_range(0..100_000_000);
    format!("{prefix}{suffix}_{tag:08}{TXT_EXTENSION}")
}

/// A plain-text dump of period `suffix`.
pub fn is_current(name: &str, prefix: &str, suffix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(suffix))
        .is_some_and(|rest| rest.starts_with('_') && rest.ends_with(TXT_EXTENSION))
}

/// A `.txt` or `.gz` file carrying `prefix`. Hidden files (temporary
/// conversion output) never qualify.
pub fn is_dump_name(name: &str, prefix: &str) -> bool {
    !name.starts_with('.')
        && name.starts_with(prefix)
        && (name.ends_with(TXT_EXTENSION) || name.ends_with(GZ_EXTENSION))
}

pub fn is_archive(name: &str) -> bool {
    name.ends_with(GZ_EXTENSION)
}

/// `x.txt` → `x.txt.gz`
pub fn archive_name(name: &str) -> String {
    format!("{name}{GZ_EXTENSION}")
}

/// `x.txt.gz` → `x.txt`
pub fn plain_name(name: &str) -> Option<&str> {
    name.strip_suffix(GZ_EXTENSION)
}

pub fn invalid_name(name: &str) -> String {
    format!("{name}{INVALID_EXTENSION}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_suffix_is_utc() {
        let t = Utc.with_ymd_and_hms(2026, 3, 9, 23, 59, 59).unwrap();
        assert_eq!(date_suffix(t, Rotation::Monthly), "202603");
        assert_eq!(date_suffix(t, Rotation::Daily), "20260309");
    }

    #[test]
    fn test_file_name_shape() {
        let name = dump_file_name("users_", "202603");
        assert_eq!(name.len(), "users_".len() + 6 + 1 + 8 + 4);
        assert!(name.starts_with("users_202603_"));
        assert!(name[13..21].bytes().all(|b| b.is_ascii_digit()));
        assert!(is_current(&name, "users_", "202603"));
    }

    #[test]
    fn test_current_detection() {
        assert!(is_current("u_202603_00000042.txt", "u_", "202603"));
        assert!(!is_current("u_202603_00000042.txt.gz", "u_", "202603"));
        assert!(!is_current("u_202602_00000042.txt", "u_", "202603"));
        // a daily file is not the current monthly file
        assert!(!is_current("u_20260309_00000042.txt", "u_", "202603"));
        assert!(!is_current("v_202603_00000042.txt", "u_", "202603"));
    }

    #[test]
    fn test_dump_name_filter() {
        assert!(is_dump_name("u_202603_1.txt", "u_"));
        assert!(is_dump_name("u_202603_1.txt.gz", "u_"));
        assert!(!is_dump_name("u_202603_1.txt.gz.invalid", "u_"));
        assert!(!is_dump_name(".convert-abc", ""));
        assert!(!is_dump_name("readme.txt", "u_"));
    }

    #[test]
    fn test_archive_names() {
        assert_eq!(archive_name("a.txt"), "a.txt.gz");
        assert_eq!(plain_name("a.txt.gz"), Some("a.txt"));
        assert_eq!(plain_name("a.txt"), None);
        assert_eq!(invalid_name("a.txt.gz"), "a.txt.gz.invalid");
    }
}
