//! Hypervisor version banner parsing.

use crate::errors::{DriverError, DriverResult};
use regex::Regex;
use std::sync::LazyLock;

/// First dotted numeric run, e.g. `6.2.0` in
/// `qemu-system-x86_64 version 6.2.0 (Debian 1:6.2+dfsg-2)`.
///
/// At least one dot is required, otherwise the `86` in the binary name
/// would win. The match is not anchored to the word "version".
static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+(?:\.[0-9]+)+").expect("version pattern is valid"));

/// Extract the version from a `-version` banner.
pub fn parse_version(banner: &str) -> DriverResult<String> {
    let banner = banner.trim();
    VERSION_RE
        .find(banner)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| DriverError::Parse(format!("No version found: {}", banner)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debian_banner() {
        let version =
            parse_version("qemu-system-x86_64 version 6.2.0 (Debian 1:6.2+dfsg-2)").unwrap();
        assert_eq!(version, "6.2.0");
    }

    #[test]
    fn test_multiline_banner() {
        let banner = "\nQEMU emulator version 8.1.3\nCopyright (c) 2003-2023 Fabrice Bellard and the QEMU Project developers\n";
        assert_eq!(parse_version(banner).unwrap(), "8.1.3");
    }

    #[test]
    fn test_first_dotted_run_wins() {
        let version = parse_version("wrapper 1.4 for qemu version 6.2.0").unwrap();
        assert_eq!(version, "1.4");
    }

    #[test]
    fn test_no_digits_is_parse_error() {
        let err = parse_version("  hypervisor says hello  ").unwrap_err();

        assert!(matches!(err, DriverError::Parse(_)));
        assert!(err.to_string().contains("hypervisor says hello"));
    }

    #[test]
    fn test_bare_number_is_parse_error() {
        assert!(parse_version("version 7").is_err());
    }
}
