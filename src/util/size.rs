//! Size helper functions.

/// Convert kilobytes to bytes.
#[inline]
pub const fn kb(n: usize) -> usize {
    n * 1024
}

/// Convert megabytes to bytes.
#[inline]
pub const fn mb(n: usize) -> usize {
    n * 1024 * 1024
}

/// Format bytes as a human-readable string, e.g. `1.50 MB`.
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Parse a byte count such as `4096`, `64k` or `16m`.
pub fn parse_bytes(value: &str) -> Option<usize> {
    let value = value.trim().to_ascii_lowercase();
    let (digits, scale) = match value.strip_suffix('m') {
        Some(d) => (d, mb(1)),
        None => match value.strip_suffix('k') {
            Some(d) => (d, kb(1)),
            None => (value.as_str(), 1),
        },
    };
    digits.trim().parse::<usize>().ok()?.checked_mul(scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_conversions() {
        assert_eq!(kb(1), 1024);
        assert_eq!(mb(1), 1024 * 1024);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536 * 1024), "1.50 MB");
        assert_eq!(format_bytes(4096 * 1024 * 1024), "4.00 GB");
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("4096"), Some(4096));
        assert_eq!(parse_bytes("64k"), Some(kb(64)));
        assert_eq!(parse_bytes(" 16M "), Some(mb(16)));
        assert_eq!(parse_bytes("lots"), None);
    }
}
