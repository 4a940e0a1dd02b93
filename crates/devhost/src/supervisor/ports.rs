//! Live port autodetection from process output.
//!
//! Dev servers announce their bound port in wildly different shapes. The
//! pattern table below is ordered by specificity and that order is
//! load-bearing: the URL form must win over the looser "listening on" forms,
//! otherwise a log line that contains both reports the wrong port. First
//! match wins; callers lock the port after the first hit.

use once_cell::sync::Lazy;
use regex::Regex;

/// Ordered pattern table. Each regex captures the port in group 1.
static PORT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Network URL with scheme/host/port: http://localhost:5175/
        r"(?i)https?://[A-Za-z0-9_.-]+:(\d{2,5})",
        // Labeled local address line: "Local: ... 5175" without a full URL
        r"(?i)local\s+address[^0-9]*(\d{2,5})",
        // listening on/at [port] 3000, listening on 0.0.0.0:3000
        r"(?i)listening\s+(?:on|at)\s+(?:port\s+)?(?:[A-Za-z0-9_.*-]+:)?(\d{2,5})",
        // started on/at [port] 8080
        r"(?i)started\s+(?:on|at)\s+(?:port\s+)?(?:[A-Za-z0-9_.*-]+:)?(\d{2,5})",
        // ready on ... :4000
        r"(?i)ready\s+on\s+\S*:(\d{2,5})",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

/// Scan one sanitized chunk against the ordered pattern table.
///
/// Returns the first captured port that parses into the valid range.
pub fn detect_port(text: &str) -> Option<u16> {
    for pattern in PORT_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(text)
            && let Some(group) = captures.get(1)
            && let Ok(port) = group.as_str().parse::<u16>()
            && port > 0
        {
            return Some(port);
        }
    }
    None
}

/// Validate a requested port: integer in `[1024, 65535]`.
pub fn validate_port(port: i64) -> bool {
    (1024..=65535).contains(&port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vite_local_line() {
        assert_eq!(detect_port("  Local:   http://localhost:5175/"), Some(5175));
    }

    #[test]
    fn test_url_wins_over_listening() {
        // Both forms present; the URL pattern is checked first.
        let line = "listening on port 9999 at http://127.0.0.1:3000";
        assert_eq!(detect_port(line), Some(3000));
    }

    #[test]
    fn test_listening_forms() {
        assert_eq!(detect_port("listening on port 8080"), Some(8080));
        assert_eq!(detect_port("Listening at 0.0.0.0:4321"), Some(4321));
    }

    #[test]
    fn test_started_and_ready_forms() {
        assert_eq!(detect_port("server started on port 3001"), Some(3001));
        assert_eq!(detect_port("ready on https://0.0.0.0:8443"), Some(8443));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(detect_port("compiled successfully in 420ms"), None);
        assert_eq!(detect_port("error TS2304: cannot find name"), None);
    }

    #[test]
    fn test_validate_port_boundaries() {
        assert!(!validate_port(1023));
        assert!(validate_port(1024));
        assert!(validate_port(65535));
        assert!(!validate_port(65536));
    }
}
