//! Transport noise filtering
//!
//! SSH prints host-key and tty banners into the combined stream; parsers
//! downstream expect only the remote program's own output.

const NOISE_PREFIXES: &[&str] = &[
    "Warning:",
    "Pseudo-terminal will not be allocated",
    "** WARNING: connection is not using a post-quantum",
    "** This session may be vulnerable",
    "** The server may need to be upgraded",
];

/// True for a banner/warning line emitted by the transport itself
pub fn is_transport_noise(line: &str) -> bool {
    NOISE_PREFIXES.iter().any(|prefix| line.starts_with(prefix))
}

/// Drop transport banner lines, keeping everything else in order
pub fn strip_transport_noise(raw: &str) -> String {
    let mut clean = String::with_capacity(raw.len());
    for line in raw.lines().filter(|line| !is_transport_noise(line)) {
        clean.push_str(line);
        clean.push('\n');
    }
    clean
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_known_host_banner() {
        let raw = "Warning: Permanently added '10.0.0.2' (ED25519) to the list of known hosts.\n\
                   ?x <http://example.org/a>\n\
                   done\n";
        assert_eq!(strip_transport_noise(raw), "?x <http://example.org/a>\ndone\n");
    }

    #[test]
    fn test_keeps_indented_warning_text() {
        // Only banners at column 0 belong to the transport
        let raw = "  Warning: from the engine\n";
        assert_eq!(strip_transport_noise(raw), raw);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(strip_transport_noise(""), "");
    }
}
