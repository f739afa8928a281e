//! Helpers for working with ROS message-digest ("md5sum") strings.
//!
//! Message/service types provide their own flattened definition text and digest via
//! `RosMessageType`/`RosServiceType` (see `roslibrust_test` for hand-written examples); this
//! module holds the pieces every backend needs to compare digests at handshake time.

/// The wildcard digest ROS tooling (`rostopic echo`, `rostopic hz`, generic subscribers) sends
/// in place of a real md5sum to indicate "accept any type".
pub const WILDCARD: &str = "*";

/// Returns true if two sides of a handshake should be considered type-compatible.
///
/// Per the TCPROS/rosmsg convention this holds iff the digests are byte-identical, or either
/// side sent the wildcard digest.
pub fn digests_compatible(local: &str, remote: &str) -> bool {
    local == remote || local == WILDCARD || remote == WILDCARD
}

/// Computes the md5sum of already-flattened message-definition text.
///
/// This is a thin wrapper so callers don't need to depend on the `md5` crate directly; producing
/// the flattened definition text itself is the message/service type's own job (its
/// `DEFINITION` constant).
pub fn compute(flattened_definition: &str) -> String {
    // Definitions are built with a trailing newline per field; ROS hashes the trimmed text.
    let digest = md5::compute(flattened_definition.trim_end().as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_compatible() {
        assert!(digests_compatible("abc123", "abc123"));
    }

    #[test]
    fn wildcard_on_either_side_is_compatible() {
        assert!(digests_compatible(WILDCARD, "abc123"));
        assert!(digests_compatible("abc123", WILDCARD));
    }

    #[test]
    fn mismatched_digests_are_incompatible() {
        assert!(!digests_compatible("abc123", "def456"));
    }

    #[test]
    fn compute_is_stable_and_trims_trailing_newline() {
        let a = compute("string data\n");
        let b = compute("string data");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
