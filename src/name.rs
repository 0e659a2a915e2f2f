//! Full-name assembly and canonicalization.
//!
//! A full name is `[<instance>]<path>` with an uppercase slash-separated
//! path, e.g. `[123]/SYS/TEST/INT_ARRAY`. Uppercasing is a client contract:
//! the broker stores and matches names verbatim.

/// Build the canonical full name for an instance id and path.
pub fn full_name(instance_id: u32, path: &str) -> String {
    format!("[{instance_id}]{}", path.to_ascii_uppercase())
}

/// Uppercase a name the way the client library does before sending.
/// Already-canonical names pass through unchanged.
pub fn canonicalize(name: &str) -> String {
    name.to_ascii_uppercase()
}

/// Extract the instance id from a full name, if it carries one.
pub fn instance_id(name: &str) -> Option<u32> {
    let rest = name.strip_prefix('[')?;
    let end = rest.find(']')?;
    rest[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_full_name() {
        assert_eq!(full_name(123, "/sys/test/u32"), "[123]/SYS/TEST/U32");
        assert_eq!(full_name(0, "/A"), "[0]/A");
    }

    #[test]
    fn canonicalize_uppercases() {
        assert_eq!(canonicalize("[1]/sys/Name"), "[1]/SYS/NAME");
        assert_eq!(canonicalize("[1]/SYS"), "[1]/SYS");
    }

    #[test]
    fn extracts_instance_id() {
        assert_eq!(instance_id("[123]/SYS/A"), Some(123));
        assert_eq!(instance_id("[0]/A"), Some(0));
        assert_eq!(instance_id("/SYS/A"), None);
        assert_eq!(instance_id("[x]/A"), None);
    }
}
