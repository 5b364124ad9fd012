//! Metadata key layout
//!
//! Keys are `/`-delimited. Everything owned by a knowledge box lives under
//! `/kbs/{kbid}/` so a purge can delete it with one prefix scan.

pub const KBS_PREFIX: &str = "/kbs/";
pub const DELETIONS_PREFIX: &str = "/deletions/";

pub fn kb_keys(kbid: &str) -> String {
    format!("{KBS_PREFIX}{kbid}/")
}

pub fn kb_config(kbid: &str) -> String {
    format!("{KBS_PREFIX}{kbid}/config")
}

/// The ShardSet of a knowledge box.
pub fn kb_shards(kbid: &str) -> String {
    format!("{KBS_PREFIX}{kbid}/shards")
}

/// Shard set being built by an in-progress rollover.
pub fn kb_rollover_shards(kbid: &str) -> String {
    format!("{KBS_PREFIX}{kbid}/rollover/shards")
}

pub fn kb_deletion(kbid: &str) -> String {
    format!("{DELETIONS_PREFIX}{kbid}")
}

/// Extracts the knowledge box id from a key under `/kbs/` or `/deletions/`.
pub fn kbid_from_key(key: &str) -> Option<&str> {
    let rest = key
        .strip_prefix(KBS_PREFIX)
        .or_else(|| key.strip_prefix(DELETIONS_PREFIX))?;
    let kbid = rest.split('/').next()?;
    if kbid.is_empty() {
        None
    } else {
        Some(kbid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(kb_shards("kb1"), "/kbs/kb1/shards");
        assert_eq!(kb_rollover_shards("kb1"), "/kbs/kb1/rollover/shards");
        assert_eq!(kb_deletion("kb1"), "/deletions/kb1");
        assert!(kb_shards("kb1").starts_with(&kb_keys("kb1")));
    }

    #[test]
    fn test_kbid_from_key() {
        assert_eq!(kbid_from_key("/kbs/kb1/shards"), Some("kb1"));
        assert_eq!(kbid_from_key("/deletions/kb2"), Some("kb2"));
        assert_eq!(kbid_from_key("/kbs/"), None);
        assert_eq!(kbid_from_key("/other/kb1"), None);
    }
}
