//! Content address validation
//!
//! Catalog rows carry CIDs as free text. Anything that does not parse as a
//! CID (v0 base58 `Qm...` or multibase v1 `baf...`) is rejected here so it
//! never reaches the gateway or the ledger.

use cid::Cid;
use std::str::FromStr;

use crate::error::{MigrateError, Result};

/// Validate a content address and return it in canonical string form.
///
/// Surrounding whitespace is ignored. The canonical form is the CID's own
/// `Display` output, so the same content always maps to the same key.
pub fn parse_content_address(addr: &str) -> Result<String> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(MigrateError::InvalidAddress {
            address: addr.to_string(),
            reason: "empty".into(),
        });
    }

    let cid = Cid::from_str(trimmed).map_err(|e| MigrateError::InvalidAddress {
        address: addr.to_string(),
        reason: e.to_string(),
    })?;

    Ok(cid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cid::multihash::Multihash;

    fn raw_cid(fill: u8) -> String {
        let digest = Multihash::<64>::wrap(0x12, &[fill; 32]).unwrap();
        Cid::new_v1(0x55, digest).to_string()
    }

    #[test]
    fn test_accepts_v1() {
        let addr = raw_cid(7);
        assert!(addr.starts_with("baf"));
        assert_eq!(parse_content_address(&addr).unwrap(), addr);
    }

    #[test]
    fn test_accepts_v0() {
        let v0 = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";
        assert_eq!(parse_content_address(v0).unwrap(), v0);
    }

    #[test]
    fn test_trims_whitespace() {
        let addr = raw_cid(1);
        assert_eq!(parse_content_address(&format!("  {}\n", addr)).unwrap(), addr);
    }

    #[test]
    fn test_rejects_garbage() {
        for raw in ["not-a-cid", "", "   ", "sha256-abc123"] {
            assert!(parse_content_address(raw).is_err(), "{:?} accepted", raw);
        }
    }

    #[test]
    fn test_error_keeps_original_text() {
        match parse_content_address("not-a-cid") {
            Err(MigrateError::InvalidAddress { address, .. }) => assert_eq!(address, "not-a-cid"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
