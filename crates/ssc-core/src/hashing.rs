//! SHA-256 helpers shared by the ledger hash chain, block hashes and contract code hashes

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of arbitrary bytes
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    format!("{:x}", hasher.finalize())
}

/// Raw SHA-256 digest
pub fn sha256(data: impl AsRef<[u8]>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    hasher.finalize().into()
}

/// Merkle root over hex leaf hashes.
///
/// Pairs are concatenated as hex text and re-hashed; an odd trailing leaf is
/// paired with itself. No leaves yields an empty string.
pub fn merkle_root(leaves: &[String]) -> String {
    if leaves.is_empty() {
        return String::new();
    }

    let mut level: Vec<String> = leaves.to_vec();
    loop {
        let next: Vec<String> = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                sha256_hex(format!("{}{}", left, right))
            })
            .collect();

        if next.len() == 1 {
            return next.into_iter().next().unwrap_or_default();
        }
        level = next;
    }
}
