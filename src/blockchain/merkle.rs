use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest
pub const DIGEST_HEX_LEN: usize = 64;

/// Hashes the given bytes with SHA-256
///
/// # Returns
///
/// The digest as a lowercase hexadecimal string
pub fn digest(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    format!("{:x}", hasher.finalize())
}

/// Computes the Merkle root over an ordered list of leaf digests
///
/// Each parent is the digest of its children's hex strings concatenated.
/// A layer with an odd count pairs its last element with itself, so a
/// single leaf `a` yields `digest(a ‖ a)`. An empty list yields `digest("")`.
pub fn merkle_root(leaves: &[String]) -> String {
    if leaves.is_empty() {
        return digest("");
    }

    let mut layer = leaves.to_vec();
    loop {
        layer = layer
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                digest(format!("{}{}", left, right))
            })
            .collect();

        if layer.len() == 1 {
            return layer.swap_remove(0);
        }
    }
}

/// Checks whether a hash has at least `difficulty` leading `'0'` characters
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}
