//! Merkle root over envelope hashes, used as a block's data hash.

use crate::hash::{hash_concat, Hash};

/// Compute the merkle root of a list of leaf hashes.
///
/// An empty list yields the zero hash; a single leaf is its own root. An odd
/// node at any level is paired with itself.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    match leaves {
        [] => Hash::ZERO,
        [only] => *only,
        _ => {
            let mut level = leaves.to_vec();
            while level.len() > 1 {
                level = level
                    .chunks(2)
                    .map(|pair| {
                        let right = pair.get(1).unwrap_or(&pair[0]);
                        hash_concat(&[pair[0].as_ref(), right.as_ref()])
                    })
                    .collect();
            }
            level[0]
        }
    }
}
