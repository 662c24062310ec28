use sha2::{Digest, Sha256};

use crate::model::CellModel;

/// Reduce a [`CellModel`] to a stable content hash.
///
/// The model is serialised canonically — worksheet names sorted, coordinates
/// sorted within each worksheet, entries as `{"formula": …, "value": …}` —
/// and digested with SHA-256. The result is lowercase hex, stable across runs
/// and platforms, and independent of worksheet read order.
pub fn fingerprint(model: &CellModel) -> String {
    let canonical = model.as_sorted_map();
    let json = serde_json::to_string(&canonical)
        .expect("canonical cell model serialization cannot fail");

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}
