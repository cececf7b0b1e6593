//! How cache keys map onto file names.

use sha2::{Digest, Sha256};

/// Length of the hex digest prefix used by the hashed layout.
const HASH_STEM_LEN: usize = 40;

/// Longest sanitized stem the basic layout will produce.
const BASIC_STEM_MAX: usize = 180;

/// File naming strategy for cache entries.
///
/// `Basic` mirrors the key into a sanitized file name and cannot tell two
/// keys apart once sanitization collapses them. `Hashed` names files after
/// a digest and resolves digest collisions with a `_N` suffix, checking the
/// true key stored in the policy file; it is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheLayout {
    Basic,
    #[default]
    Hashed,
}

impl CacheLayout {
    /// The file stem for `key` at collision slot `n` (`n == 0` is the
    /// unsuffixed name; the basic layout has no further slots).
    pub fn stem(&self, key: &str, n: u32) -> Option<String> {
        match self {
            CacheLayout::Basic => (n == 0).then(|| sanitize(key)),
            CacheLayout::Hashed => {
                let digest = Sha256::digest(key.as_bytes());
                let mut stem = hex(&digest);
                stem.truncate(HASH_STEM_LEN);
                if n > 0 {
                    stem.push('_');
                    stem.push_str(&n.to_string());
                }
                Some(stem)
            }
        }
    }
}

fn sanitize(key: &str) -> String {
    let mut stem: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    stem.truncate(BASIC_STEM_MAX);
    stem
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_layout_sanitizes_and_has_one_slot() {
        let layout = CacheLayout::Basic;
        assert_eq!(
            layout.stem("http://a.test/img.png?x=1", 0).unwrap(),
            "http___a_test_img_png_x_1"
        );
        assert!(layout.stem("anything", 1).is_none());
    }

    #[test]
    fn hashed_layout_is_fixed_length_hex_with_suffix_slots() {
        let layout = CacheLayout::Hashed;
        let stem = layout.stem("http://a.test/img.png", 0).unwrap();
        assert_eq!(stem.len(), HASH_STEM_LEN);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            layout.stem("http://a.test/img.png", 2).unwrap(),
            format!("{stem}_2")
        );
        // Stable across calls, distinct across keys.
        assert_eq!(layout.stem("http://a.test/img.png", 0).unwrap(), stem);
        assert_ne!(layout.stem("http://b.test/img.png", 0).unwrap(), stem);
    }
}
