use std::fmt;

/// The fixed bit-width that every `normalize`d string is padded/truncated to (§4.6: "default 256
/// bits, i.e. 32 bytes") so that peer ids and clock heads of different natural lengths remain
/// comparable by Hamming distance.
pub const NORMALIZED_WIDTH_BYTES: usize = 32;

/// A logical-network identity, opaque beyond its role as a `hamming`-comparable bit string.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> PeerId {
        PeerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

///
/// Resolved open question (§9 "The source's `normalize_for_comparison`"): a string's UTF-8 bytes
/// are read as a fixed-width, zero-padded-or-truncated bit vector, most-significant-bit first
/// within each byte. This is what makes two peer ids that differ in only their last ASCII digit
/// (e.g. `"0001"` vs. `"0000"`) differ by exactly one bit, rather than by the bit-length of a
/// hash digest.
///
pub fn normalize(s: &str) -> [u8; NORMALIZED_WIDTH_BYTES] {
    let mut out = [0u8; NORMALIZED_WIDTH_BYTES];
    let bytes = s.as_bytes();
    let n = bytes.len().min(NORMALIZED_WIDTH_BYTES);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// The population count of the XOR of two normalized bit vectors (§4.6 step 1).
pub fn hamming(a: &str, b: &str) -> u32 {
    let na = normalize(a);
    let nb = normalize(b);
    na.iter().zip(nb.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hamming_matches_scenario_f() {
        // Scenario F: three peers `0001`, `0010`, `0100` are all at Hamming distance 1 from the
        // announced clock head `0000` because changing one trailing ASCII digit flips exactly the
        // low bit of that byte.
        assert_eq!(hamming("0001", "0000"), 1);
        assert_eq!(hamming("0010", "0000"), 1);
        assert_eq!(hamming("0100", "0000"), 1);
    }

    #[test]
    fn hamming_is_symmetric_and_zero_for_equal_input() {
        assert_eq!(hamming("abc", "abc"), 0);
        assert_eq!(hamming("abc", "abd"), hamming("abd", "abc"));
    }

    #[test]
    fn hamming_handles_different_lengths() {
        // Shorter strings are zero-padded rather than erroring.
        assert_eq!(hamming("", ""), 0);
        let _ = hamming("a-much-longer-peer-identifier-than-thirty-two-bytes", "short");
    }
}
