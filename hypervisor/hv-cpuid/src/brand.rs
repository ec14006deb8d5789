use crate::CpuidResult;

/// The 48-byte processor brand string from CPUID.80000002H–80000004H.
///
/// Used as the lookup key for built-in power-state tables, so the exact
/// bytes matter; only trailing NULs are stripped.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct BrandString {
    bytes: [u8; 48],
}

impl Default for BrandString {
    fn default() -> Self {
        Self { bytes: [0; 48] }
    }
}

impl BrandString {
    #[must_use]
    pub fn from_leaves(leaves: [CpuidResult; 3]) -> Self {
        let mut bytes = [0u8; 48];
        for (chunk, r) in bytes.chunks_exact_mut(16).zip(leaves) {
            chunk[0..4].copy_from_slice(&r.eax.to_le_bytes());
            chunk[4..8].copy_from_slice(&r.ebx.to_le_bytes());
            chunk[8..12].copy_from_slice(&r.ecx.to_le_bytes());
            chunk[12..16].copy_from_slice(&r.edx.to_le_bytes());
        }
        Self { bytes }
    }

    /// The three leaves that would report this string.
    #[must_use]
    pub fn to_leaves(&self) -> [CpuidResult; 3] {
        let word = |i: usize| {
            u32::from_le_bytes([
                self.bytes[i],
                self.bytes[i + 1],
                self.bytes[i + 2],
                self.bytes[i + 3],
            ])
        };
        core::array::from_fn(|leaf| {
            let base = leaf * 16;
            CpuidResult::new(word(base), word(base + 4), word(base + 8), word(base + 12))
        })
    }

    /// Builds a brand string from text, truncated to 48 bytes.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let mut bytes = [0u8; 48];
        let len = text.len().min(bytes.len());
        bytes[..len].copy_from_slice(&text.as_bytes()[..len]);
        Self { bytes }
    }

    /// The brand text without trailing NULs; empty if not valid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> &str {
        let end = self.bytes.iter().position(|&b| b == 0).unwrap_or(self.bytes.len());
        core::str::from_utf8(&self.bytes[..end]).unwrap_or("")
    }
}

impl core::fmt::Debug for BrandString {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("BrandString").field(&self.as_str()).finish()
    }
}
