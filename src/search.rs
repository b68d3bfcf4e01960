use crate::target::MemoryRegion;
use crate::value::Buffer;
use crate::MemEditError;

/// How a needle is compared against memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Byte-for-byte comparison.
    Verbatim,
    /// Decode each candidate with the needle's shape and compare values.
    /// Slower, but ignores padding and compares floats numerically.
    Structural,
}

impl Default for SearchMode {
    fn default() -> Self {
        SearchMode::Verbatim
    }
}

/// Returns every offset at which `needle` occurs in `haystack`, overlapping occurrences included.
pub fn verbatim(needle: &[u8], haystack: &[u8]) -> Vec<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }

    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(offset, _)| offset)
        .collect()
}

/// Returns every offset at which the bytes of `haystack`, decoded with the needle's shape,
/// are equal in value to `needle`.
pub fn structural(needle: &Buffer, haystack: &[u8]) -> Vec<usize> {
    let size = needle.len();
    if size == 0 || size > haystack.len() {
        return Vec::new();
    }

    let expected = needle.value();
    let shape = needle.shape();

    (0..=haystack.len() - size)
        .filter(|&offset| shape.decode(&haystack[offset..offset + size]) == expected)
        .collect()
}

/// Dispatches to [`verbatim`] or [`structural`].
pub fn search(needle: &Buffer, haystack: &[u8], mode: SearchMode) -> Vec<usize> {
    match mode {
        SearchMode::Verbatim => verbatim(needle.as_bytes(), haystack),
        SearchMode::Structural => structural(needle, haystack),
    }
}

/// Checks a single candidate of exactly `needle.len()` bytes.
pub fn matches(needle: &Buffer, candidate: &[u8], mode: SearchMode) -> bool {
    match mode {
        SearchMode::Verbatim => needle.as_bytes() == candidate,
        SearchMode::Structural => {
            candidate.len() == needle.len() && needle.shape().decode(candidate) == needle.value()
        }
    }
}

/// Outcome of searching one region of a process.
#[derive(Debug)]
pub enum RegionScan {
    /// The region was read and searched; `hits` are absolute addresses.
    Scanned {
        region: MemoryRegion,
        hits: Vec<usize>,
    },
    /// The region could not be read, usually because it was unmapped after enumeration.
    Skipped {
        region: MemoryRegion,
        error: MemEditError,
    },
}

impl RegionScan {
    pub fn region(&self) -> &MemoryRegion {
        match self {
            RegionScan::Scanned { region, .. } | RegionScan::Skipped { region, .. } => region,
        }
    }

    pub fn hits(&self) -> &[usize] {
        match self {
            RegionScan::Scanned { hits, .. } => hits,
            RegionScan::Skipped { .. } => &[],
        }
    }
}
