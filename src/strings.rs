//! DJB2-hashed string interning table.
//!
//! Grounded on the original's `StringHashTable`: a fixed bucket count, DJB2
//! hashing, and linear in-bucket scanning to fold duplicate strings into a
//! single offset. Offset `0` is reserved for the empty string, matching the
//! original's convention of seeding the table with `""` before interning
//! anything else.

pub const HASH_BUCKETS: u32 = 1024;

/// `h = 5381; h = 33*h + byte` for every byte, as the original computes it.
pub fn djb2(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 5381;
    for &byte in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u32);
    }
    hash
}

fn bucket_of(bytes: &[u8]) -> u32 {
    djb2(bytes) % HASH_BUCKETS
}

/// An append-only, NUL-delimited string blob with hash-bucketed interning:
/// interning the same string twice returns the same offset.
#[derive(Debug, Clone)]
pub struct StringBlob {
    bytes: Vec<u8>,
    buckets: Vec<Vec<u32>>,
}

impl StringBlob {
    pub fn new() -> Self {
        let mut blob = StringBlob {
            bytes: vec![0u8],
            buckets: vec![Vec::new(); HASH_BUCKETS as usize],
        };
        let bucket = bucket_of(b"");
        blob.buckets[bucket as usize].push(0);
        blob
    }

    /// Returns the offset of `s` within the blob, appending it (with its
    /// terminating NUL) if it hasn't been interned yet.
    pub fn intern(&mut self, s: &str) -> u32 {
        let bucket = bucket_of(s.as_bytes()) as usize;
        for &offset in &self.buckets[bucket] {
            if self.get(offset) == s {
                return offset;
            }
        }
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        self.buckets[bucket].push(offset);
        offset
    }

    /// Reads the NUL-terminated string starting at `offset`. Panics if
    /// `offset` doesn't land on a valid entry; callers only ever pass back
    /// offsets this table itself produced.
    pub fn get(&self, offset: u32) -> &str {
        let start = offset as usize;
        let end = self.bytes[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| start + p)
            .unwrap_or(self.bytes.len());
        std::str::from_utf8(&self.bytes[start..end]).unwrap_or("")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.len() <= 1
    }
}

impl Default for StringBlob {
    fn default() -> Self {
        StringBlob::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_zero_is_the_empty_string() {
        let blob = StringBlob::new();
        assert_eq!(blob.get(0), "");
        assert_eq!(blob.as_bytes(), &[0u8]);
    }

    #[test]
    fn interning_the_same_string_twice_reuses_the_offset() {
        let mut blob = StringBlob::new();
        let a = blob.intern("kernel32.dll");
        let b = blob.intern("kernel32.dll");
        assert_eq!(a, b);
        assert_eq!(blob.get(a), "kernel32.dll");
    }

    #[test]
    fn distinct_strings_get_distinct_offsets() {
        let mut blob = StringBlob::new();
        let a = blob.intern("foo.c");
        let b = blob.intern("bar.c");
        assert_ne!(a, b);
        assert_eq!(blob.get(a), "foo.c");
        assert_eq!(blob.get(b), "bar.c");
    }

    #[test]
    fn interning_empty_string_returns_offset_zero() {
        let mut blob = StringBlob::new();
        assert_eq!(blob.intern(""), 0);
    }
}
