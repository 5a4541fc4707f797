//! Wildcard byte patterns (`"48 8B ?? 10 00 00 00"`).
//!
//! A pattern is a list of fixed bytes plus a mask; masked-out positions match
//! anything. Searching is stateless and returns every matching start offset.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Malformed signature pattern text. These are data errors in a signature
/// file and are raised rather than silently matching nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("Signature pattern is empty")]
    Empty,

    #[error("Invalid signature token '{token}' at position {position}")]
    InvalidToken { token: String, position: usize },
}

/// Parsed pattern: `bytes[i]` is only compared where `mask[i]` is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    bytes: Vec<u8>,
    mask: Vec<bool>,
}

impl Pattern {
    /// Parse whitespace-separated tokens: `??`/`?` are wildcards, two hex
    /// digits are a fixed byte.
    pub fn parse(text: &str) -> Result<Self, PatternError> {
        let mut bytes = Vec::new();
        let mut mask = Vec::new();
        for (position, token) in text.split_whitespace().enumerate() {
            if token == "??" || token == "?" {
                bytes.push(0);
                mask.push(false);
                continue;
            }
            if token.len() != 2 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(PatternError::InvalidToken { token: token.to_string(), position });
            }
            let value = u8::from_str_radix(token, 16)
                .map_err(|_| PatternError::InvalidToken { token: token.to_string(), position })?;
            bytes.push(value);
            mask.push(true);
        }

        if bytes.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self { bytes, mask })
    }

    /// Pattern matching `raw` exactly.
    pub fn from_bytes(raw: &[u8]) -> Self {
        Self { bytes: raw.to_vec(), mask: vec![true; raw.len()] }
    }

    /// Pattern matching `raw` with positions in `wildcard` masked out.
    pub fn with_wildcards(raw: &[u8], wildcard: Range<usize>) -> Self {
        let mut pattern = Self::from_bytes(raw);
        for i in wildcard {
            if let Some(m) = pattern.mask.get_mut(i) {
                *m = false;
                pattern.bytes[i] = 0;
            }
        }
        pattern
    }

    /// Concatenate patterns in order.
    pub fn concat(parts: &[&Pattern]) -> Self {
        let mut out = Self { bytes: Vec::new(), mask: Vec::new() };
        for part in parts {
            out.bytes.extend_from_slice(&part.bytes);
            out.mask.extend_from_slice(&part.mask);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// Compare masked-in positions of the pattern against `buffer[offset..]`.
    pub fn matches_at(&self, buffer: &[u8], offset: usize) -> bool {
        let Some(end) = offset.checked_add(self.len()) else { return false };
        if end > buffer.len() {
            return false;
        }
        let window = &buffer[offset..end];
        self.bytes
            .iter()
            .zip(&self.mask)
            .zip(window)
            .all(|((&expected, &fixed), &actual)| !fixed || expected == actual)
    }

    /// Every start offset in `range` where the whole pattern fits in `range`
    /// and matches. Offsets are absolute within `buffer`, ascending.
    pub fn find_all(&self, buffer: &[u8], range: Range<usize>) -> Vec<usize> {
        let end = range.end.min(buffer.len());
        let start = range.start.min(end);
        if self.is_empty() || end - start < self.len() {
            return Vec::new();
        }
        let last_start = end - self.len();

        // Anchor on the first fixed byte so the scan can use memchr.
        match self.mask.iter().position(|&fixed| fixed) {
            Some(anchor) => {
                let haystack = &buffer[start + anchor..=last_start + anchor];
                memchr::memchr_iter(self.bytes[anchor], haystack)
                    .map(|hit| start + hit)
                    .filter(|&pos| self.matches_at(buffer, pos))
                    .collect()
            }
            None => (start..=last_start).collect(),
        }
    }

    /// First contiguous run of wildcard positions, as a range into the pattern.
    pub fn wildcard_run(&self) -> Option<Range<usize>> {
        let begin = self.mask.iter().position(|&fixed| !fixed)?;
        let len = self.mask[begin..].iter().take_while(|&&fixed| !fixed).count();
        Some(begin..begin + len)
    }

    /// Read the first wildcard run at a match as a little-endian signed value.
    ///
    /// Width is inferred from the run length; only 1, 2 and 4 byte runs yield
    /// a value.
    pub fn extract_displacement(&self, buffer: &[u8], match_offset: usize) -> Option<i64> {
        let run = self.wildcard_run()?;
        let start = match_offset.checked_add(run.start)?;
        let raw = buffer.get(start..start.checked_add(run.len())?)?;
        match raw.len() {
            1 => Some(i64::from(raw[0] as i8)),
            2 => Some(i64::from(i16::from_le_bytes([raw[0], raw[1]]))),
            4 => Some(i64::from(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))),
            _ => None,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (byte, fixed)) in self.bytes.iter().zip(&self.mask).enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if *fixed {
                write!(f, "{byte:02X}")?;
            } else {
                f.write_str("??")?;
            }
        }
        Ok(())
    }
}

/// Hex-encode raw bytes in pattern syntax (no wildcards).
pub fn format_bytes(raw: &[u8]) -> String {
    Pattern::from_bytes(raw).to_string()
}
