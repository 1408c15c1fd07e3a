//! Cached Blob Module
//!
//! Validity windows and the `"<start>,<end>;" + png` framing used for
//! blobs stored in the pool and report tables.

use std::fmt;

use serde::{Deserialize, Serialize};

// == Constants ==
/// Magic bytes every PNG payload starts with.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Separates the window header from the image payload.
const HEADER_TERMINATOR: u8 = b';';

/// Returns true if `bytes` begins with the PNG signature.
pub fn has_png_signature(bytes: &[u8]) -> bool {
    bytes.starts_with(&PNG_SIGNATURE)
}

// == Validity Window ==
/// The `[start, end]` date pair a blob was rendered for.
///
/// Dates are kept as the literal strings they were rendered with; two windows
/// are equal only if both strings match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub start: String,
    pub end: String,
}

impl ValidityWindow {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

impl fmt::Display for ValidityWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

// == Cached Blob ==
/// A rendered chart together with the window it claims to cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBlob {
    pub window: ValidityWindow,
    pub bytes: Vec<u8>,
}

impl CachedBlob {
    pub fn new(window: ValidityWindow, bytes: Vec<u8>) -> Self {
        Self { window, bytes }
    }

    // == Encode ==
    /// Encodes the blob as stored in a table row: `"<start>,<end>;"` followed
    /// by the raw image bytes.
    pub fn encode(&self) -> Vec<u8> {
        let header = format!("{},{};", self.window.start, self.window.end);
        let mut out = Vec::with_capacity(header.len() + self.bytes.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.bytes);
        out
    }

    // == Decode ==
    /// Decodes a table row value.
    ///
    /// Returns `None` for empty data or data without a readable window header.
    /// The payload is not validated here; that is the staleness check's job.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }

        let split = raw.iter().position(|b| *b == HEADER_TERMINATOR)?;
        let header = std::str::from_utf8(&raw[..split]).ok()?;
        let (start, end) = header.split_once(',')?;

        Some(Self {
            window: ValidityWindow::new(start, end),
            bytes: raw[split + 1..].to_vec(),
        })
    }

    /// Returns true if the payload starts with the PNG signature.
    pub fn is_png(&self) -> bool {
        has_png_signature(&self.bytes)
    }
}
