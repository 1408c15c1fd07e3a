//! Staleness Evaluator
//!
//! Decides whether a stored blob can be served for the window a request
//! currently needs. This is strict equality, not a freshness policy: any
//! change of window is a full miss.

use crate::cache::{CachedBlob, ValidityWindow};

// == Usability ==
/// Outcome of checking a stored blob against the desired window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usability {
    /// Nothing stored yet
    Missing,
    /// Stored entry has no payload
    Empty,
    /// Stored window differs from the desired one
    WindowChanged,
    /// Payload does not start with the PNG signature
    CorruptHeader,
    /// Safe to serve
    Fresh,
}

impl Usability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Usability::Missing => "missing",
            Usability::Empty => "empty",
            Usability::WindowChanged => "window_changed",
            Usability::CorruptHeader => "corrupt_header",
            Usability::Fresh => "fresh",
        }
    }
}

/// Classifies `blob` against `desired`.
///
/// Windows are compared as literal strings; `2024-1-1` and `2024-01-01` are
/// different windows.
pub fn evaluate(blob: Option<&CachedBlob>, desired: &ValidityWindow) -> Usability {
    let Some(blob) = blob else {
        return Usability::Missing;
    };

    if blob.bytes.is_empty() {
        Usability::Empty
    } else if &blob.window != desired {
        Usability::WindowChanged
    } else if !blob.is_png() {
        Usability::CorruptHeader
    } else {
        Usability::Fresh
    }
}

/// Returns the payload of `blob` if it may be served for `desired`.
pub fn is_usable<'a>(blob: Option<&'a CachedBlob>, desired: &ValidityWindow) -> Option<&'a [u8]> {
    match evaluate(blob, desired) {
        Usability::Fresh => blob.map(|b| b.bytes.as_slice()),
        _ => None,
    }
}
