//! Heading records collected during conversion and the TOC tree built from them.

use serde::{Deserialize, Serialize};

/// A heading encountered in document order.
///
/// `anchor` is the final id applied to the heading element (header prefix plus
/// document-unique slug), so TOC links and fragment navigation both target it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingRecord {
    pub anchor: String,
    pub level: u8,
    pub text: String,
}

impl HeadingRecord {
    pub fn new(anchor: impl Into<String>, level: u8, text: impl Into<String>) -> Self {
        Self {
            anchor: anchor.into(),
            level,
            text: text.into(),
        }
    }
}

/// One node of the nested table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocNode {
    pub anchor: String,
    pub text: String,
    pub children: Vec<TocNode>,
}
