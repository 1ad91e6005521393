//! Cursor-based pagination over a [`FeatureSet`].

use crate::cursor::{decode_name_cursor, encode_name_cursor};
use crate::features::FeatureSet;
use ferromcp_protocol::Result;

/// One page of items plus the cursor for the following page.
#[derive(Debug)]
pub struct Page<T> {
    /// Items of this page, in key order
    pub items: Vec<T>,
    /// Cursor for the next page; `None` when this page is the last
    pub next_cursor: Option<String>,
}

/// Produce one bounded page from a feature set.
///
/// An absent cursor means start from the beginning. A cursor naming a key
/// that no longer exists is still valid: the page holds the items strictly
/// greater than the absent key. The next cursor is set only when at least
/// one item remains after the page.
pub fn paginate<T: Clone>(
    set: &FeatureSet<T>,
    cursor: Option<&str>,
    page_size: usize,
) -> Result<Page<T>> {
    let after = match cursor {
        Some(c) => Some(decode_name_cursor(c)?),
        None => None,
    };

    let mut remaining = match after.as_deref() {
        Some(key) => set.above(key),
        None => set.all(),
    };

    let has_more = remaining.len() > page_size;
    remaining.truncate(page_size);

    let next_cursor = if has_more {
        remaining.last().map(|item| encode_name_cursor(&set.key_of(item)))
    } else {
        None
    };

    Ok(Page {
        items: remaining,
        next_cursor,
    })
}
