// SPDX-License-Identifier: AGPL-3.0-or-later

//! Builds the null-delimited `(key, segments, filter)` sequence that both
//! insertion and lookup walk through. In the wire form this spec describes
//! as `key '\0' seg1 '\0' ... '\0' filter '\0' '\0'`; here it is simply a
//! small owned struct -- no serialization is needed since everything stays
//! in-process.

/// A parsed `(key, url)` pair ready to be walked against the trie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    /// `key` followed by every url segment except the trailing filter
    /// token -- the path the trie descent walks, branch by branch.
    pub walk_segments: Vec<String>,
    /// The trailing token if it contained `*`/`?`, else the implicit `*`.
    pub filter: String,
}

impl Sequence {
    pub fn build(key: &str, url: &str) -> Self {
        let mut segments: Vec<String> =
            url.split('/').filter(|s| !s.is_empty()).map(String::from).collect();

        let filter = match segments.last() {
            Some(last) if last.contains('*') || last.contains('?') => {
                segments.pop().unwrap_or_default()
            },
            _ => "*".to_string(),
        };

        let mut walk_segments = Vec::with_capacity(segments.len() + 1);
        walk_segments.push(key.to_string());
        walk_segments.extend(segments);

        Self { walk_segments, filter }
    }

    /// The URL segments only (excludes the leading key), used when matching
    /// a channel's filter against intermediate segments for `SEGMENT_MATCH`.
    pub fn url_segments(&self) -> &[String] {
        &self.walk_segments[1..]
    }
}
