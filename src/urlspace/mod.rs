// SPDX-License-Identifier: AGPL-3.0-or-later

//! URL space: per-server trie mapping `(key, url)` pairs to registered data,
//! gated by optional context constraints.

pub mod context;
pub mod sequence;
pub mod trie;

pub use context::{ContextSpec, RequestContext, glob_match};
pub use sequence::Sequence;
pub use trie::{ChannelFlags, MatchInfo, UnsetMode, UrlSpace};
