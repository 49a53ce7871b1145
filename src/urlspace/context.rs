// SPDX-License-Identifier: AGPL-3.0-or-later

//! Context constraint specs gate which data a trie lookup returns: an IP/CIDR
//! match, a glob match against a header value, or a conjunction of either.

use std::{
    cmp::Ordering,
    net::{Ipv4Addr, Ipv6Addr},
};

use crate::collections::Set;

/// One constraint, ordered per the rules in the data model: type class
/// (IPv6 > IPv4 > Header > Conjunction), then decreasing specificity, then
/// lexicographic tiebreaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextSpec {
    Ipv4 {
        addr: Ipv4Addr,
        mask: Ipv4Addr,
        specificity: u32,
    },
    Ipv6 {
        addr: Ipv6Addr,
        mask: u128,
        specificity: u32,
    },
    Header {
        field: String,
        pattern: String,
    },
    Conjunction(Vec<ContextSpec>),
}

impl ContextSpec {
    pub fn ipv4_cidr(addr: Ipv4Addr, prefix_bits: u32) -> Self {
        let mask = if prefix_bits == 0 {
            0
        } else {
            u32::MAX << (32 - prefix_bits)
        };
        Self::Ipv4 {
            addr,
            mask: Ipv4Addr::from(mask),
            specificity: prefix_bits,
        }
    }

    pub fn ipv6_cidr(addr: Ipv6Addr, prefix_bits: u32) -> Self {
        let mask = if prefix_bits == 0 {
            0
        } else {
            u128::MAX << (128 - prefix_bits)
        };
        Self::Ipv6 {
            addr,
            mask,
            specificity: prefix_bits,
        }
    }

    pub fn header(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Header {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Specificity = count of non-`*` chars in the header pattern.
    fn header_specificity(pattern: &str) -> u32 {
        pattern.chars().filter(|&c| c != '*').count() as u32
    }

    fn specificity(&self) -> u32 {
        match self {
            ContextSpec::Ipv4 { specificity, .. } => *specificity,
            ContextSpec::Ipv6 { specificity, .. } => *specificity,
            ContextSpec::Header { pattern, .. } => Self::header_specificity(pattern),
            ContextSpec::Conjunction(subs) => subs.iter().map(ContextSpec::specificity).sum(),
        }
    }

    fn class_rank(&self) -> u8 {
        match self {
            ContextSpec::Ipv6 { .. } => 0,
            ContextSpec::Ipv4 { .. } => 1,
            ContextSpec::Header { .. } => 2,
            ContextSpec::Conjunction(_) => 3,
        }
    }

    fn lexical_key(&self) -> String {
        match self {
            ContextSpec::Ipv4 { addr, mask, .. } => format!("{addr}/{mask}"),
            ContextSpec::Ipv6 { addr, mask, .. } => format!("{addr}/{mask:x}"),
            ContextSpec::Header { field, pattern } => format!("{field}:{pattern}"),
            ContextSpec::Conjunction(subs) => subs
                .iter()
                .map(ContextSpec::lexical_key)
                .collect::<Vec<_>>()
                .join("&"),
        }
    }

    /// Orders `self` relative to `other` for constraint-index placement:
    /// `Less` means `self` is tried before `other` (higher priority).
    pub fn priority_cmp(&self, other: &ContextSpec) -> Ordering {
        self.class_rank()
            .cmp(&other.class_rank())
            .then_with(|| other.specificity().cmp(&self.specificity()))
            .then_with(|| match (self, other) {
                (ContextSpec::Conjunction(a), ContextSpec::Conjunction(b)) => {
                    b.len().cmp(&a.len())
                },
                _ => Ordering::Equal,
            })
            .then_with(|| self.lexical_key().cmp(&other.lexical_key()))
    }

    /// Evaluates this spec against a request context. Conjunctions
    /// short-circuit AND; a missing required input (no peer address for an
    /// IP spec, no header set for a header spec) evaluates to `false`.
    pub fn matches(&self, ctx: &RequestContext) -> bool {
        match self {
            ContextSpec::Ipv4 { addr, mask, .. } => match ctx.peer_v4() {
                Some(peer) => (u32::from(peer) & u32::from(*mask)) == u32::from(*addr),
                None => false,
            },
            ContextSpec::Ipv6 { addr, mask, .. } => match ctx.peer_v6() {
                Some(peer) => (u128::from(peer) & *mask) == u128::from(*addr),
                None => false,
            },
            ContextSpec::Header { field, pattern } => match &ctx.headers {
                Some(headers) => headers
                    .i_get(field)
                    .is_some_and(|v| glob_match(pattern, v)),
                None => false,
            },
            ContextSpec::Conjunction(subs) => subs.iter().all(|s| s.matches(ctx)),
        }
    }
}

/// The `{peer sockaddr?, header set?}` evaluated against constraint specs.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub peer: Option<std::net::IpAddr>,
    pub headers: Option<Set>,
}

impl RequestContext {
    fn peer_v4(&self) -> Option<Ipv4Addr> {
        match self.peer {
            Some(std::net::IpAddr::V4(v4)) => Some(v4),
            _ => None,
        }
    }

    fn peer_v6(&self) -> Option<Ipv6Addr> {
        match self.peer {
            Some(std::net::IpAddr::V6(v6)) => Some(v6),
            _ => None,
        }
    }
}

/// Minimal `*`/`?` glob matcher (no char classes), sufficient for trailing
/// filters (`*.html`) and header-value patterns.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_inner(&p, &t)
}

fn glob_match_inner(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => {
            glob_match_inner(&p[1..], t) || (!t.is_empty() && glob_match_inner(p, &t[1..]))
        },
        Some('?') => !t.is_empty() && glob_match_inner(&p[1..], &t[1..]),
        Some(c) => t.first() == Some(c) && glob_match_inner(&p[1..], &t[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_prefers_ipv6_over_ipv4_over_header_over_conjunction() {
        let ipv6 = ContextSpec::ipv6_cidr(Ipv6Addr::LOCALHOST, 64);
        let ipv4 = ContextSpec::ipv4_cidr(Ipv4Addr::new(10, 0, 0, 0), 24);
        let header = ContextSpec::header("X-NS-Role", "*");
        let conj = ContextSpec::Conjunction(vec![header.clone()]);

        let mut specs = vec![conj.clone(), header.clone(), ipv4.clone(), ipv6.clone()];
        specs.sort_by(ContextSpec::priority_cmp);
        assert_eq!(specs, vec![ipv6, ipv4, header, conj]);
    }

    #[test]
    fn greater_specificity_wins_within_class() {
        let broad = ContextSpec::ipv4_cidr(Ipv4Addr::new(10, 0, 0, 0), 8);
        let narrow = ContextSpec::ipv4_cidr(Ipv4Addr::new(10, 0, 0, 0), 24);
        assert_eq!(narrow.priority_cmp(&broad), Ordering::Less);
    }

    #[test]
    fn ipv4_cidr_matches_peer_in_range() {
        let spec = ContextSpec::ipv4_cidr(Ipv4Addr::new(10, 0, 0, 0), 24);
        let mut ctx = RequestContext::default();
        ctx.peer = Some(Ipv4Addr::new(10, 0, 0, 5).into());
        assert!(spec.matches(&ctx));
        ctx.peer = Some(Ipv4Addr::new(192, 0, 2, 1).into());
        assert!(!spec.matches(&ctx));
    }

    #[test]
    fn header_spec_uses_case_insensitive_glob() {
        let spec = ContextSpec::header("X-Ns-Ip", "10.0.*");
        let mut headers = Set::create(None);
        headers.put("x-ns-ip", "10.0.0.5");
        let ctx = RequestContext {
            peer: None,
            headers: Some(headers),
        };
        assert!(spec.matches(&ctx));
    }

    #[test]
    fn conjunction_short_circuits_on_missing_input() {
        let spec = ContextSpec::Conjunction(vec![ContextSpec::header("X-A", "*")]);
        let ctx = RequestContext::default();
        assert!(!spec.matches(&ctx));
    }

    #[test]
    fn glob_matches_star_and_question_mark() {
        assert!(glob_match("*.html", "a.html"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("*", "anything"));
    }
}
