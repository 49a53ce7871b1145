// SPDX-License-Identifier: AGPL-3.0-or-later

//! An ordered sequence of `(name, value)` string fields with an optional
//! name tag. Backs request/response headers, the auth field list, and
//! configuration sections. Duplicate names are permitted; index-based
//! access is stable across `put`/`update`/`delete`.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Set {
    name: Option<String>,
    fields: Vec<(String, String)>,
}

impl Set {
    pub fn create(name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
            fields: Vec::new(),
        }
    }

    pub fn create_sz(name: Option<&str>, capacity: usize) -> Self {
        Self {
            name: name.map(str::to_string),
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Re-initializes `self`, optionally adopting the capacity of `from`.
    pub fn recreate(to_name: Option<&str>, from: &Set) -> Self {
        Self::create_sz(to_name, from.fields.capacity())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn key_at(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(|(k, _)| k.as_str())
    }

    pub fn value_at(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(|(_, v)| v.as_str())
    }

    /// Appends `(key, value)`; returns the inserted index.
    pub fn put(&mut self, key: &str, value: &str) -> usize {
        self.fields.push((key.to_string(), value.to_string()));
        self.fields.len() - 1
    }

    fn first_index(&self, key: &str, case_insensitive: bool) -> Option<usize> {
        self.fields.iter().position(|(k, _)| {
            if case_insensitive {
                k.eq_ignore_ascii_case(key)
            } else {
                k == key
            }
        })
    }

    /// Replaces the first occurrence's value if `key` is present (matched
    /// case-sensitively); otherwise appends. Returns the affected index.
    pub fn update(&mut self, key: &str, value: &str) -> usize {
        match self.first_index(key, false) {
            Some(idx) => {
                self.fields[idx].1 = value.to_string();
                idx
            },
            None => self.put(key, value),
        }
    }

    /// Case-insensitive variant of [`Set::update`].
    pub fn i_update(&mut self, key: &str, value: &str) -> usize {
        match self.first_index(key, true) {
            Some(idx) => {
                self.fields[idx].1 = value.to_string();
                idx
            },
            None => self.put(key, value),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.first_index(key, false).map(|i| self.fields[i].1.as_str())
    }

    pub fn i_get(&self, key: &str) -> Option<&str> {
        self.first_index(key, true).map(|i| self.fields[i].1.as_str())
    }

    pub fn find(&self, key: &str) -> Option<usize> {
        self.first_index(key, false)
    }

    pub fn i_find(&self, key: &str) -> Option<usize> {
        self.first_index(key, true)
    }

    /// Removes the field at `index`. Returns `false` if out of range.
    pub fn delete(&mut self, index: usize) -> bool {
        if index < self.fields.len() {
            self.fields.remove(index);
            true
        } else {
            false
        }
    }

    pub fn delete_key(&mut self, key: &str) -> bool {
        match self.first_index(key, false) {
            Some(idx) => self.delete(idx),
            None => false,
        }
    }

    pub fn i_delete_key(&mut self, key: &str) -> bool {
        match self.first_index(key, true) {
            Some(idx) => self.delete(idx),
            None => false,
        }
    }

    /// For every key in `low` absent (case-sensitively) from `high`, copies
    /// it into `high`.
    pub fn merge(high: &mut Set, low: &Set) {
        for (k, v) in &low.fields {
            if high.find(k).is_none() {
                high.put(k, v);
            }
        }
    }

    /// Groups fields by the `sep`-prefixed run of consecutive keys sharing a
    /// prefix up to and including `sep`; fields without `sep` in their key
    /// fall into a final `Set` named after `self`.
    pub fn split(&self, sep: char) -> Vec<Set> {
        let mut groups: Vec<(String, Set)> = Vec::new();
        for (k, v) in &self.fields {
            let prefix = match k.find(sep) {
                Some(pos) => k[..=pos].to_string(),
                None => String::new(),
            };
            match groups.iter_mut().find(|(p, _)| *p == prefix) {
                Some((_, set)) => {
                    set.put(k, v);
                },
                None => {
                    let mut set = Set::create(Some(&prefix));
                    set.put(k, v);
                    groups.push((prefix, set));
                },
            }
        }
        groups.into_iter().map(|(_, s)| s).collect()
    }

    /// Appends `name` (if `with_name`) then each `key sep value\n` line,
    /// each prefixed with `lead`, to `out`.
    pub fn format(&self, out: &mut String, with_name: bool, lead: &str, sep: &str) {
        if with_name {
            out.push_str(lead);
            out.push_str(self.name.as_deref().unwrap_or(""));
            out.push('\n');
        }
        for (k, v) in &self.fields {
            out.push_str(lead);
            out.push_str(k);
            out.push_str(sep);
            out.push_str(v);
            out.push('\n');
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_preserves_insertion_order() {
        let mut s = Set::create(None);
        s.put("a", "1");
        s.put("b", "2");
        s.put("a", "3");
        let all: Vec<_> = s.iter().collect();
        assert_eq!(all, vec![("a", "1"), ("b", "2"), ("a", "3")]);
    }

    #[test]
    fn update_replaces_first_occurrence_only() {
        let mut s = Set::create(None);
        s.put("a", "1");
        s.put("a", "2");
        s.update("a", "9");
        assert_eq!(s.get("a"), Some("9"));
        assert_eq!(s.value_at(1), Some("2"));
    }

    #[test]
    fn i_get_is_case_insensitive() {
        let mut s = Set::create(None);
        s.put("Content-Type", "text/plain");
        assert_eq!(s.i_get("content-type"), Some("text/plain"));
        assert_eq!(s.get("content-type"), None);
    }

    #[test]
    fn merge_only_copies_absent_keys() {
        let mut high = Set::create(None);
        high.put("a", "high");
        let mut low = Set::create(None);
        low.put("a", "low");
        low.put("b", "low");
        Set::merge(&mut high, &low);
        assert_eq!(high.get("a"), Some("high"));
        assert_eq!(high.get("b"), Some("low"));
    }

    #[test]
    fn delete_key_removes_one_occurrence() {
        let mut s = Set::create(None);
        s.put("a", "1");
        s.put("a", "2");
        assert!(s.delete_key("a"));
        assert_eq!(s.len(), 1);
        assert_eq!(s.get("a"), Some("2"));
    }

    #[test]
    fn split_groups_by_separator_prefix() {
        let mut s = Set::create(None);
        s.put("ns.servers.default.modules", "m1");
        s.put("ns.servers.default.port", "8080");
        s.put("ns.threads.max", "8");
        let groups = s.split('.');
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn format_emits_lines_with_separator() {
        let mut s = Set::create(Some("headers"));
        s.put("Host", "example.com");
        let mut out = String::new();
        s.format(&mut out, true, "", ": ");
        assert_eq!(out, "headers\nHost: example.com\n");
    }
}
