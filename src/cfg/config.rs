// SPDX-License-Identifier: AGPL-3.0-or-later
// Section-`Set` loading grounded on the teacher's `Config::load_from_file`
// (examples/Masorubka1-iscsi-client-rs/src/cfg/config.rs), generalized from
// one fixed struct to dotted section paths per the data model.

//! Section-based configuration: a YAML document of named sections, each
//! holding ordered key/value entries (duplicates preserved, same as the
//! request header [`Set`][crate::collections::Set]), with typed accessors
//! that apply defaults and validate ranges instead of panicking.

use std::{collections::HashMap, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::collections::Set;

#[derive(Debug, Deserialize)]
struct RawConfig {
    sections: Vec<RawSection>,
}

#[derive(Debug, Deserialize)]
struct RawSection {
    path: String,
    #[serde(default)]
    entries: Vec<(String, String)>,
}

/// A loaded configuration tree: dotted section path (`ns/servers/default`)
/// to the ordered key/value [`Set`] registered under it.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    sections: HashMap<String, Set>,
}

impl ServerConfig {
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::load_from_str(&content)
    }

    pub fn load_from_str(content: &str) -> Result<Self> {
        let raw: RawConfig =
            serde_yaml::from_str(content).context("failed to parse configuration YAML")?;
        let mut sections = HashMap::with_capacity(raw.sections.len());
        for section in raw.sections {
            let mut set = Set::create(Some(&section.path));
            for (key, value) in section.entries {
                set.put(&key, &value);
            }
            sections.insert(section.path, set);
        }
        Ok(Self { sections })
    }

    pub fn section(&self, path: &str) -> Option<&Set> {
        self.sections.get(path)
    }

    /// Integer accessor with a default for a missing section/key and for an
    /// unparseable value.
    pub fn config_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.raw_value(section, key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn config_bool(&self, section: &str, key: &str, default: bool) -> bool {
        match self.raw_value(section, key).map(str::to_ascii_lowercase).as_deref() {
            Some("yes") | Some("true") | Some("1") | Some("on") => true,
            Some("no") | Some("false") | Some("0") | Some("off") => false,
            _ => default,
        }
    }

    /// Parses a memory quantity (`512`, `64kb`, `2mb`, `1gb`, case
    /// insensitive, powers of 1024) and clamps it into `[min, max]`.
    pub fn config_mem_unit_range(
        &self,
        section: &str,
        key: &str,
        default: u64,
        min: u64,
        max: u64,
    ) -> u64 {
        let parsed = self.raw_value(section, key).and_then(parse_mem_unit).unwrap_or(default);
        parsed.clamp(min, max)
    }

    /// Parses a duration (`30`, `30s`, `5m`, `1h`, bare numbers are seconds)
    /// and clamps it into `[min, max]`.
    pub fn config_time_unit_range(
        &self,
        section: &str,
        key: &str,
        default: Duration,
        min: Duration,
        max: Duration,
    ) -> Duration {
        let parsed = self.raw_value(section, key).and_then(parse_time_unit).unwrap_or(default);
        parsed.clamp(min, max)
    }

    fn raw_value(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key)
    }
}

fn parse_mem_unit(raw: &str) -> Option<u64> {
    let raw = raw.trim().to_ascii_lowercase();
    let (digits, mult) = if let Some(n) = raw.strip_suffix("gb") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = raw.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = raw.strip_suffix("kb") {
        (n, 1024)
    } else {
        (raw.as_str(), 1)
    };
    digits.trim().parse::<u64>().ok().map(|n| n * mult)
}

fn parse_time_unit(raw: &str) -> Option<Duration> {
    let raw = raw.trim().to_ascii_lowercase();
    if let Some(n) = raw.strip_suffix("ms") {
        return n.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    let (digits, unit_secs) = if let Some(n) = raw.strip_suffix('h') {
        (n, 3600)
    } else if let Some(n) = raw.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = raw.strip_suffix('s') {
        (n, 1)
    } else {
        (raw.as_str(), 1)
    };
    digits.trim().parse::<u64>().ok().map(|n| Duration::from_secs(n * unit_secs))
}
