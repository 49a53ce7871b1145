// SPDX-License-Identifier: AGPL-3.0-or-later
// Minimal path/flag helpers in the style of the teacher's
// `resolve_config_path` (examples/Masorubka1-iscsi-client-rs/src/cfg/cli.rs)
// -- a focused function, not a parsing framework.

//! Hand-rolled parsing for the server executable's flags: `-c` config path,
//! `-f` foreground, `-u`/`-g` privilege drop, `-r` chroot, `-s` server name.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub foreground: bool,
    pub user: Option<String>,
    pub group: Option<String>,
    pub chroot: Option<PathBuf>,
    pub server: Option<String>,
}

pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);
    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir().context("cannot get current working dir")?.join(p)
    };
    abs.canonicalize().with_context(|| format!("failed to canonicalize path {abs:?}"))
}

/// Parses `argv` (excluding argv[0]) into [`CliArgs`]. Unknown flags and
/// flags missing their required value are rejected.
pub fn parse_args(argv: &[String]) -> Result<CliArgs> {
    let mut args = CliArgs::default();
    let mut iter = argv.iter();
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "-c" => {
                let v = iter.next().context("-c requires a configuration path")?;
                args.config_path = Some(PathBuf::from(v));
            },
            "-f" => args.foreground = true,
            "-u" => {
                args.user = Some(iter.next().context("-u requires a user name")?.clone());
            },
            "-g" => {
                args.group = Some(iter.next().context("-g requires a group name")?.clone());
            },
            "-r" => {
                let v = iter.next().context("-r requires a chroot path")?;
                args.chroot = Some(PathBuf::from(v));
            },
            "-s" => {
                args.server = Some(iter.next().context("-s requires a server name")?.clone());
            },
            other => bail!("unrecognized argument: {other}"),
        }
    }
    Ok(args)
}
