//! On-disk defaults, consulted once at startup and overridden by CLI flags.
//!
//! Same shape as this project's usual config loader: an optional
//! `~/.config/<name>.toml`, missing entirely is not an error, present but
//! unparseable is.

use std::{fs, io};

use anyhow::{Context, Result, anyhow};
use camino::Utf8PathBuf;
use serde_derive::Deserialize;

#[inline]
fn default_attr_ttl_secs() -> u64 {
    1
}

#[inline]
fn default_verbosity() -> u8 {
    0
}

#[derive(Debug, Deserialize)]
pub struct Configuration {
    /// How long (seconds) the kernel may cache attributes/entries it gets
    /// back from us before asking again.
    #[serde(default = "default_attr_ttl_secs")]
    pub attr_ttl_secs: u64,

    /// Default `-v` level when the CLI doesn't specify one.
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            attr_ttl_secs: default_attr_ttl_secs(),
            verbosity: default_verbosity(),
        }
    }
}

pub fn load() -> Result<Configuration> {
    let mut confpath: Utf8PathBuf = home::home_dir()
        .ok_or_else(|| anyhow!("Can't find home directory"))?
        .try_into()
        .context("Home directory isn't UTF-8")?;
    confpath.extend([".config", "chronofs.toml"]);
    let s = match fs::read_to_string(&confpath) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Configuration::default()),
        found => found,
    }
    .with_context(|| format!("Couldn't open {confpath}"))?;
    toml::from_str(&s).with_context(|| format!("Couldn't parse {confpath}"))
}
