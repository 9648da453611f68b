//! Settings of a rendering context.
//!
//! Read from an optional JSON file, then overridden from `HN_*` env
//! vars. Missing fields take the defaults below.

use std::path::Path;
use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};

use crate::util::{getenv, getenv_parsed};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnConfig {
    /// Kind of records holding element templates (addressable, with
    /// the template name in their `d` tag).
    pub template_kind: u32,
    /// Kind of records published by forms that don't declare one.
    pub note_kind: u32,
    /// Link target of `hn-a` and `hn-ref`; `{}` is replaced by the
    /// value.
    pub viewer_url: String,
    /// chrono format string for `hn-time`, applied in UTC.
    pub time_format: String,
}

impl Default for HnConfig {
    fn default() -> Self {
        HnConfig {
            template_kind: 32616,
            note_kind: 1,
            viewer_url: "https://njump.me/{}".into(),
            time_format: "%Y-%m-%d %H:%M:%S".into(),
        }
    }
}

impl HnConfig {
    pub fn from_file(path: &Path) -> Result<HnConfig> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {path:?}"))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config file {path:?}"))
    }

    /// Override fields from `HN_TEMPLATE_KIND`, `HN_NOTE_KIND`,
    /// `HN_VIEWER_URL` and `HN_TIME_FORMAT`.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = getenv_parsed("HN_TEMPLATE_KIND")? {
            self.template_kind = v;
        }
        if let Some(v) = getenv_parsed("HN_NOTE_KIND")? {
            self.note_kind = v;
        }
        if let Some(v) = getenv("HN_VIEWER_URL")? {
            self.viewer_url = v;
        }
        if let Some(v) = getenv("HN_TIME_FORMAT")? {
            self.time_format = v;
        }
        Ok(())
    }

    /// File (if given) plus env overrides.
    pub fn load(path: Option<&Path>) -> Result<HnConfig> {
        let mut config = match path {
            Some(path) => HnConfig::from_file(path)?,
            None => HnConfig::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn viewer_link(&self, value: &str) -> String {
        if self.viewer_url.contains("{}") {
            self.viewer_url.replace("{}", value)
        } else {
            format!("{}{}", self.viewer_url, value)
        }
    }
}
