use serde::Serialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::warn;

use crate::rules::ForwardingRule;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid rule id {index} ({len} rules stored)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("encode rules: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The rules file: a JSON array loaded and rewritten whole on every change.
#[derive(Debug, Clone)]
pub struct RuleStore {
    path: PathBuf,
}

impl RuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing, unreadable or malformed files all read as an empty list.
    /// Entries of a well-formed array that are not valid rules are skipped.
    pub fn load(&self) -> Vec<ForwardingRule> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("read {} failed, treating as empty: {e}", self.path.display());
                return Vec::new();
            }
        };
        let entries: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("parse {} failed, treating as empty: {e}", self.path.display());
                return Vec::new();
            }
        };
        let mut rules = Vec::with_capacity(entries.len());
        for (i, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value(entry) {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!("{}: skipping entry {i}: {e}", self.path.display()),
            }
        }
        rules
    }

    pub fn save(&self, rules: &[ForwardingRule]) -> Result<(), StoreError> {
        let mut buf = Vec::with_capacity(256);
        let fmt = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, fmt);
        rules.serialize(&mut ser)?;
        write_atomic(&self.path, &buf).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn add(&self, rule: ForwardingRule) -> Result<Vec<ForwardingRule>, StoreError> {
        let mut rules = self.load();
        rules.push(rule);
        self.save(&rules)?;
        Ok(rules)
    }

    /// Remove the rule at `index`. The file is left untouched when the index is
    /// out of range.
    pub fn remove(&self, index: usize) -> Result<(ForwardingRule, Vec<ForwardingRule>), StoreError> {
        let mut rules = self.load();
        if index >= rules.len() {
            return Err(StoreError::IndexOutOfRange { index, len: rules.len() });
        }
        let removed = rules.remove(index);
        self.save(&rules)?;
        Ok((removed, rules))
    }
}

/// Write to a sibling temp file, then rename over the target.
pub fn write_atomic(p: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = p.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = p.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data)?;
    fs::rename(&tmp, p)
}
