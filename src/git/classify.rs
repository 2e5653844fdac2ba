//! Path labelling helpers: tier by longest prefix, binary by extension.
//!
//! Both are advisory. They never change what a diff or rollback touches.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

static BINARY_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // images
        "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "psd",
        // archives
        "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "jar",
        // fonts
        "woff", "woff2", "ttf", "otf", "eot",
        // audio / video
        "mp3", "wav", "ogg", "flac", "mp4", "mov", "avi", "mkv", "webm",
        // executables and libraries
        "exe", "dll", "so", "dylib", "bin", "o", "a", "class", "wasm",
        // databases
        "db", "sqlite", "sqlite3",
        // documents
        "pdf",
    ]
    .into_iter()
    .collect()
});

/// True if the extension of `path` is in the fixed binary set.
pub fn is_binary_path(path: &str) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            BINARY_EXTENSIONS.contains(ext.to_ascii_lowercase().as_str())
        }
        _ => false,
    }
}

/// Maps a path prefix to a tier label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TierRule {
    pub tier: String,
    pub prefix: String,
}

impl TierRule {
    pub fn new(tier: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            tier: tier.into(),
            prefix: prefix.into(),
        }
    }

    pub fn default_rules() -> Vec<TierRule> {
        ["web", "api", "database", "deploy"]
            .into_iter()
            .map(|name| TierRule::new(name, format!("{name}/")))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct TierClassifier {
    rules: Vec<TierRule>,
}

impl TierClassifier {
    pub fn new(mut rules: Vec<TierRule>) -> Self {
        // longest prefix first so the first hit wins
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { rules }
    }

    pub fn classify(&self, path: &str) -> Option<String> {
        let path = path.trim_start_matches("./");
        self.rules
            .iter()
            .find(|rule| path.starts_with(rule.prefix.as_str()))
            .map(|rule| rule.tier.clone())
    }
}

impl Default for TierClassifier {
    fn default() -> Self {
        Self::new(TierRule::default_rules())
    }
}
