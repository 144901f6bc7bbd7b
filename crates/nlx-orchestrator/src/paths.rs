//! Path expansion for user-facing destinations.
//!
//! Order of operations: folder shortcut table, then `~`/env expansion, then
//! relative resolution against the session working directory, then
//! canonicalization (lexical when the path does not exist yet).

use std::path::{Component, Path, PathBuf};

/// Common folder shortcuts, matched case-insensitively against the first
/// path segment.
const SHORTCUTS: &[(&str, &str)] = &[
    ("desktop", "~/Desktop"),
    ("documents", "~/Documents"),
    ("downloads", "~/Downloads"),
    ("pictures", "~/Pictures"),
    ("music", "~/Music"),
    ("videos", "~/Videos"),
    ("home", "~"),
];

pub struct PathExpander;

impl PathExpander {
    /// Expand `path` into an absolute, normalized `PathBuf`.
    ///
    /// Empty input resolves to the home directory. `working_directory` is
    /// the base for relative paths; when it is empty the process cwd is
    /// used.
    pub fn expand(path: &str, working_directory: &str) -> PathBuf {
        if path.is_empty() {
            return home();
        }

        let with_shortcut = apply_shortcut(path);

        // ~ and $VAR expansion; on lookup failure keep the tilde expansion.
        let expanded = shellexpand::full(&with_shortcut)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| shellexpand::tilde(&with_shortcut).into_owned());

        let mut p = PathBuf::from(expanded);
        if p.is_relative() {
            let base = if working_directory.is_empty() {
                std::env::current_dir().unwrap_or_else(|_| home())
            } else {
                PathBuf::from(working_directory)
            };
            p = base.join(p);
        }

        // Prefer the real canonical path (resolves symlinks); fall back to a
        // lexical cleanup for paths that do not exist yet.
        p.canonicalize().unwrap_or_else(|_| normalize(&p))
    }
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

/// Replace a leading folder shortcut ("pictures/a.png" → "~/Pictures/a.png").
fn apply_shortcut(path: &str) -> String {
    let (head, rest) = match path.split_once('/') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let head_lower = head.to_lowercase();
    for (shortcut, target) in SHORTCUTS {
        if head_lower == *shortcut {
            return match rest {
                Some(rest) => format!("{target}/{rest}"),
                None => (*target).to_string(),
            };
        }
    }
    path.to_string()
}

/// Lexical normalization: drop `.`, fold `..` into the parent.
fn normalize(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in p.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
