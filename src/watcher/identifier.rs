//! Stable identity of a watched file.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Identifies a watched file by its lexically normalized path.
///
/// Two identifiers are equal when their normalized paths are equal, so
/// `./certs/tls.pem` and `certs//tls.pem` address the same history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileIdentifier {
    path: PathBuf,
}

impl FileIdentifier {
    /// Create an identifier from any path-like value.
    ///
    /// Normalization is purely lexical: `.` segments and repeated separators
    /// are dropped, `..` is resolved against preceding normal segments. The
    /// filesystem is never consulted, so symlinks are not followed.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: normalize(path.as_ref()),
        }
    }

    /// The normalized path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

impl fmt::Display for FileIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl From<&Path> for FileIdentifier {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for FileIdentifier {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl From<&str> for FileIdentifier {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl AsRef<Path> for FileIdentifier {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}
