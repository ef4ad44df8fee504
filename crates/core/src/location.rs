use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use url::Url;

/// A filesystem location compared by its lexically normalized path.
///
/// Two locations that spell the same path differently (`/a/./b`, `/a/b/`,
/// `/a/c/../b`) are equal and hash identically, so they can key the maps an
/// undo record keeps about original file state.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Location(PathBuf);

impl Location {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self(normalize(path.as_ref()))
    }

    /// Parses a `file://` URI. Other schemes are not locations this crate can act on.
    pub fn from_uri(uri: &str) -> Option<Self> {
        let url = Url::parse(uri).ok()?;
        if url.scheme() != "file" {
            return None;
        }
        url.to_file_path().ok().map(Self::new)
    }

    pub fn uri(&self) -> String {
        match Url::from_file_path(&self.0) {
            Ok(url) => url.to_string(),
            Err(()) => format!("file://{}", self.0.to_string_lossy()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn file_name(&self) -> Option<&OsStr> {
        self.0.file_name()
    }

    pub fn base_name(&self) -> String {
        self.0
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.0.to_string_lossy().into_owned())
    }

    pub fn parent(&self) -> Option<Self> {
        self.0.parent().map(|parent| Self(parent.to_path_buf()))
    }

    pub fn join(&self, name: impl AsRef<Path>) -> Self {
        Self::new(self.0.join(name))
    }

    pub fn exists(&self) -> bool {
        self.0.symlink_metadata().is_ok()
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0.to_string_lossy())
    }
}

impl AsRef<Path> for Location {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl From<PathBuf> for Location {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl From<&Path> for Location {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = matches!(
                    normalized.components().next_back(),
                    None | Some(Component::RootDir | Component::Prefix(_))
                );
                if normalized.as_os_str().is_empty()
                    || matches!(normalized.components().next_back(), Some(Component::ParentDir))
                {
                    normalized.push("..");
                } else if !at_root {
                    normalized.pop();
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}
