//! Request path confinement.
//!
//! Maps a URL path onto the served root, resolving every symlink on the way so
//! that neither `..` segments nor links pointing outside the root can escape it.

use crate::error::ServeError;
use crate::Result;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// What a resolved path points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Directory,
}

/// An absolute path that is known to lie within the served root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    path: PathBuf,
    kind: PathKind,
}

impl ResolvedPath {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == PathKind::Directory
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// Strategy used for the root prefix check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathComparator {
    CaseSensitive,
    CaseInsensitive,
}

impl PathComparator {
    /// Windows paths are case-insensitive; everything else compares exactly.
    pub fn for_host() -> Self {
        if cfg!(windows) {
            PathComparator::CaseInsensitive
        } else {
            PathComparator::CaseSensitive
        }
    }

    /// True when `path` equals `prefix` or lies below it, compared per component.
    pub fn has_prefix(&self, prefix: &Path, path: &Path) -> bool {
        let mut path_components = path.components();
        for expected in prefix.components() {
            match path_components.next() {
                Some(actual) if self.component_eq(expected, actual) => {}
                _ => return false,
            }
        }
        true
    }

    fn component_eq(&self, a: Component<'_>, b: Component<'_>) -> bool {
        match self {
            PathComparator::CaseSensitive => a == b,
            PathComparator::CaseInsensitive => {
                a.as_os_str().to_string_lossy().to_lowercase()
                    == b.as_os_str().to_string_lossy().to_lowercase()
            }
        }
    }
}

impl Default for PathComparator {
    fn default() -> Self {
        Self::for_host()
    }
}

/// Resolves request paths against one canonical root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    comparator: PathComparator,
}

impl PathResolver {
    /// `root` must already be canonical, see [`resolve_root`].
    pub fn new(root: PathBuf, comparator: PathComparator) -> Self {
        Self { root, comparator }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn comparator(&self) -> PathComparator {
        self.comparator
    }

    pub async fn resolve(&self, request_path: &str) -> Result<ResolvedPath> {
        let root = self.root.clone();
        let request_path = request_path.to_string();
        let comparator = self.comparator;
        tokio::task::spawn_blocking(move || sanitise_path(&root, &request_path, comparator))
            .await
            .map_err(|e| ServeError::Io(std::io::Error::other(e)))?
    }
}

/// Canonicalizes the configured root once at startup.
pub fn resolve_root(dir: &Path) -> Result<PathBuf> {
    let root = std::fs::canonicalize(dir).map_err(|e| {
        ServeError::Configuration(format!("error resolving directory {}: {}", dir.display(), e))
    })?;
    if !root.is_dir() {
        return Err(ServeError::Configuration(format!(
            "{} is not a directory",
            root.display()
        )));
    }
    Ok(root)
}

/// Joins `request_path` onto `root` and confines the result.
///
/// `root` must be canonical. Nonexistent targets fail with
/// [`ServeError::PathNotExists`] before the prefix test runs; anything that
/// resolves outside `root` fails with [`ServeError::PathUnauthorized`].
pub fn sanitise_path(
    root: &Path,
    request_path: &str,
    comparator: PathComparator,
) -> Result<ResolvedPath> {
    let joined = join_normalized(root, request_path);

    let resolved = match std::fs::canonicalize(&joined) {
        Ok(path) => path,
        Err(e) if is_missing(&e) => return Err(ServeError::PathNotExists),
        Err(e) => return Err(ServeError::Io(e)),
    };

    if !comparator.has_prefix(root, &resolved) {
        return Err(ServeError::PathUnauthorized);
    }

    let metadata = std::fs::metadata(&resolved)?;
    let kind = if metadata.is_dir() {
        PathKind::Directory
    } else {
        PathKind::File
    };

    Ok(ResolvedPath {
        path: resolved,
        kind,
    })
}

/// Lexically joins a URL path onto `root`, collapsing `.` and `..`.
///
/// `..` may climb above `root`; the prefix test catches that after symlink
/// resolution.
pub fn join_normalized(root: &Path, request_path: &str) -> PathBuf {
    let mut joined = root.to_path_buf();
    let relative = request_path.trim_start_matches(['/', '\\']);
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::ParentDir => {
                joined.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    joined
}

/// `/`-prefixed location of `path` relative to `root`, for display only.
pub fn relative_display_path(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) if relative.as_os_str().is_empty() => "/".to_string(),
        Ok(relative) => {
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            format!("/{}", parts.join("/"))
        }
        Err(_) => "/".to_string(),
    }
}

/// Failures that mean "no such file" from the client's point of view.
///
/// `NotADirectory` covers a path walking through a regular file
/// (`file.txt/x`); `InvalidInput` covers names the OS cannot represent,
/// such as an embedded NUL.
fn is_missing(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::NotFound | ErrorKind::NotADirectory | ErrorKind::InvalidInput
    )
}
