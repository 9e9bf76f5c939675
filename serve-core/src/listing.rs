//! Directory enumeration for index pages

use crate::error::ServeError;
use crate::Result;
use std::fs::Metadata;
use std::path::Path;

const UNKNOWN_PERMISSIONS: &str = "???";

/// One immediate child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Raw file name, without the display separator
    pub name: String,
    pub is_dir: bool,
    /// Human readable size; empty for directories
    pub size: String,
    /// Mode string such as `drwxr-xr-x`
    pub permissions: String,
}

impl DirEntry {
    /// Name with a trailing `/` for directories.
    pub fn display_name(&self) -> String {
        if self.is_dir {
            format!("{}/", self.name)
        } else {
            self.name.clone()
        }
    }

    fn from_parts(name: String, is_dir: bool, metadata: Option<&Metadata>) -> Self {
        let (size, permissions) = match metadata {
            Some(meta) if meta.is_dir() => (String::new(), mode_string(meta)),
            Some(meta) => (human_size(meta.len()), mode_string(meta)),
            None => ("0".to_string(), UNKNOWN_PERMISSIONS.to_string()),
        };
        Self {
            name,
            is_dir,
            size,
            permissions,
        }
    }
}

/// Lists the immediate children of `dir` in filesystem enumeration order.
///
/// Any enumeration error fails the whole listing.
pub async fn list_directory(dir: &Path) -> Result<Vec<DirEntry>> {
    let mut read_dir = tokio::fs::read_dir(dir).await.map_err(ServeError::Listing)?;
    let mut entries = Vec::new();

    while let Some(entry) = read_dir.next_entry().await.map_err(ServeError::Listing)? {
        let file_type = entry.file_type().await.map_err(ServeError::Listing)?;
        // Metadata is best-effort; a vanished or unreadable entry keeps placeholders.
        let metadata = entry.metadata().await.ok();
        let name = entry.file_name().to_string_lossy().into_owned();
        entries.push(DirEntry::from_parts(name, file_type.is_dir(), metadata.as_ref()));
    }

    Ok(entries)
}

/// Directories first, then files; each group by raw name in byte order.
pub fn sort_entries(entries: &mut [DirEntry]) {
    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
}

/// SI formatted size, e.g. `999 B`, `1.2 kB`, `3.4 MB`.
pub fn human_size(bytes: u64) -> String {
    const UNIT: u64 = 1000;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let prefix = b"kMGTPE"[exp] as char;
    format!("{:.1} {}B", bytes as f64 / div as f64, prefix)
}

#[cfg(unix)]
fn mode_string(meta: &Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;

    let file_type = meta.file_type();
    let kind = if file_type.is_dir() {
        'd'
    } else if file_type.is_symlink() {
        'L'
    } else {
        '-'
    };

    let mode = meta.permissions().mode();
    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

#[cfg(not(unix))]
fn mode_string(meta: &Metadata) -> String {
    let kind = if meta.is_dir() { 'd' } else { '-' };
    let rest = if meta.permissions().readonly() {
        "r--r--r--"
    } else {
        "rw-rw-rw-"
    };
    format!("{}{}", kind, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn entry(name: &str, is_dir: bool) -> DirEntry {
        DirEntry {
            name: name.to_string(),
            is_dir,
            size: String::new(),
            permissions: String::new(),
        }
    }

    #[test]
    fn test_sort_directories_first_then_bytewise() {
        let mut entries = vec![entry("b.txt", false), entry("A", true), entry("a.txt", false)];
        sort_entries(&mut entries);
        let names: Vec<String> = entries.iter().map(|e| e.display_name()).collect();
        assert_eq!(names, vec!["A/", "a.txt", "b.txt"]);
    }

    #[test]
    fn test_sort_is_case_sensitive() {
        let mut entries = vec![
            entry("beta", true),
            entry("Zeta", true),
            entry("alpha.txt", false),
            entry("Omega.txt", false),
        ];
        sort_entries(&mut entries);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "beta", "Omega.txt", "alpha.txt"]);
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(999), "999 B");
        assert_eq!(human_size(1000), "1.0 kB");
        assert_eq!(human_size(1234), "1.2 kB");
        assert_eq!(human_size(3_400_000), "3.4 MB");
        assert_eq!(human_size(5_600_000_000), "5.6 GB");
    }

    #[tokio::test]
    async fn test_list_directory_is_not_recursive() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("deep.txt"), "deep").unwrap();
        fs::write(dir.path().join("top.txt"), vec![0u8; 1500]).unwrap();

        let mut entries = list_directory(dir.path()).await.unwrap();
        sort_entries(&mut entries);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "sub");
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].size, "");
        assert_eq!(entries[0].display_name(), "sub/");
        assert_eq!(entries[1].name, "top.txt");
        assert_eq!(entries[1].size, "1.5 kB");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permission_strings() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let file = dir.path().join("script.sh");
        fs::write(&file, "#!/bin/sh").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o754)).unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o755)).unwrap();

        let mut entries = list_directory(dir.path()).await.unwrap();
        sort_entries(&mut entries);

        assert_eq!(entries[0].permissions, "drwxr-xr-x");
        assert_eq!(entries[1].permissions, "-rwxr-xr--");
    }

    #[tokio::test]
    async fn test_missing_directory_is_listing_error() {
        let dir = tempdir().unwrap();
        let result = list_directory(&dir.path().join("missing")).await;
        assert!(matches!(result, Err(ServeError::Listing(_))));
    }
}
