//! Path model for path-addressed providers
//!
//! A validated, absolute, `/`-separated path. Folders always carry a
//! trailing separator; the root is `/`.

use crate::{Error, Result};

/// A validated path to a file or folder.
///
/// Equality is equality of the rendered string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemPath {
    raw: String,
}

impl ItemPath {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        validate(&raw)?;
        Ok(Self { raw })
    }

    pub fn root() -> Self {
        Self {
            raw: "/".to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_folder(&self) -> bool {
        self.raw.ends_with('/')
    }

    pub fn is_root(&self) -> bool {
        self.raw == "/"
    }

    /// The final path segment, without any trailing separator. Empty at root.
    pub fn name(&self) -> &str {
        self.raw
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("")
    }

    /// Extension of the final segment, including the dot. Empty when none.
    pub fn ext(&self) -> &str {
        let (_, ext) = split_name(self.name());
        ext
    }

    /// Path segments, root excluded.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.raw.split('/').filter(|s| !s.is_empty())
    }

    /// The containing folder, or None at root.
    pub fn parent(&self) -> Option<ItemPath> {
        if self.is_root() {
            return None;
        }
        let trimmed = self.raw.trim_end_matches('/');
        let cut = trimmed.rfind('/').unwrap_or(0);
        Some(Self {
            raw: trimmed[..=cut].to_string(),
        })
    }

    /// A path one segment deeper. Fails if this path is not a folder or the
    /// segment itself contains a separator.
    pub fn child(&self, name: &str, folder: bool) -> Result<ItemPath> {
        if !self.is_folder() {
            return Err(Error::invalid_path(format!(
                "'{}' is not a folder",
                self.raw
            )));
        }
        if name.is_empty() || name.contains('/') {
            return Err(Error::invalid_path(format!("invalid name '{name}'")));
        }
        let suffix = if folder { "/" } else { "" };
        Ok(Self {
            raw: format!("{}{}{}", self.raw, name, suffix),
        })
    }

    /// Same path with the final segment replaced.
    pub fn renamed(&self, new_name: &str) -> Result<ItemPath> {
        if new_name.is_empty() || new_name.contains('/') {
            return Err(Error::invalid_path(format!("invalid name '{new_name}'")));
        }
        match self.parent() {
            Some(parent) => parent.child(new_name, self.is_folder()),
            None => Err(Error::invalid_path("cannot rename the root")),
        }
    }

    /// Path with every segment percent-encoded, for building URLs.
    pub fn encoded(&self) -> String {
        let mut out = String::from("/");
        for seg in self.segments() {
            out.push_str(&percent_encode(seg));
            out.push('/');
        }
        if !self.is_folder() {
            out.pop();
        }
        out
    }
}

impl std::fmt::Display for ItemPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn validate(raw: &str) -> Result<()> {
    if raw.is_empty() {
        return Err(Error::invalid_path("must specify a path"));
    }
    if !raw.starts_with('/') {
        return Err(Error::invalid_path(format!("invalid path '{raw}' specified")));
    }
    if raw.contains("//") {
        return Err(Error::invalid_path(format!("invalid path '{raw}' specified")));
    }
    // Reject shortcut segments outright rather than normalizing them away.
    for seg in raw.split('/') {
        if seg == "." || seg == ".." {
            return Err(Error::invalid_path(format!("invalid path '{raw}' specified")));
        }
    }
    Ok(())
}

/// Split a name into (stem, extension-with-dot). A leading dot alone does
/// not count as an extension.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Conflict-probe sibling name: `test.txt` -> `test(1).txt`, `test(2).txt`, ...
pub fn increment_name(name: &str, count: u32) -> String {
    let (stem, ext) = split_name(name);
    format!("{stem}({count}){ext}")
}

fn percent_encode(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_rules() {
        assert!(ItemPath::new("/a/b").is_ok());
        assert!(ItemPath::new("/a/b/").is_ok());
        assert!(ItemPath::new("/").is_ok());

        assert!(matches!(ItemPath::new(""), Err(Error::InvalidPath(_))));
        assert!(matches!(ItemPath::new("a/b"), Err(Error::InvalidPath(_))));
        assert!(matches!(ItemPath::new("/a//b"), Err(Error::InvalidPath(_))));
        assert!(matches!(
            ItemPath::new("/a/../b"),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(ItemPath::new("/a/./b"), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_kind_from_trailing_separator() {
        assert!(ItemPath::new("/a/b/").unwrap().is_folder());
        assert!(!ItemPath::new("/a/b").unwrap().is_folder());
        assert!(ItemPath::root().is_folder());
    }

    #[test]
    fn test_name_and_parent() {
        let path = ItemPath::new("/docs/report.txt").unwrap();
        assert_eq!(path.name(), "report.txt");
        assert_eq!(path.ext(), ".txt");
        assert_eq!(path.parent().unwrap().as_str(), "/docs/");
        assert_eq!(path.parent().unwrap().parent().unwrap().as_str(), "/");
        assert!(ItemPath::root().parent().is_none());
    }

    #[test]
    fn test_child_and_rename() {
        let folder = ItemPath::new("/docs/").unwrap();
        assert_eq!(folder.child("a.txt", false).unwrap().as_str(), "/docs/a.txt");
        assert_eq!(folder.child("sub", true).unwrap().as_str(), "/docs/sub/");
        assert!(folder.child("a/b", false).is_err());

        let file = ItemPath::new("/docs/a.txt").unwrap();
        assert_eq!(file.renamed("b.txt").unwrap().as_str(), "/docs/b.txt");
        assert!(ItemPath::root().renamed("x").is_err());
    }

    #[test]
    fn test_increment_name() {
        assert_eq!(increment_name("test.txt", 1), "test(1).txt");
        assert_eq!(increment_name("test.txt", 2), "test(2).txt");
        assert_eq!(increment_name("archive.tar.gz", 1), "archive.tar(1).gz");
        assert_eq!(increment_name("README", 3), "README(3)");
        assert_eq!(increment_name(".bashrc", 1), ".bashrc(1)");
    }

    #[test]
    fn test_encoded_segments() {
        let path = ItemPath::new("/my docs/r&d.txt").unwrap();
        assert_eq!(path.encoded(), "/my%20docs/r%26d.txt");
        let folder = ItemPath::new("/my docs/").unwrap();
        assert_eq!(folder.encoded(), "/my%20docs/");
    }
}
