//! Source file identity and classification.

use std::path::{Path, PathBuf};

/// The kind of a source file, determined from its extension and, for
/// ambiguous cases, a peek at its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// A single-file component: template + script + style sections.
    Sfc,
    /// A typed-script module (the TSX-style superset).
    TypedScript,
    /// A plain script module with no type annotations to strip.
    PlainScript,
}

impl SourceKind {
    /// Classifies a file by extension. Returns `None` for extensions this
    /// engine does not claim.
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("sfc") => Some(Self::Sfc),
            Some("tsx") | Some("ts") => Some(Self::TypedScript),
            Some("jsx") | Some("js") | Some("mjs") => Some(Self::PlainScript),
            _ => None,
        }
    }

    pub fn is_typed(self) -> bool {
        matches!(self, Self::Sfc | Self::TypedScript)
    }
}

/// A unit of input to the pipeline: a normalized path plus the content to
/// compile. Content is read eagerly by the caller so stages never touch the
/// filesystem themselves.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub content: String,
    pub kind: SourceKind,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Option<Self> {
        let path = normalize_path(path.into());
        let kind = SourceKind::from_extension(&path)?;
        Some(Self { path, content: content.into(), kind })
    }
}

/// Normalizes a path the way the rest of the engine expects to see it:
/// no `.`/`..` components, canonical casing on case-insensitive filesystems.
pub fn normalize_path(path: PathBuf) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    dunce::simplified(&out).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_extensions() {
        assert_eq!(SourceKind::from_extension(Path::new("a.sfc")), Some(SourceKind::Sfc));
        assert_eq!(SourceKind::from_extension(Path::new("a.tsx")), Some(SourceKind::TypedScript));
        assert_eq!(SourceKind::from_extension(Path::new("a.js")), Some(SourceKind::PlainScript));
        assert_eq!(SourceKind::from_extension(Path::new("a.png")), None);
    }

    #[test]
    fn sfc_and_tsx_are_typed() {
        assert!(SourceKind::Sfc.is_typed());
        assert!(SourceKind::TypedScript.is_typed());
        assert!(!SourceKind::PlainScript.is_typed());
    }
}
