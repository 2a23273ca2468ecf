//! Content-type classification by file extension

use serde::{Deserialize, Serialize};

/// Logical facet a physical file contributes to an asset node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Step,
    F3d,
    Dxf,
    Svg,
    Thumb,
    Meta,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Step => "step",
            Self::F3d => "f3d",
            Self::Dxf => "dxf",
            Self::Svg => "svg",
            Self::Thumb => "thumb",
            Self::Meta => "meta",
        }
    }

    /// Model or drawing facets; a blob needs at least one to be displayed.
    pub fn is_model(self) -> bool {
        matches!(self, Self::Step | Self::F3d | Self::Dxf | Self::Svg)
    }

    /// MIME type used when a facet is shown as an image
    pub fn image_mime(self) -> Option<&'static str> {
        match self {
            Self::Thumb => Some("image/png"),
            Self::Svg => Some("image/svg+xml"),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split the final path segment into `(stem, extension)`.
///
/// The extension keeps its leading dot. A path without a dot in its last
/// segment has no extension.
pub fn split_extension(path: &str) -> (&str, Option<&str>) {
    let segment_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[segment_start..].rfind('.') {
        Some(dot) => {
            let at = segment_start + dot;
            (&path[..at], Some(&path[at..]))
        }
        None => (path, None),
    }
}

/// Strip the final extension from a path (`a/part.step` -> `a/part`)
pub fn strip_extension(path: &str) -> &str {
    split_extension(path).0
}

/// Classify a file path by its final extension
pub fn classify(path: &str) -> Option<ContentType> {
    let ext = split_extension(path).1?.to_ascii_lowercase();
    match ext.as_str() {
        ".step" | ".stp" => Some(ContentType::Step),
        ".f3d" => Some(ContentType::F3d),
        ".dxf" => Some(ContentType::Dxf),
        ".svg" => Some(ContentType::Svg),
        ".png" => Some(ContentType::Thumb),
        ".json" => Some(ContentType::Meta),
        _ => None,
    }
}
