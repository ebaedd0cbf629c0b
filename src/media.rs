/// Media-file classification for sidecar reconstruction.
///
/// A file is media when its extension is in the configured table (any case).
/// When content sniffing is enabled, files with an unknown extension are
/// also probed by magic bytes.
///
/// # Examples
///
/// ```
/// use dirward::media::{MediaClassifier, MediaKind};
/// use std::path::Path;
///
/// let classifier = MediaClassifier::default();
/// assert_eq!(classifier.classify(Path::new("IMG_0001.JPG")), Some(MediaKind::Image));
/// assert_eq!(classifier.classify(Path::new("clip.mts")), Some(MediaKind::Video));
/// assert_eq!(classifier.classify(Path::new("IMG_0001.JPG.json")), None);
/// ```
use crate::config::SidecarSettings;
use std::collections::HashMap;
use std::path::Path;

/// Broad kind of a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
}

/// Maps extensions (and optionally content) to media kinds.
#[derive(Debug, Clone)]
pub struct MediaClassifier {
    extension_map: HashMap<String, MediaKind>,
    sniff_content: bool,
}

impl MediaClassifier {
    /// Builds a classifier from configured extensions.
    ///
    /// Extensions that are not known video formats are treated as images.
    pub fn from_settings(settings: &SidecarSettings) -> Self {
        let mut classifier = Self {
            extension_map: HashMap::new(),
            sniff_content: settings.sniff_content,
        };
        for ext in &settings.media_extensions {
            let ext = ext.trim_start_matches('.').to_lowercase();
            let kind = if is_video_extension(&ext) {
                MediaKind::Video
            } else {
                MediaKind::Image
            };
            classifier.extension_map.insert(ext, kind);
        }
        classifier
    }

    /// Classifies a path, returning `None` for non-media files.
    ///
    /// Sidecars (`.json`) are never media, whatever sniffing says.
    pub fn classify(&self, path: &Path) -> Option<MediaKind> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());

        if ext.as_deref() == Some("json") {
            return None;
        }
        if let Some(kind) = ext.as_ref().and_then(|e| self.extension_map.get(e)) {
            return Some(*kind);
        }
        if self.sniff_content {
            return sniff(path);
        }
        None
    }

    pub fn is_media(&self, path: &Path) -> bool {
        self.classify(path).is_some()
    }
}

impl Default for MediaClassifier {
    fn default() -> Self {
        Self::from_settings(&SidecarSettings::default())
    }
}

fn is_video_extension(ext: &str) -> bool {
    matches!(
        ext,
        "mp4" | "mov" | "m4v" | "avi" | "mts" | "m2ts" | "mkv" | "webm" | "3gp" | "wmv" | "mpg"
            | "mpeg"
    )
}

/// Probes the leading bytes of a file for an image or video signature.
fn sniff(path: &Path) -> Option<MediaKind> {
    match infer::get_from_path(path) {
        Ok(Some(kind)) => match kind.matcher_type() {
            infer::MatcherType::Image => Some(MediaKind::Image),
            infer::MatcherType::Video => Some(MediaKind::Video),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const PNG_HEADER: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52,
    ];

    #[test]
    fn test_default_extensions() {
        let classifier = MediaClassifier::default();
        for name in ["a.jpg", "a.jpeg", "a.png", "a.webp", "a.gif", "a.HEIC"] {
            assert_eq!(classifier.classify(Path::new(name)), Some(MediaKind::Image), "{}", name);
        }
        for name in ["a.mp4", "a.MOV", "a.m4v", "a.avi", "a.mts", "a.mkv"] {
            assert_eq!(classifier.classify(Path::new(name)), Some(MediaKind::Video), "{}", name);
        }
        assert!(!classifier.is_media(Path::new("notes.txt")));
        assert!(!classifier.is_media(Path::new("no_extension")));
    }

    #[test]
    fn test_custom_extensions_replace_defaults() {
        let settings = SidecarSettings {
            media_extensions: vec![".tif".to_string()],
            ..SidecarSettings::default()
        };
        let classifier = MediaClassifier::from_settings(&settings);
        assert_eq!(classifier.classify(Path::new("scan.TIF")), Some(MediaKind::Image));
        assert!(!classifier.is_media(Path::new("photo.jpg")));
    }

    #[test]
    fn test_sniffing_only_when_enabled() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("download");
        fs::write(&path, PNG_HEADER).unwrap();

        assert!(!MediaClassifier::default().is_media(&path));

        let sniffing = MediaClassifier::from_settings(&SidecarSettings {
            sniff_content: true,
            ..SidecarSettings::default()
        });
        assert_eq!(sniffing.classify(&path), Some(MediaKind::Image));
    }

    #[test]
    fn test_json_never_media() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("photo.jpg.json");
        fs::write(&path, PNG_HEADER).unwrap();

        let sniffing = MediaClassifier::from_settings(&SidecarSettings {
            sniff_content: true,
            ..SidecarSettings::default()
        });
        assert!(!sniffing.is_media(&path));
    }
}
