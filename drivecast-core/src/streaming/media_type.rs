//! Browser-compatible media type classification.
//!
//! Maps a remote file name and the content type declared by the upstream
//! store onto the content type served to the player. A recognized file
//! extension always wins over the declared type, so containers the store
//! reports as generic binary (Matroska in particular) still reach the
//! browser with their real media type.

use serde::Serialize;

/// Fallback content type when neither the name nor the upstream says more.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Media type served for Matroska containers.
pub const MATROSKA: &str = "video/x-matroska";

/// Media type served for audio-only Matroska containers.
pub const MATROSKA_AUDIO: &str = "audio/x-matroska";

/// Broad media category of a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Playable in a video element
    Video,
    /// Playable in an audio element
    Audio,
    /// Anything else
    Other,
}

/// Extensions with a fixed browser-facing content type.
const MEDIA_EXTENSIONS: &[(&str, &str, MediaKind)] = &[
    ("mp4", "video/mp4", MediaKind::Video),
    ("m4v", "video/mp4", MediaKind::Video),
    ("webm", "video/webm", MediaKind::Video),
    ("mkv", MATROSKA, MediaKind::Video),
    ("avi", "video/x-msvideo", MediaKind::Video),
    ("mov", "video/quicktime", MediaKind::Video),
    ("wmv", "video/x-ms-wmv", MediaKind::Video),
    ("flv", "video/x-flv", MediaKind::Video),
    ("3gp", "video/3gpp", MediaKind::Video),
    ("ogv", "video/ogg", MediaKind::Video),
    ("mka", MATROSKA_AUDIO, MediaKind::Audio),
    ("mp3", "audio/mpeg", MediaKind::Audio),
    ("wav", "audio/wav", MediaKind::Audio),
    ("flac", "audio/flac", MediaKind::Audio),
    ("m4a", "audio/mp4", MediaKind::Audio),
    ("ogg", "audio/ogg", MediaKind::Audio),
    ("aac", "audio/aac", MediaKind::Audio),
    ("wma", "audio/x-ms-wma", MediaKind::Audio),
    ("opus", "audio/opus", MediaKind::Audio),
    ("aiff", "audio/aiff", MediaKind::Audio),
    ("alac", "audio/alac", MediaKind::Audio),
];

/// Returns the lowercase extension of a file name, if it has one.
pub fn extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.contains(['/', '\\']) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Classifies a remote file into the content type served downstream.
///
/// Precedence: media extension table, then any other extension known to
/// `mime_guess`, then the declared content type, then `application/octet-stream`.
/// Never fails; an empty name with no declared type yields the fallback.
pub fn classify(file_name: &str, declared_content_type: &str) -> String {
    if let Some(ext) = extension(file_name) {
        if let Some((_, mime, _)) = MEDIA_EXTENSIONS.iter().find(|(e, _, _)| *e == ext) {
            return (*mime).to_string();
        }
        if let Some(guess) = mime_guess::from_ext(&ext).first_raw() {
            return guess.to_string();
        }
    }

    let declared = declared_content_type.trim();
    if declared.is_empty() {
        OCTET_STREAM.to_string()
    } else {
        declared.to_string()
    }
}

impl MediaKind {
    /// Determines the media kind from the file extension, falling back to
    /// the top-level type of the classified content type.
    pub fn detect(file_name: &str, content_type: &str) -> Self {
        if let Some(ext) = extension(file_name) {
            if let Some((_, _, kind)) = MEDIA_EXTENSIONS.iter().find(|(e, _, _)| *e == ext) {
                return *kind;
            }
        }

        match content_type.split('/').next() {
            Some("video") => MediaKind::Video,
            Some("audio") => MediaKind::Audio,
            _ => MediaKind::Other,
        }
    }

    /// Returns true for video and audio files.
    pub fn is_media(self) -> bool {
        !matches!(self, MediaKind::Other)
    }
}

/// Returns true when a classified content type denotes a Matroska
/// container, video or audio-only.
pub fn is_matroska(content_type: &str) -> bool {
    content_type.eq_ignore_ascii_case(MATROSKA) || content_type.eq_ignore_ascii_case(MATROSKA_AUDIO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matroska_wins_over_octet_stream() {
        assert_eq!(classify("clip.mkv", OCTET_STREAM), MATROSKA);
        assert_eq!(classify("CLIP.MKV", "video/mp4"), MATROSKA);
    }

    #[test]
    fn test_extension_wins_over_declared() {
        assert_eq!(classify("movie.m4v", "application/x-whatever"), "video/mp4");
        assert_eq!(classify("song.flac", "audio/x-flac"), "audio/flac");
        assert_eq!(classify("notes.txt", OCTET_STREAM), "text/plain");
    }

    #[test]
    fn test_falls_back_to_declared_then_octet_stream() {
        assert_eq!(classify("README", "text/markdown"), "text/markdown");
        assert_eq!(classify("archive.zzzunknown", "application/zip"), "application/zip");
        assert_eq!(classify("", ""), OCTET_STREAM);
        assert_eq!(classify("noext", "   "), OCTET_STREAM);
    }

    #[test]
    fn test_extension_edge_cases() {
        assert_eq!(extension("a.tar.GZ"), Some("gz".to_string()));
        assert_eq!(extension(".hidden"), None);
        assert_eq!(extension("trailing."), None);
        assert_eq!(extension("dir.d/file"), None);
    }

    #[test]
    fn test_media_kind_detection() {
        assert_eq!(MediaKind::detect("film.avi", OCTET_STREAM), MediaKind::Video);
        assert_eq!(MediaKind::detect("track.opus", OCTET_STREAM), MediaKind::Audio);
        assert_eq!(MediaKind::detect("clip", "video/webm"), MediaKind::Video);
        assert_eq!(MediaKind::detect("photo.jpg", "image/jpeg"), MediaKind::Other);
        assert!(!MediaKind::Other.is_media());
        assert!(MediaKind::Audio.is_media());
    }

    #[test]
    fn test_audio_matroska_is_classified() {
        assert_eq!(classify("Live Set.MKA", OCTET_STREAM), MATROSKA_AUDIO);
        assert_eq!(MediaKind::detect("set.mka", MATROSKA_AUDIO), MediaKind::Audio);
        assert!(is_matroska(&classify("set.mka", "")));
    }

    #[test]
    fn test_is_matroska() {
        assert!(is_matroska("video/x-matroska"));
        assert!(is_matroska("Video/X-Matroska"));
        assert!(is_matroska("audio/x-matroska"));
        assert!(!is_matroska("video/webm"));
    }
}
