//! Normalizes a user-provided audio source into a single in-memory artifact
//! with a locally playable handle.

use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::warn;

/// Formats the worker accepts, matched by extension or declared MIME type.
const ACCEPTED_EXTENSIONS: &[&str] = &["wav", "mp3", "ogg"];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("not a supported audio file: {name} (expected WAV, MP3 or OGG)")]
    InvalidSource { name: String },
    #[error("failed to read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where the playable media for an artifact lives.
///
/// `Borrowed` paths belong to the user and are never touched on release;
/// `Owned` paths were spooled by us and are deleted when the artifact is
/// superseded. `RemoteRecording` means the audio only exists on the worker
/// and is streamed back via `get-recorded-audio`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackHandle {
    Borrowed(PathBuf),
    Owned(PathBuf),
    RemoteRecording,
}

impl PlaybackHandle {
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Self::Borrowed(path) | Self::Owned(path) => Some(path),
            Self::RemoteRecording => None,
        }
    }

    /// Releases whatever local resource backs this handle. Idempotent.
    pub fn release(&self) {
        if let Self::Owned(path) = self {
            if let Err(err) = fs::remove_file(path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove spooled audio {}: {err}", path.display());
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    pub file_name: String,
    pub mime: Option<String>,
    pub size_bytes: u64,
    pub handle: PlaybackHandle,
}

impl AudioArtifact {
    /// The artifact produced by a server-side recording: no local bytes, one
    /// nominal WAV on the worker.
    pub fn recorded() -> Self {
        Self {
            file_name: "recording.wav".to_owned(),
            mime: Some("audio/wav".to_owned()),
            size_bytes: 0,
            handle: PlaybackHandle::RemoteRecording,
        }
    }

    /// Whether this artifact can be uploaded from local bytes (extract and
    /// full-workflow need that; a server-side recording cannot).
    pub fn is_uploadable(&self) -> bool {
        self.handle.local_path().is_some()
    }
}

/// A not-yet-validated audio source.
#[derive(Debug)]
pub enum SourceCandidate {
    /// File-picker selection: a path the user owns.
    Picked { path: PathBuf },
    /// Drag-drop payload: a name plus raw bytes, spooled to disk so the
    /// playback sink can decode it.
    Dropped { name: String, mime: Option<String>, bytes: Vec<u8> },
}

/// Validates a candidate and turns it into an artifact. Rejected candidates
/// leave everything untouched; nothing is written to disk before validation
/// passes.
pub fn select_source(
    candidate: SourceCandidate,
    spool_dir: &Path,
) -> Result<AudioArtifact, SourceError> {
    match candidate {
        SourceCandidate::Picked { path } => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned());
            if !is_audio_name(&name, None) {
                return Err(SourceError::InvalidSource { name });
            }
            let metadata = fs::metadata(&path)
                .map_err(|source| SourceError::Unreadable { path: path.clone(), source })?;
            Ok(AudioArtifact {
                mime: mime_for_name(&name).map(str::to_owned),
                file_name: name,
                size_bytes: metadata.len(),
                handle: PlaybackHandle::Borrowed(path),
            })
        }
        SourceCandidate::Dropped { name, mime, bytes } => {
            if !is_audio_name(&name, mime.as_deref()) {
                return Err(SourceError::InvalidSource { name });
            }
            fs::create_dir_all(spool_dir)
                .map_err(|source| SourceError::Unreadable { path: spool_dir.to_path_buf(), source })?;
            let spooled = spool_dir.join(&name);
            fs::write(&spooled, &bytes)
                .map_err(|source| SourceError::Unreadable { path: spooled.clone(), source })?;
            Ok(AudioArtifact {
                mime: mime.or_else(|| mime_for_name(&name).map(str::to_owned)),
                file_name: name,
                size_bytes: bytes.len() as u64,
                handle: PlaybackHandle::Owned(spooled),
            })
        }
    }
}

fn is_audio_name(name: &str, mime: Option<&str>) -> bool {
    if mime.is_some_and(|m| m.starts_with("audio")) {
        return true;
    }
    let lower = name.to_lowercase();
    ACCEPTED_EXTENSIONS.iter().any(|ext| lower.ends_with(&format!(".{ext}")))
}

fn mime_for_name(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    if lower.ends_with(".wav") {
        Some("audio/wav")
    } else if lower.ends_with(".mp3") {
        Some("audio/mpeg")
    } else if lower.ends_with(".ogg") {
        Some("audio/ogg")
    } else {
        None
    }
}

/// Human-readable byte count shown next to the selected file.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_owned();
    }
    let exponent = ((bytes as f64).log2() / 10.0).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    format!("{:.2} {}", value, UNITS[exponent])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_fixture(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"RIFF....WAVE").unwrap();
        path
    }

    #[test]
    fn accepts_picked_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "song.wav");

        let artifact =
            select_source(SourceCandidate::Picked { path: path.clone() }, dir.path()).unwrap();
        assert_eq!(artifact.file_name, "song.wav");
        assert_eq!(artifact.mime.as_deref(), Some("audio/wav"));
        assert_eq!(artifact.size_bytes, 12);
        assert_eq!(artifact.handle, PlaybackHandle::Borrowed(path));
        assert!(artifact.is_uploadable());
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "Take1.MP3");
        let artifact = select_source(SourceCandidate::Picked { path }, dir.path()).unwrap();
        assert_eq!(artifact.mime.as_deref(), Some("audio/mpeg"));
    }

    #[test]
    fn rejects_non_audio_file_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let spool = dir.path().join("spool");

        let err = select_source(
            SourceCandidate::Dropped {
                name: "document.pdf".to_owned(),
                mime: Some("application/pdf".to_owned()),
                bytes: vec![1, 2, 3],
            },
            &spool,
        )
        .unwrap_err();

        assert!(matches!(err, SourceError::InvalidSource { ref name } if name == "document.pdf"));
        assert!(!spool.exists());
    }

    #[test]
    fn declared_audio_mime_overrides_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = select_source(
            SourceCandidate::Dropped {
                name: "clip.bin".to_owned(),
                mime: Some("audio/wav".to_owned()),
                bytes: vec![0; 8],
            },
            dir.path(),
        )
        .unwrap();
        assert_eq!(artifact.mime.as_deref(), Some("audio/wav"));
    }

    #[test]
    fn dropped_payload_is_spooled_and_released() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = select_source(
            SourceCandidate::Dropped {
                name: "hum.ogg".to_owned(),
                mime: None,
                bytes: vec![0; 16],
            },
            dir.path(),
        )
        .unwrap();

        let spooled = artifact.handle.local_path().unwrap().to_path_buf();
        assert!(spooled.exists());
        artifact.handle.release();
        assert!(!spooled.exists());
        // A second release is a no-op.
        artifact.handle.release();
    }

    #[test]
    fn release_never_deletes_user_owned_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "keep.wav");
        let handle = PlaybackHandle::Borrowed(path.clone());
        handle.release();
        assert!(path.exists());
    }

    #[test]
    fn recorded_artifact_is_not_uploadable() {
        let artifact = AudioArtifact::recorded();
        assert!(!artifact.is_uploadable());
        assert!(artifact.handle.local_path().is_none());
    }

    #[test]
    fn formats_sizes_like_the_upload_card() {
        assert_eq!(format_size(0), "0 Bytes");
        assert_eq!(format_size(512), "512.00 Bytes");
        assert_eq!(format_size(2 * 1024 * 1024), "2.00 MB");
    }
}
