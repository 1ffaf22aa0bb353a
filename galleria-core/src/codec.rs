//! Image codec
//!
//! Converts uploaded files to the durable `data:<mime>;base64,<payload>` text
//! form and back, and owns the registry of ephemeral display handles.
//!
//! A display handle is a process-local token (`blob:galleria/<uuid>`) that
//! resolves to the decoded bytes while it is live. Handles share the upload's
//! byte buffer, so minting one never copies the image.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

const FALLBACK_MIME: &str = "application/octet-stream";

/// Codec errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to read {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Data URI is missing the data:<mime> prefix")]
    MissingMimePrefix,

    #[error("Data URI is not base64-encoded")]
    NotBase64,

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Encoding task failed: {0}")]
    Encode(String),
}

/// Where an upload's bytes come from
#[derive(Debug, Clone)]
enum UploadSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

/// A file handed to `ImageRepository::add_many`
#[derive(Debug, Clone)]
pub struct UploadFile {
    name: String,
    mime_type: Option<String>,
    source: UploadSource,
}

impl UploadFile {
    /// Upload read lazily from disk; the MIME type is sniffed at decode time
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            mime_type: None,
            source: UploadSource::Path(path),
        }
    }

    /// Upload already in memory
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: Some(mime_type.into()),
            source: UploadSource::Bytes(Arc::from(bytes.into())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared MIME type, or a guess from the file extension
    pub fn mime_hint(&self) -> Option<String> {
        self.mime_type
            .clone()
            .or_else(|| mime_from_extension(Path::new(&self.name)).map(str::to_string))
    }

    /// True if the upload looks like an image (by declared type or extension)
    pub fn is_image(&self) -> bool {
        self.mime_hint()
            .map(|mime| mime.starts_with("image/"))
            .unwrap_or(false)
    }
}

/// Split uploads into image files and everything else
pub fn retain_images(files: Vec<UploadFile>) -> (Vec<UploadFile>, Vec<UploadFile>) {
    files.into_iter().partition(UploadFile::is_image)
}

fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        _ => return None,
    };
    Some(mime)
}

/// Ephemeral reference to decoded image bytes
///
/// Only meaningful inside the process that minted it; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayHandle(Uuid);

impl DisplayHandle {
    /// Handle not registered with any codec
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn url(&self) -> String {
        format!("blob:galleria/{}", self.0)
    }
}

impl std::fmt::Display for DisplayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url())
    }
}

#[derive(Debug)]
struct HandleEntry {
    mime_type: String,
    bytes: Arc<[u8]>,
}

/// Encoder/decoder plus the live handle registry
///
/// Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct ImageCodec {
    handles: Arc<Mutex<HashMap<DisplayHandle, HandleEntry>>>,
    revoked: Arc<AtomicUsize>,
}

impl ImageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<DisplayHandle, HandleEntry>> {
        // The map stays consistent even if a holder panicked
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mint(&self, mime_type: String, bytes: Arc<[u8]>) -> DisplayHandle {
        let handle = DisplayHandle(Uuid::new_v4());
        self.registry()
            .insert(handle.clone(), HandleEntry { mime_type, bytes });
        handle
    }

    /// Read an upload, returning its data URI and a fresh display handle
    ///
    /// The handle is minted from the raw bytes before encoding finishes; the
    /// base64 encoding runs on the blocking pool.
    pub async fn decode(&self, file: &UploadFile) -> Result<(String, DisplayHandle), DecodeError> {
        let bytes: Arc<[u8]> = match &file.source {
            UploadSource::Bytes(bytes) => bytes.clone(),
            UploadSource::Path(path) => {
                let data = tokio::fs::read(path).await.map_err(|source| DecodeError::Read {
                    name: file.name.clone(),
                    source,
                })?;
                Arc::from(data)
            }
        };

        let mime_type = file
            .mime_type
            .clone()
            .or_else(|| infer::get(&bytes).map(|kind| kind.mime_type().to_string()))
            .or_else(|| mime_from_extension(Path::new(&file.name)).map(str::to_string))
            .unwrap_or_else(|| FALLBACK_MIME.to_string());

        let handle = self.mint(mime_type.clone(), bytes.clone());

        let encoded = tokio::task::spawn_blocking(move || encode_data_uri(&mime_type, &bytes)).await;

        match encoded {
            Ok(data_uri) => {
                tracing::debug!(
                    filename = %file.name,
                    bytes = data_uri.len(),
                    handle = %handle,
                    "Decoded upload"
                );
                Ok((data_uri, handle))
            }
            Err(e) => {
                self.release(&handle);
                Err(DecodeError::Encode(e.to_string()))
            }
        }
    }

    /// Mint a fresh handle from a stored data URI
    pub fn reencode(&self, encoded_bytes: &str) -> Result<DisplayHandle, DecodeError> {
        let (mime_type, bytes) = parse_data_uri(encoded_bytes)?;
        Ok(self.mint(mime_type, Arc::from(bytes)))
    }

    /// Revoke a handle
    ///
    /// Returns true if this call revoked it; releasing an unknown or already
    /// released handle is a no-op.
    pub fn release(&self, handle: &DisplayHandle) -> bool {
        let removed = self.registry().remove(handle).is_some();
        if removed {
            self.revoked.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(handle = %handle, "Released display handle");
        }
        removed
    }

    /// Bytes and MIME type behind a live handle
    pub fn resolve(&self, handle: &DisplayHandle) -> Option<(String, Arc<[u8]>)> {
        self.registry()
            .get(handle)
            .map(|entry| (entry.mime_type.clone(), entry.bytes.clone()))
    }

    pub fn is_live(&self, handle: &DisplayHandle) -> bool {
        self.registry().contains_key(handle)
    }

    /// Number of handles not yet released
    pub fn live_handles(&self) -> usize {
        self.registry().len()
    }

    /// Number of successful revocations since creation
    pub fn revoked_count(&self) -> usize {
        self.revoked.load(Ordering::Relaxed)
    }
}

/// `data:<mime>;base64,<payload>`
pub fn encode_data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// Split a data URI into its MIME type and (still encoded) base64 payload
pub fn split_data_uri(data_uri: &str) -> Result<(&str, &str), DecodeError> {
    let rest = data_uri
        .strip_prefix("data:")
        .ok_or(DecodeError::MissingMimePrefix)?;
    let (header, payload) = rest.split_once(',').ok_or(DecodeError::MissingMimePrefix)?;

    let mut params = header.split(';');
    let mime_type = params.next().unwrap_or_default();
    if mime_type.is_empty() || !mime_type.contains('/') {
        return Err(DecodeError::MissingMimePrefix);
    }
    if !params.any(|p| p.eq_ignore_ascii_case("base64")) {
        return Err(DecodeError::NotBase64);
    }

    Ok((mime_type, payload))
}

/// Decode a data URI into its MIME type and raw bytes
pub fn parse_data_uri(data_uri: &str) -> Result<(String, Vec<u8>), DecodeError> {
    let (mime_type, payload) = split_data_uri(data_uri)?;
    let bytes = STANDARD.decode(payload)?;
    Ok((mime_type.to_string(), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    #[tokio::test]
    async fn test_decode_reencode_round_trip() {
        let codec = ImageCodec::new();
        let original: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let file = UploadFile::from_bytes("noise.jpg", "image/jpeg", original.clone());

        let (encoded, handle) = codec.decode(&file).await.unwrap();
        assert!(encoded.starts_with("data:image/jpeg;base64,"));
        assert!(codec.is_live(&handle));

        let fresh = codec.reencode(&encoded).unwrap();
        assert_ne!(fresh, handle, "reencode mints a new handle");

        let (mime, bytes) = codec.resolve(&fresh).unwrap();
        assert_eq!(mime, "image/jpeg");
        assert_eq!(&bytes[..], &original[..]);
    }

    #[tokio::test]
    async fn test_round_trip_empty_file() {
        let codec = ImageCodec::new();
        let file = UploadFile::from_bytes("empty.png", "image/png", Vec::new());

        let (encoded, _) = codec.decode(&file).await.unwrap();
        assert_eq!(encoded, "data:image/png;base64,");

        let (_, bytes) = parse_data_uri(&encoded).unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_decode_from_path_sniffs_mime() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("picture.bin");
        std::fs::write(&path, PNG_MAGIC).unwrap();

        let codec = ImageCodec::new();
        let (encoded, handle) = codec.decode(&UploadFile::from_path(&path)).await.unwrap();
        assert!(encoded.starts_with("data:image/png;base64,"));

        let (_, bytes) = codec.resolve(&handle).unwrap();
        assert_eq!(&bytes[..], PNG_MAGIC);
    }

    #[tokio::test]
    async fn test_decode_missing_file_fails() {
        let codec = ImageCodec::new();
        let file = UploadFile::from_path("/definitely/not/here.png");

        let err = codec.decode(&file).await.unwrap_err();
        assert!(matches!(err, DecodeError::Read { ref name, .. } if name == "here.png"));
        assert_eq!(codec.live_handles(), 0);
    }

    #[test]
    fn test_reencode_rejects_malformed_input() {
        let codec = ImageCodec::new();

        assert!(matches!(
            codec.reencode("not a data uri"),
            Err(DecodeError::MissingMimePrefix)
        ));
        assert!(matches!(
            codec.reencode("data:;base64,AAAA"),
            Err(DecodeError::MissingMimePrefix)
        ));
        assert!(matches!(
            codec.reencode("data:image/png,AAAA"),
            Err(DecodeError::NotBase64)
        ));
        assert!(matches!(
            codec.reencode("data:image/png;base64,@@@"),
            Err(DecodeError::InvalidBase64(_))
        ));
        assert_eq!(codec.live_handles(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let codec = ImageCodec::new();
        let handle = codec.reencode("data:image/gif;base64,R0lGODlh").unwrap();

        assert!(codec.release(&handle));
        assert!(!codec.release(&handle));
        assert!(!codec.is_live(&handle));
        assert_eq!(codec.revoked_count(), 1);
        assert!(codec.resolve(&handle).is_none());
    }

    #[test]
    fn test_split_data_uri() {
        let (mime, payload) = split_data_uri("data:image/webp;base64,UklGRg==").unwrap();
        assert_eq!(mime, "image/webp");
        assert_eq!(payload, "UklGRg==");
    }

    #[test]
    fn test_retain_images() {
        let files = vec![
            UploadFile::from_bytes("a.png", "image/png", vec![1]),
            UploadFile::from_bytes("notes.txt", "text/plain", vec![2]),
            UploadFile::from_path("/photos/b.JPG"),
            UploadFile::from_path("/photos/readme"),
        ];

        let (images, rejected) = retain_images(files);
        let names: Vec<_> = images.iter().map(UploadFile::name).collect();
        assert_eq!(names, vec!["a.png", "b.JPG"]);
        assert_eq!(rejected.len(), 2);
    }
}
