//! Face recognition collaborator

use async_trait::async_trait;
use bioattend_types::FaceId;

/// Camera-side identification used for two-factor attendance
///
/// The face ID space is shared with fingerprint slots: a face recognized as
/// `FaceId(7)` belongs to the user enrolled in slot 7.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FaceRecognizer: Send + Sync {
    /// Identify the face in front of the camera, if any
    async fn recognize(&self) -> Option<FaceId>;

    /// Train a new face model from captured samples
    async fn train(&self, name: &str, samples: &[Vec<u8>]) -> FaceId;
}
