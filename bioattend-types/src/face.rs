//! Face recognition identifiers

use std::fmt;

/// Identifier produced by the face recognizer
///
/// Faces are trained under the same ID as the user's fingerprint slot, so a
/// correct two-factor match compares equal to the sensor's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FaceId(pub u32);

impl FaceId {
    pub fn value(self) -> u32 {
        self.0
    }
    
    /// Check if a fingerprint ID belongs to the same person
    pub fn matches(self, fingerprint_id: u32) -> bool {
        self.0 == fingerprint_id
    }
}

impl From<u32> for FaceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "face#{}", self.0)
    }
}
