//! Content-addressed blob reference (spec §3, §6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobRef {
    pub sha256: String,
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl BlobRef {
    /// `state/blobs/<first2>/<sha256>` per spec §6.
    pub fn relative_path(&self) -> std::path::PathBuf {
        let (prefix, _) = self.sha256.split_at(self.sha256.len().min(2));
        std::path::PathBuf::from("blobs").join(prefix).join(&self.sha256)
    }
}
