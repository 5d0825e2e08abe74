use crate::ids::{ArtifactId, CommandId, EventId, RunId, Scope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Utf8,
    Base64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobProvider {
    #[serde(rename = "convex-files")]
    ConvexFiles,
    S3,
    R2,
    /// Used by the in-memory `BlobStore` for tests and single-node demos.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePointer {
    pub provider: BlobProvider,
    pub key: String,
    pub bucket: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub command_id: Option<CommandId>,
    pub run_id: Option<RunId>,
    pub event_id: EventId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactLinkRef {
    pub rel: String,
    pub artifact_id: ArtifactId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: ArtifactId,
    pub scope: Scope,
    pub content_sha256: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub logical_name: String,
    pub byte_size: u64,
    pub labels: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub provenance: Provenance,
    pub storage_pointer: StoragePointer,
    pub links: Option<Vec<ArtifactLinkRef>>,
}

/// `sha256(bytes)` as lowercase hex, the manifest's dedup key.
pub fn content_sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn decode_payload(encoding: Encoding, payload: &str) -> Result<Vec<u8>, anyhow::Error> {
    match encoding {
        Encoding::Utf8 => Ok(payload.as_bytes().to_vec()),
        Encoding::Base64 => {
            use base64::Engine;
            Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_stable_and_64_hex_chars() {
        let h = content_sha256_hex(b"hello world");
        assert_eq!(h.len(), 64);
        assert_eq!(h, content_sha256_hex(b"hello world"));
        assert_ne!(h, content_sha256_hex(b"hello world!"));
    }

    #[test]
    fn utf8_and_base64_decode_to_same_bytes() {
        let text = "# Digest";
        use base64::Engine;
        let b64 = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
        let a = decode_payload(Encoding::Utf8, text).unwrap();
        let b = decode_payload(Encoding::Base64, &b64).unwrap();
        assert_eq!(a, b);
    }
}
