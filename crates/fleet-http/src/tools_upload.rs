//! Tool binary upload (spec §4.5.3): validates the target binary version,
//! hashes the uploaded tarball while storing it, and synthesizes
//! simplestreams-shaped metadata for every requested series.

use std::sync::Arc;

use fleet_core::error::{codes, CoreError, ErrorCategory};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::object_store::ObjectStore;

fn bad_upload(message: impl Into<String>) -> CoreError {
    CoreError::new(codes::INTERNAL, ErrorCategory::Internal, message.into())
}

/// `<version>-<series>-<arch>`, the wire form of a tools binary version
/// (e.g. `2.9.1-focal-amd64`). Only lightly validated: three non-empty
/// dash-separated components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryVersion {
    pub number: String,
    pub series: String,
    pub arch: String,
}

impl std::fmt::Display for BinaryVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.number, self.series, self.arch)
    }
}

pub fn parse_binary_version(raw: &str) -> Result<BinaryVersion, CoreError> {
    let parts: Vec<&str> = raw.split('-').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(bad_upload(format!("invalid binaryVersion: {raw:?}")));
    }
    Ok(BinaryVersion {
        number: parts[0].to_string(),
        series: parts[1].to_string(),
        arch: parts[2].to_string(),
    })
}

#[derive(Serialize)]
pub struct ToolsMetadata {
    pub version: String,
    pub url: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Serialize)]
pub struct ToolsUploadResponse {
    pub tools: ToolsMetadata,
    #[serde(rename = "disableSSLHostnameVerification")]
    pub disable_ssl_hostname_verification: bool,
}

/// A simplestreams-shaped metadata entry: every requested series shares the
/// same underlying blob (spec §4.5.3), so this is just an index of
/// `(series, ToolsMetadata)` pairs rather than a distinct upload per series.
pub fn synthesize_simplestreams_index(
    binary_version: &BinaryVersion,
    series_list: &[String],
    metadata: &ToolsMetadata,
) -> Vec<(String, ToolsMetadata)> {
    series_list
        .iter()
        .map(|series| {
            (
                series.clone(),
                ToolsMetadata {
                    version: format!("{}-{}-{}", binary_version.number, series, binary_version.arch),
                    url: metadata.url.clone(),
                    size: metadata.size,
                    sha256: metadata.sha256.clone(),
                },
            )
        })
        .collect()
}

pub async fn handle_upload(
    store: &Arc<dyn ObjectStore>,
    binary_version_raw: &str,
    series_csv: Option<&str>,
    body: &[u8],
) -> Result<ToolsUploadResponse, CoreError> {
    let binary_version = parse_binary_version(binary_version_raw)?;
    if body.is_empty() {
        return Err(bad_upload("empty tools upload"));
    }

    let mut hasher = Sha256::new();
    hasher.update(body);
    let sha256 = hex::encode(hasher.finalize());
    let size = body.len() as u64;

    let storage_name = format!("tools/{binary_version}.tar.gz");
    let url = store.put(&storage_name, body.to_vec()).await?;

    let metadata = ToolsMetadata { version: binary_version.to_string(), url, size, sha256 };

    let series_list: Vec<String> = series_csv
        .map(|s| s.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_else(|| vec![binary_version.series.clone()]);
    let index = synthesize_simplestreams_index(&binary_version, &series_list, &metadata);
    for (series, entry) in &index {
        let encoded = serde_json::to_vec(entry).unwrap_or_default();
        store.put(&format!("streams/{series}/{}.json", entry.version), encoded).await?;
    }

    Ok(ToolsUploadResponse { tools: metadata, disable_ssl_hostname_verification: false })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::InMemoryObjectStore;

    #[test]
    fn parses_a_well_formed_binary_version() {
        let v = parse_binary_version("2.9.1-focal-amd64").unwrap();
        assert_eq!(v.number, "2.9.1");
        assert_eq!(v.series, "focal");
        assert_eq!(v.arch, "amd64");
        assert_eq!(v.to_string(), "2.9.1-focal-amd64");
    }

    #[test]
    fn rejects_malformed_binary_versions() {
        assert!(parse_binary_version("2.9.1").is_err());
        assert!(parse_binary_version("--").is_err());
    }

    #[tokio::test]
    async fn uploads_and_hashes_the_body() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let body = b"a fake tarball".to_vec();
        let response = handle_upload(&store, "2.9.1-focal-amd64", Some("focal,jammy"), &body).await.unwrap();
        assert_eq!(response.tools.size, body.len() as u64);
        assert!(!response.tools.sha256.is_empty());
        assert!(!response.disable_ssl_hostname_verification);
    }

    #[tokio::test]
    async fn rejects_an_empty_upload() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let err = handle_upload(&store, "2.9.1-focal-amd64", None, &[]).await.unwrap_err();
        assert!(err.message().contains("empty"));
    }

    #[test]
    fn simplestreams_index_shares_one_blob_across_series() {
        let binary_version = BinaryVersion { number: "2.9.1".into(), series: "focal".into(), arch: "amd64".into() };
        let metadata = ToolsMetadata {
            version: binary_version.to_string(),
            url: "objectstore://tools/x".into(),
            size: 42,
            sha256: "deadbeef".into(),
        };
        let index = synthesize_simplestreams_index(
            &binary_version,
            &["focal".to_string(), "jammy".to_string()],
            &metadata,
        );
        assert_eq!(index.len(), 2);
        assert!(index.iter().all(|(_, m)| m.url == metadata.url && m.sha256 == metadata.sha256));
    }
}
