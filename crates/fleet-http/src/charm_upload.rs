//! Charm archive upload (spec §4.5.2): archive inspection, root-relative
//! re-packaging, transactional revision reservation, and the rebuilt
//! archive's SHA-256 upload.

use std::collections::BTreeSet;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use fleet_core::error::{codes, CoreError, ErrorCategory};
use fleet_core::state::{CharmUrl, StateStore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::object_store::ObjectStore;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;

#[derive(Serialize)]
pub struct CharmUploadResponse {
    #[serde(rename = "charmUrl")]
    pub charm_url: String,
}

fn invalid_archive(message: impl Into<String>) -> CoreError {
    CoreError::new(codes::INTERNAL, ErrorCategory::Internal, format!("invalid charm archive: {}", message.into()))
}

fn zip_err(err: zip::result::ZipError) -> CoreError {
    CoreError::new(codes::INTERNAL, ErrorCategory::Internal, format!("invalid charm archive: {err}"))
}

fn io_err(err: std::io::Error) -> CoreError {
    CoreError::new(codes::INTERNAL, ErrorCategory::Internal, err.to_string())
}

/// Split a zip entry name into `(parent_dir, basename)`, where `parent_dir`
/// is `""` for a root-level entry.
fn split_entry(name: &str) -> (&str, &str) {
    match name.rsplit_once('/') {
        Some((dir, base)) => (dir, base),
        None => ("", name),
    }
}

/// Find the archive's charm root directory (spec §4.5.2 step 3): the shared
/// parent directory of `metadata.yaml`, `config.yaml`, and `revision`,
/// wherever those happen to live. `metadata.yaml` is mandatory; the other
/// two are consulted only if present.
fn find_charm_root(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<String, CoreError> {
    let mut dirs: BTreeSet<String> = BTreeSet::new();
    let mut saw_metadata = false;

    for i in 0..archive.len() {
        let file = archive.by_index(i).map_err(zip_err)?;
        let name = file.name().to_string();
        let (dir, base) = split_entry(&name);
        if matches!(base, "metadata.yaml" | "config.yaml" | "revision") {
            if base == "metadata.yaml" {
                saw_metadata = true;
            }
            dirs.insert(dir.to_string());
        }
    }

    if !saw_metadata {
        return Err(invalid_archive("missing metadata.yaml"));
    }
    if dirs.len() > 1 {
        return Err(invalid_archive("expected all files in the same directory"));
    }
    Ok(dirs.into_iter().next().unwrap_or_default())
}

/// Pull the `name:` scalar out of a `metadata.yaml` body. This workspace
/// carries no YAML dependency, and charm metadata only ever needs this one
/// top-level key here, so a line scan is all that's warranted.
fn charm_name_from_metadata(bytes: &[u8]) -> Result<String, CoreError> {
    let text = String::from_utf8_lossy(bytes);
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("name:") {
            let name = rest.trim().trim_matches(|c| c == '"' || c == '\'');
            if !name.is_empty() {
                return Ok(name.to_string());
            }
        }
    }
    Err(invalid_archive("metadata.yaml has no name field"))
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, path: &str) -> Result<Vec<u8>, CoreError> {
    let mut file = archive.by_name(path).map_err(zip_err)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(io_err)?;
    Ok(bytes)
}

/// Validate a symlink target is relative and cannot escape the archive root
/// once resolved from `entry_dir`.
fn symlink_target_is_safe(entry_dir: &str, target: &str) -> bool {
    if target.starts_with('/') {
        return false;
    }
    let mut depth: i64 = entry_dir.split('/').filter(|s| !s.is_empty()).count() as i64;
    for component in target.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => depth += 1,
        }
    }
    true
}

/// Re-package the archive so every path is relative to `charm_root`
/// (spec §4.5.2 step 4), writing `reserved.revision` into the `revision`
/// entry along the way. If `charm_root` is already empty this still rebuilds
/// the archive (the revision file must reflect whatever `StateStore`
/// actually committed, which may differ from what was requested).
fn repackage(bytes: &[u8], charm_root: &str, reserved: &CharmUrl) -> Result<Vec<u8>, CoreError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(zip_err)?;
    let mut out = ZipWriter::new(Cursor::new(Vec::new()));
    let prefix = if charm_root.is_empty() { String::new() } else { format!("{charm_root}/") };

    for i in 0..archive.len() {
        let (name, mode, is_dir, mut data) = {
            let mut file = archive.by_index(i).map_err(zip_err)?;
            let name = file.name().to_string();
            let mode = file.unix_mode();
            let is_dir = file.is_dir();
            let mut data = Vec::new();
            file.read_to_end(&mut data).map_err(io_err)?;
            (name, mode, is_dir, data)
        };

        let relative = match name.strip_prefix(&prefix) {
            Some(rest) => rest,
            None => continue, // outside the charm root; dropped.
        };
        if relative.is_empty() {
            continue;
        }
        if relative.split('/').any(|component| component == "..") {
            return Err(invalid_archive(format!("path escapes archive: {name}")));
        }

        let file_type = mode.map(|m| m & S_IFMT);
        match file_type {
            Some(t) if t != S_IFLNK && t != S_IFREG && t != S_IFDIR && t != 0 => {
                return Err(invalid_archive(format!("unsupported special file: {relative}")));
            }
            _ => {}
        }

        if file_type == Some(S_IFLNK) {
            let target = String::from_utf8_lossy(&data).into_owned();
            let (entry_dir, _) = split_entry(relative);
            if !symlink_target_is_safe(entry_dir, &target) {
                return Err(invalid_archive(format!("unsafe symlink: {relative} -> {target}")));
            }
        } else if relative == "revision" {
            data = reserved.revision.to_string().into_bytes();
        } else if relative.starts_with("hooks/") && file_type != Some(S_IFLNK) && !is_dir {
            let executable = mode.map(|m| m & 0o111 != 0).unwrap_or(false);
            if !executable {
                let base_mode = mode.unwrap_or(0o100644);
                let new_mode = base_mode | 0o100;
                let options = SimpleFileOptions::default()
                    .compression_method(CompressionMethod::Deflated)
                    .unix_permissions(new_mode);
                out.start_file(relative, options).map_err(zip_err)?;
                out.write_all(&data).map_err(io_err)?;
                continue;
            }
        }

        if is_dir {
            let options = SimpleFileOptions::default();
            out.add_directory(relative, options).map_err(zip_err)?;
            continue;
        }

        let mut options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        if let Some(mode) = mode {
            options = options.unix_permissions(mode);
        }
        out.start_file(relative, options).map_err(zip_err)?;
        out.write_all(&data).map_err(io_err)?;
    }

    let cursor = out.finish().map_err(zip_err)?;
    Ok(cursor.into_inner())
}

/// The full upload flow (spec §4.5.2 steps 2-7). `series` comes from the
/// `?series=` query parameter; the charm name and requested revision are
/// read out of the archive itself.
pub async fn handle_upload(
    state: &Arc<dyn StateStore>,
    store: &Arc<dyn ObjectStore>,
    series: &str,
    body: &[u8],
) -> Result<CharmUploadResponse, CoreError> {
    let mut archive = ZipArchive::new(Cursor::new(body)).map_err(zip_err)?;
    let charm_root = find_charm_root(&mut archive)?;
    let metadata_path = if charm_root.is_empty() {
        "metadata.yaml".to_string()
    } else {
        format!("{charm_root}/metadata.yaml")
    };
    let metadata_bytes = read_entry(&mut archive, &metadata_path)?;
    let name = charm_name_from_metadata(&metadata_bytes)?;

    let revision_path = if charm_root.is_empty() { "revision".to_string() } else { format!("{charm_root}/revision") };
    let requested_revision = match read_entry(&mut archive, &revision_path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim().parse::<u32>().unwrap_or(0),
        Err(_) => 0,
    };

    let requested_url = CharmUrl { series: series.to_string(), name, revision: requested_revision };
    let reserved = state.prepare_local_charm_upload(requested_url).await?;

    let rebuilt = repackage(body, &charm_root, &reserved)?;

    let mut hasher = Sha256::new();
    hasher.update(&rebuilt);
    let sha256 = hex::encode(hasher.finalize());

    let storage_name = format!("\"{reserved}\"");
    let storage_url = store.put(&storage_name, rebuilt).await?;
    state.update_uploaded_charm(&reserved, storage_url, sha256).await?;

    Ok(CharmUploadResponse { charm_url: reserved.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::auth::Authenticator;
    use fleet_core::future::BoxFuture;
    use fleet_core::model::{Credential, HostPort, Tag};
    use fleet_core::state::{Life, StatusSnapshot};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn build_zip(entries: &[(&str, &[u8], Option<u32>)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data, mode) in entries {
            let mut options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            if let Some(mode) = mode {
                options = options.unix_permissions(*mode);
            }
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    struct CountingStore {
        next_revision: AtomicU32,
    }

    impl StateStore for CountingStore {
        fn check_credentials(
            &self,
            _credential: &Credential,
        ) -> BoxFuture<'_, Result<Arc<dyn Authenticator>, CoreError>> {
            Box::pin(async { Err(CoreError::unauthorized("unused")) })
        }
        fn api_host_ports(&self) -> BoxFuture<'_, Result<Vec<HostPort>, CoreError>> {
            Box::pin(async { Ok(Vec::new()) })
        }
        fn promote_machine_credential(&self, _tag: &Tag) -> BoxFuture<'_, Result<(), CoreError>> {
            Box::pin(async { Ok(()) })
        }
        fn entity_life(&self, _tag: &Tag) -> BoxFuture<'_, Result<Life, CoreError>> {
            Box::pin(async { Ok(Life::Alive) })
        }
        fn can_access(&self, _requester: &Tag, _target: &Tag) -> BoxFuture<'_, Result<bool, CoreError>> {
            Box::pin(async { Ok(true) })
        }
        fn watch_life(
            &self,
            _tag: &Tag,
        ) -> BoxFuture<'_, Result<(Life, fleet_core::future::BoxStream<'static, Life>), CoreError>> {
            Box::pin(async { Err(CoreError::unauthorized("unused")) })
        }
        fn full_status(&self) -> BoxFuture<'_, Result<StatusSnapshot, CoreError>> {
            Box::pin(async {
                Ok(StatusSnapshot { environment: String::new(), machine_count: 0, service_count: 0 })
            })
        }
        fn prepare_local_charm_upload(&self, url: CharmUrl) -> BoxFuture<'_, Result<CharmUrl, CoreError>> {
            Box::pin(async move {
                let revision = self.next_revision.fetch_add(1, Ordering::SeqCst);
                Ok(CharmUrl { revision, ..url })
            })
        }
        fn update_uploaded_charm(
            &self,
            _url: &CharmUrl,
            _storage_url: String,
            _sha256: String,
        ) -> BoxFuture<'_, Result<(), CoreError>> {
            Box::pin(async { Ok(()) })
        }
        fn record_agent_presence(&self, _tag: &Tag) -> BoxFuture<'_, Result<(), CoreError>> {
            Box::pin(async { Ok(()) })
        }
        fn ping(&self) -> BoxFuture<'_, Result<(), CoreError>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn uploads_a_well_formed_root_level_archive() {
        let body = build_zip(&[
            ("metadata.yaml", b"name: mysql\nsummary: a db\n", None),
            ("config.yaml", b"options: {}\n", None),
            ("hooks/install", b"#!/bin/bash\necho hi\n", Some(0o100644)),
        ]);
        let state: Arc<dyn StateStore> = Arc::new(CountingStore { next_revision: AtomicU32::new(0) });
        let store: Arc<dyn ObjectStore> = Arc::new(crate::object_store::InMemoryObjectStore::new());
        let response = handle_upload(&state, &store, "focal", &body).await.unwrap();
        assert_eq!(response.charm_url, "local:focal/mysql-0");
    }

    #[tokio::test]
    async fn rejects_archive_missing_metadata_yaml() {
        let body = build_zip(&[("config.yaml", b"options: {}\n", None)]);
        let state: Arc<dyn StateStore> = Arc::new(CountingStore { next_revision: AtomicU32::new(0) });
        let store: Arc<dyn ObjectStore> = Arc::new(crate::object_store::InMemoryObjectStore::new());
        let err = handle_upload(&state, &store, "focal", &body).await.unwrap_err();
        assert!(err.message().contains("missing metadata.yaml"));
    }

    #[tokio::test]
    async fn rejects_mixed_parent_directories() {
        let body = build_zip(&[
            ("mysql/metadata.yaml", b"name: mysql\n", None),
            ("other/config.yaml", b"options: {}\n", None),
        ]);
        let state: Arc<dyn StateStore> = Arc::new(CountingStore { next_revision: AtomicU32::new(0) });
        let store: Arc<dyn ObjectStore> = Arc::new(crate::object_store::InMemoryObjectStore::new());
        let err = handle_upload(&state, &store, "focal", &body).await.unwrap_err();
        assert!(err.message().contains("same directory"));
    }

    #[tokio::test]
    async fn repackages_a_nested_archive_to_root_relative_paths() {
        let body = build_zip(&[
            ("mysql/metadata.yaml", b"name: mysql\n", None),
            ("mysql/hooks/install", b"#!/bin/bash\n", Some(0o100644)),
        ]);
        let reserved = CharmUrl { series: "focal".into(), name: "mysql".into(), revision: 3 };
        let rebuilt = repackage(&body, "mysql", &reserved).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(rebuilt.as_slice())).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"metadata.yaml".to_string()));
        assert!(names.contains(&"hooks/install".to_string()));
        let hook_mode = archive.by_name("hooks/install").unwrap().unix_mode().unwrap();
        assert!(hook_mode & 0o111 != 0);
    }

    #[test]
    fn symlink_escape_detection() {
        assert!(symlink_target_is_safe("hooks", "../lib/util.sh"));
        assert!(!symlink_target_is_safe("", "../outside"));
        assert!(!symlink_target_is_safe("a/b", "../../../etc/passwd"));
    }
}
