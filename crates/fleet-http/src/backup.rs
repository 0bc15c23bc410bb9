//! State backup download (spec §4.5.4): runs a backup routine, streams the
//! resulting archive with its SHA-256 in a header, and tidies up the scratch
//! directory afterward regardless of outcome.

use std::path::PathBuf;

use fleet_core::error::{codes, CoreError, ErrorCategory};
use sha2::{Digest, Sha256};
use tar::Builder;

fn io_err(err: std::io::Error) -> CoreError {
    CoreError::new(codes::INTERNAL, ErrorCategory::Internal, err.to_string())
}

/// The capability that actually knows how to assemble a backup's contents.
/// Spec §1 puts the state store (and everything it persists) out of scope;
/// this is the seam a real implementation plugs a snapshot routine into.
pub trait BackupSource: Send + Sync + 'static {
    /// Write whatever files belong in the backup under `scratch_dir`.
    fn populate(&self, scratch_dir: &std::path::Path) -> Result<(), CoreError>;
}

/// The finished backup: a gzip'd tar archive's bytes plus their SHA-256, and
/// the scratch directory that produced it (removed by the caller once the
/// response has been fully sent).
pub struct BackupArchive {
    pub bytes: Vec<u8>,
    pub sha256: String,
    pub scratch_dir: PathBuf,
}

/// Run the backup routine: create a scratch directory, let `source`
/// populate it, tar+gzip the result, and hash the archive bytes.
pub fn run_backup(source: &dyn BackupSource, scratch_root: &std::path::Path) -> Result<BackupArchive, CoreError> {
    let scratch_dir = scratch_root.join(format!("backup-{}", std::process::id()));
    std::fs::create_dir_all(&scratch_dir).map_err(io_err)?;

    source.populate(&scratch_dir)?;

    let tar_gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = Builder::new(tar_gz);
    builder.append_dir_all(".", &scratch_dir).map_err(io_err)?;
    let tar_gz = builder.into_inner().map_err(io_err)?;
    let bytes = tar_gz.finish().map_err(io_err)?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());

    Ok(BackupArchive { bytes, sha256, scratch_dir })
}

/// Remove the scratch directory a [`BackupArchive`] was built from. Called
/// unconditionally after the response is sent (or fails to send) per
/// spec §4.5.4.
pub fn cleanup(archive: &BackupArchive) {
    let _ = std::fs::remove_dir_all(&archive.scratch_dir);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedContent;

    impl BackupSource for FixedContent {
        fn populate(&self, scratch_dir: &std::path::Path) -> Result<(), CoreError> {
            std::fs::write(scratch_dir.join("state.json"), b"{\"ok\":true}").map_err(io_err)
        }
    }

    #[test]
    fn runs_a_backup_and_cleans_up_afterward() {
        let scratch_root = std::env::temp_dir().join(format!("fleet-http-backup-test-{}", std::process::id()));
        std::fs::create_dir_all(&scratch_root).unwrap();

        let archive = run_backup(&FixedContent, &scratch_root).unwrap();
        assert!(!archive.bytes.is_empty());
        assert_eq!(archive.sha256.len(), 64);
        assert!(archive.scratch_dir.exists());

        cleanup(&archive);
        assert!(!archive.scratch_dir.exists());

        std::fs::remove_dir_all(&scratch_root).ok();
    }
}
