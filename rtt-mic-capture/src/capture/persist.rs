//! Raw capture persistence

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;

/// File name of the raw dump for a capture stamp
pub fn raw_file_name(stamp: &str) -> String {
    format!("pcm_data_{}.raw", stamp)
}

/// Write `buffer` verbatim to `<dir>/pcm_data_<stamp>.raw`.
///
/// An existing file with the same stamp is truncated and replaced.
pub fn persist(buffer: &[u8], dir: &Path, stamp: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(raw_file_name(stamp));
    std::fs::write(&path, buffer)?;
    info!("Saved {} raw bytes to {}", buffer.len(), path.display());
    Ok(path)
}
