use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Platform data directory for keyward, created if missing.
pub fn data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("dev", "keyward", "keyward")
        .context("could not determine a home directory; set KEYWARD_DATA_DIR")?;
    let dir = dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create data dir {}", dir.display()))?;
    Ok(dir)
}
