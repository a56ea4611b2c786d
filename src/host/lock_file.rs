use crate::common::box_error::BoxError;
use log::{debug, warn};
use simple_error::bail;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const LOCK_DIR: &str = "locks";

/// `<dir>/<port>` holding a caller supplied string.  Removed on drop.
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn create(dir: &Path, port: u16, content: &str) -> Result<LockFile, BoxError> {
        let path = dir.join(port.to_string());
        if let Err(e) = fs::write(&path, content) {
            bail!("Unable to create lock file \"{}\": {}", path.display(), e);
        }
        debug!("created lock file {}", path.display());
        Ok(LockFile { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("cannot remove lock file {}: {}", self.path.display(), e);
        }
    }
}
