use std::io;
use std::path::{Path, PathBuf};

/// Persistence boundary for one serialized credential.
pub trait TokenStore {
    /// Read the stored payload; `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> io::Result<Option<String>>;

    /// Replace the stored payload.
    fn save(&self, payload: &str) -> io::Result<()>;

    /// Human-readable location for log messages.
    fn describe(&self) -> String;
}

/// A token kept in a JSON file on disk.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> io::Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, payload: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        // Write beside the target and rename so a crash never leaves half a token.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
