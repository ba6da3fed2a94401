//! Data filenames for output ports
//!
//! Every output port owns a file handle, allocated once per port and
//! propagated along connections to the destination inputs.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{FlowEngineError, Result};

/// Source of output port filenames
pub trait FilenameAllocator: Send {
    /// Allocate the filename of output `index` of the element `full_uuid`.
    fn allocate(&mut self, namespace: &str, full_uuid: &str, index: usize, suffix: &str) -> Result<String>;

    /// Return a filename to the allocator.
    fn release(&mut self, filename: &str);
}

/// Allocates `folder/<namespace>/<uuid>_<index>.<suffix>` paths.
///
/// A filename is never handed out twice while allocated.
#[derive(Debug, Default)]
pub struct SessionFilenames {
    folder: PathBuf,
    allocated: HashSet<String>,
}

impl SessionFilenames {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            allocated: HashSet::new(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn is_allocated(&self, filename: &str) -> bool {
        self.allocated.contains(filename)
    }
}

fn strip_braces(uuid: &str) -> String {
    uuid.chars().filter(|c| *c != '{' && *c != '}').collect()
}

impl FilenameAllocator for SessionFilenames {
    fn allocate(&mut self, namespace: &str, full_uuid: &str, index: usize, suffix: &str) -> Result<String> {
        let path = self
            .folder
            .join(strip_braces(namespace))
            .join(format!("{}_{}.{}", strip_braces(full_uuid), index, suffix));
        let filename = path.to_string_lossy().into_owned();

        if !self.allocated.insert(filename.clone()) {
            log::error!("Filename allocated twice: {}", filename);
            return Err(FlowEngineError::FilenameCollision(filename));
        }
        Ok(filename)
    }

    fn release(&mut self, filename: &str) {
        self.allocated.remove(filename);
    }
}

/// Delete data files, ignoring those that do not exist.
pub fn remove_files<I, P>(paths: I)
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    for path in paths {
        let path = path.as_ref();
        match std::fs::remove_file(path) {
            Ok(()) => log::debug!("Removed {:?}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {:?}: {}", path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_builds_path() {
        let mut filenames = SessionFilenames::new("/session");
        let name = filenames
            .allocate("{ns}", "{ns}{node}", 1, "sydata")
            .unwrap();
        assert_eq!(
            PathBuf::from(&name),
            PathBuf::from("/session/ns/nsnode_1.sydata")
        );
        assert!(filenames.is_allocated(&name));
    }

    #[test]
    fn test_allocate_twice_is_collision() {
        let mut filenames = SessionFilenames::new("/session");
        let first = filenames.allocate("ns", "a", 0, "sydata").unwrap();
        let err = filenames.allocate("ns", "a", 0, "sydata").unwrap_err();
        assert!(matches!(err, FlowEngineError::FilenameCollision(_)));

        filenames.release(&first);
        assert!(filenames.allocate("ns", "a", 0, "sydata").is_ok());
    }

    #[test]
    fn test_remove_files_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("a.sydata");
        std::fs::write(&existing, b"data").unwrap();

        remove_files([existing.clone(), dir.path().join("missing.sydata")]);
        assert!(!existing.exists());
    }
}
