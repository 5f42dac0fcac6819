//
// storage.rs
// Dicom-WSI-rs
//
// Owns the output directory and derives deterministic file names for generated instances.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::ConfigurationError;

#[derive(Debug, Clone)]
pub struct OutputDir {
    root: PathBuf,
}

impl OutputDir {
    /// Check that `root` is, or can become, a writable directory. Nothing is created here.
    ///
    /// A missing directory is judged by its nearest existing ancestor, which is
    /// where `create` would have to add entries.
    pub fn check(root: &Path) -> Result<(), ConfigurationError> {
        if root.exists() && !root.is_dir() {
            return Err(ConfigurationError::OutputNotADirectory(root.to_path_buf()));
        }

        let Some(anchor) = nearest_existing(root) else {
            return Ok(());
        };
        let metadata = fs::metadata(&anchor)
            .map_err(|_| ConfigurationError::OutputNotWritable(anchor.clone()))?;
        if !metadata.is_dir() {
            return Err(ConfigurationError::OutputNotADirectory(anchor));
        }
        if metadata.permissions().readonly() {
            return Err(ConfigurationError::OutputNotWritable(anchor));
        }
        Ok(())
    }

    pub fn create(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<prefix>-<index>-<flavor>.dcm`, with the prefix kept as given.
    pub fn instance_path(&self, prefix: &str, index: usize, flavor: &str) -> PathBuf {
        let filename = format!("{}-{:02}-{}.dcm", prefix, index, flavor.to_ascii_lowercase());
        self.root.join(filename)
    }
}

/// Reject prefixes that are not a single, plain file-name component.
pub fn check_output_name(name: &str) -> Result<(), ConfigurationError> {
    if name.trim().is_empty() {
        return Err(ConfigurationError::EmptyOutputName);
    }
    let unsafe_char = name
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control());
    if unsafe_char || name == "." || name == ".." {
        return Err(ConfigurationError::UnsafeOutputName(name.to_string()));
    }
    Ok(())
}

fn nearest_existing(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .map(|ancestor| {
            if ancestor.as_os_str().is_empty() {
                Path::new(".")
            } else {
                ancestor
            }
        })
        .find(|candidate| candidate.exists())
        .map(Path::to_path_buf)
}
