//! Disk image metadata inspection
//!
//! Reads an image's backing-file reference in structured form via
//! `qemu-img info --output=json`.

use crate::error::{Error, Result};
use crate::ui;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Interface to the external image metadata inspector
pub trait ImageInspector {
    /// The backing file recorded in the image header, if any. The
    /// returned path may be relative to the image's directory.
    fn backing_file(&self, image: &Path) -> Result<Option<PathBuf>>;
}

#[derive(Debug, Deserialize)]
struct ImageInfo {
    #[serde(rename = "backing-filename")]
    backing_filename: Option<String>,
    #[serde(rename = "full-backing-filename")]
    full_backing_filename: Option<String>,
}

/// `qemu-img`-backed inspector
pub struct QemuImgInspector {
    bin: String,
}

impl QemuImgInspector {
    pub fn new() -> Self {
        Self {
            bin: "qemu-img".to_string(),
        }
    }
}

impl Default for QemuImgInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageInspector for QemuImgInspector {
    fn backing_file(&self, image: &Path) -> Result<Option<PathBuf>> {
        let image_arg = image.to_string_lossy();
        ui::cmd(&format!("{} info --output=json {}", self.bin, image_arg));
        let output = Command::new(&self.bin)
            .args(["info", "--output=json"])
            .arg(image)
            .output()?;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: format!("{} info --output=json {}", self.bin, image_arg),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let info: ImageInfo = serde_json::from_slice(&output.stdout)?;
        // qemu resolves the full path when it can; prefer it
        let backing = info.full_backing_filename.or(info.backing_filename);
        Ok(backing.map(PathBuf::from))
    }
}
