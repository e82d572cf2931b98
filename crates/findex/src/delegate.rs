//! File-manager delegation.
//!
//! Opening, revealing and downloading files is the platform shell's
//! job; the core only launches the request and reports launch failures.

use std::path::Path;
use std::process::Command;

use crate::error::{FindexError, Result};

pub trait FileManagerDelegate: Send + Sync {
    /// Opens the file with its default application.
    fn open(&self, path: &str) -> Result<()>;
    /// Reveals the file in the system file manager.
    fn reveal(&self, path: &str) -> Result<()>;
    /// Asks the cloud provider to materialize an online-only file.
    fn request_download(&self, path: &str) -> Result<()>;
}

/// Delegate backed by the platform's standard launcher commands.
#[derive(Debug, Default)]
pub struct SystemFileManager;

impl SystemFileManager {
    pub fn new() -> Self {
        Self
    }

    fn launch(&self, program: &str, args: &[String]) -> Result<()> {
        Command::new(program)
            .args(args)
            .spawn()
            .map(|_| ())
            .map_err(|error| {
                FindexError::Internal(format!("failed to launch {program}: {error}"))
            })
    }

    /// Tries each launcher in order; the first that spawns wins.
    fn launch_chain(&self, invocations: &[(&str, Vec<String>)]) -> Result<()> {
        let mut last = None;
        for (program, args) in invocations {
            match self.launch(program, args) {
                Ok(()) => return Ok(()),
                Err(error) => {
                    log::warn!("launcher unavailable: {error}");
                    last = Some(error);
                }
            }
        }
        Err(last.unwrap_or_else(|| FindexError::Internal("no launcher configured".to_string())))
    }
}

impl FileManagerDelegate for SystemFileManager {
    #[cfg(target_os = "macos")]
    fn open(&self, path: &str) -> Result<()> {
        self.launch_chain(&[
            ("open", vec![path.to_string()]),
            (
                "osascript",
                vec![
                    "-e".to_string(),
                    format!("tell application \"Finder\" to open POSIX file \"{path}\""),
                ],
            ),
        ])
    }

    #[cfg(not(target_os = "macos"))]
    fn open(&self, path: &str) -> Result<()> {
        self.launch_chain(&[
            ("xdg-open", vec![path.to_string()]),
            ("gio", vec!["open".to_string(), path.to_string()]),
        ])
    }

    #[cfg(target_os = "macos")]
    fn reveal(&self, path: &str) -> Result<()> {
        self.launch_chain(&[
            ("open", vec!["-R".to_string(), path.to_string()]),
            (
                "osascript",
                vec![
                    "-e".to_string(),
                    format!("tell application \"Finder\" to reveal POSIX file \"{path}\""),
                ],
            ),
        ])
    }

    #[cfg(not(target_os = "macos"))]
    fn reveal(&self, path: &str) -> Result<()> {
        // No portable reveal; open the containing directory instead.
        let parent = Path::new(path)
            .parent()
            .and_then(|p| p.to_str())
            .unwrap_or(path);
        self.launch_chain(&[
            ("xdg-open", vec![parent.to_string()]),
            ("gio", vec!["open".to_string(), parent.to_string()]),
        ])
    }

    #[cfg(target_os = "macos")]
    fn request_download(&self, path: &str) -> Result<()> {
        // Opening the placeholder also makes the provider fetch it.
        self.launch_chain(&[
            ("brctl", vec!["download".to_string(), path.to_string()]),
            ("open", vec![path.to_string()]),
        ])
    }

    #[cfg(not(target_os = "macos"))]
    fn request_download(&self, path: &str) -> Result<()> {
        // Opening an online-only file makes the provider fetch it.
        self.open(path)
    }
}
