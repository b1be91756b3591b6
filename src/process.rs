//! Tor process creation and supervision primitives.
//!
//! The factory is a capability trait so that an embedded/static Tor can be
//! supplied as an alternate implementation with identical spawn/wait
//! semantics; the default implementation runs an external `tor` binary.

use crate::error::{Result, TorControlError};
use crate::protocol::partition;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// A running Tor process.
#[async_trait]
pub trait Process: Send {
    /// Wait for the process to exit; errors when it exited unsuccessfully.
    async fn wait(&mut self) -> Result<()>;

    /// The cancellation handle: forcibly terminate the process. Used when a
    /// graceful HALT was not possible.
    fn terminate(&mut self) -> Result<()>;
}

/// Factory for Tor processes.
pub trait ProcessCreator: Send + Sync {
    /// Spawn a Tor process with the given arguments.
    fn create(&self, args: &[String]) -> Result<Box<dyn Process>>;
}

/// Runs an external Tor executable.
#[derive(Debug, Clone)]
pub struct ExeProcessCreator {
    exe_path: PathBuf,
}

impl ExeProcessCreator {
    /// Creator for the executable at `exe_path` (a bare "tor" resolves via
    /// PATH).
    pub fn new(exe_path: impl Into<PathBuf>) -> Self {
        ExeProcessCreator {
            exe_path: exe_path.into(),
        }
    }
}

impl ProcessCreator for ExeProcessCreator {
    fn create(&self, args: &[String]) -> Result<Box<dyn Process>> {
        debug!(exe = %self.exe_path.display(), ?args, "starting tor");
        let child = Command::new(&self.exe_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TorControlError::ProcessStartFailed(format!(
                    "{}: {}",
                    self.exe_path.display(),
                    e
                ))
            })?;
        Ok(Box::new(ExeProcess { child }))
    }
}

struct ExeProcess {
    child: Child,
}

#[async_trait]
impl Process for ExeProcess {
    async fn wait(&mut self) -> Result<()> {
        let status = self.child.wait().await?;
        if !status.success() {
            return Err(TorControlError::ProcessStartFailed(format!(
                "tor exited with {}",
                status
            )));
        }
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        self.child.start_kill()?;
        Ok(())
    }
}

/// Parse the file Tor writes when started with `ControlPortWriteToFile`:
/// a single `PORT=<host>:<port>` line.
pub fn control_port_from_file_contents(contents: &str) -> Result<u16> {
    let contents = contents.trim();
    let (_, port, found) = partition(contents, ':');
    if !found || !contents.starts_with("PORT=") {
        return Err(TorControlError::InvalidControlPortFile(
            contents.to_string(),
        ));
    }
    port.parse()
        .map_err(|_| TorControlError::InvalidControlPortFile(contents.to_string()))
}

/// Read and parse the control-port file at `path`.
pub async fn control_port_from_file(path: &Path) -> Result<u16> {
    let contents = tokio::fs::read_to_string(path).await?;
    control_port_from_file_contents(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_port_from_file_contents() {
        assert_eq!(
            control_port_from_file_contents("PORT=127.0.0.1:41337\n").unwrap(),
            41337
        );
        assert_eq!(
            control_port_from_file_contents("  PORT=127.0.0.1:1  ").unwrap(),
            1
        );
    }

    #[test]
    fn test_control_port_missing_prefix() {
        assert!(matches!(
            control_port_from_file_contents("127.0.0.1:41337"),
            Err(TorControlError::InvalidControlPortFile(_))
        ));
    }

    #[test]
    fn test_control_port_malformed() {
        assert!(control_port_from_file_contents("").is_err());
        assert!(control_port_from_file_contents("PORT=127.0.0.1").is_err());
        assert!(control_port_from_file_contents("PORT=127.0.0.1:notaport").is_err());
    }

    #[tokio::test]
    async fn test_control_port_from_missing_file() {
        let result = control_port_from_file(Path::new("/nonexistent/control-port")).await;
        assert!(matches!(result, Err(TorControlError::Io(_))));
    }
}
