//! Launching and supervising a Tor process.
//!
//! [`Tor::start`] launches the daemon, discovers its control port, connects
//! the control channel, and authenticates. [`Tor::close`] runs the ordered
//! shutdown handshake: HALT, controller close, forced termination when HALT
//! was not possible, a bounded wait for exit, and optional data-directory
//! cleanup.

use crate::config::StartConf;
use crate::connection::TorClient;
use crate::error::{Result, TorControlError};
use crate::events::{Event, EventType};
use crate::process::{self, ExeProcessCreator, Process, ProcessCreator};
use crate::types::{KeyVal, Signal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long Tor gets to write the control-port file: 10 polls, 200 ms apart.
const CONTROL_PORT_POLL_ATTEMPTS: u32 = 10;
const CONTROL_PORT_POLL_DELAY: Duration = Duration::from_millis(200);
/// How long the process gets to exit during close.
const CLOSE_WAIT: Duration = Duration::from_millis(300);

/// A supervised Tor process together with its authenticated control client.
pub struct Tor {
    process: Option<Box<dyn Process>>,
    control: Option<Arc<TorClient>>,
    control_port: u16,
    data_dir: PathBuf,
    delete_data_dir_on_close: bool,
    /// HALT on close only when we own the process; an attached Tor keeps
    /// running.
    halt_on_close: bool,
}

fn build_args(conf: &StartConf, data_dir: &Path, torrc: &Path, port_file: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "--DataDirectory".to_string(),
        data_dir.display().to_string(),
    ];
    if !conf.disable_cookie_auth {
        args.push("--CookieAuthentication".to_string());
        args.push("1".to_string());
    }
    if !conf.enable_network {
        args.push("--DisableNetwork".to_string());
        args.push("1".to_string());
    }
    args.push("-f".to_string());
    args.push(torrc.display().to_string());
    if let Some(port_file) = port_file {
        args.push("--ControlPort".to_string());
        args.push("auto".to_string());
        args.push("--ControlPortWriteToFile".to_string());
        args.push(port_file.display().to_string());
    }
    if !conf.no_auto_socks_port {
        args.push("--SocksPort".to_string());
        args.push("auto".to_string());
    }
    args.extend(conf.extra_args.iter().cloned());
    args
}

impl Tor {
    /// Launch Tor and return a supervised handle with an authenticated
    /// control client.
    ///
    /// On failure the partially-started instance is closed best-effort; the
    /// original error is returned.
    pub async fn start(conf: StartConf) -> Result<Tor> {
        let mut tor = Tor {
            process: None,
            control: None,
            control_port: conf.control_port,
            data_dir: PathBuf::new(),
            delete_data_dir_on_close: false,
            halt_on_close: true,
        };
        if let Some(dir) = &conf.data_dir {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                TorControlError::ProcessStartFailed(format!("Unable to create data dir: {}", e))
            })?;
            tor.data_dir = dir.clone();
        } else {
            let base = conf
                .temp_data_dir_base
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            let dir = tempfile::Builder::new()
                .prefix("data-dir-")
                .tempdir_in(&base)
                .map_err(|e| {
                    TorControlError::ProcessStartFailed(format!(
                        "Unable to create temp data dir: {}",
                        e
                    ))
                })?;
            tor.data_dir = dir.keep();
            tor.delete_data_dir_on_close = !conf.retain_temp_data_dir;
            debug!(dir = %tor.data_dir.display(), "created temp data directory");
        }
        // From here on, failures must tear down whatever already started.
        if let Err(e) = tor.start_process_and_connect(&conf).await {
            if let Err(close_err) = tor.close().await {
                warn!(error = %close_err, "close after failed start also failed");
            }
            return Err(e);
        }
        Ok(tor)
    }

    async fn start_process_and_connect(&mut self, conf: &StartConf) -> Result<()> {
        let creator: Arc<dyn ProcessCreator> = match &conf.process_creator {
            Some(creator) => {
                if !conf.exe_path.is_empty() {
                    return Err(TorControlError::InvalidArgument(
                        "exe_path and process_creator are mutually exclusive".to_string(),
                    ));
                }
                creator.clone()
            }
            None => {
                let exe = if conf.exe_path.is_empty() {
                    "tor"
                } else {
                    conf.exe_path.as_str()
                };
                Arc::new(ExeProcessCreator::new(exe))
            }
        };

        let torrc = match &conf.torrc_file {
            Some(path) => path.clone(),
            None => self.create_temp_file("torrc-")?,
        };
        let port_file = if conf.control_port == 0 {
            Some(self.create_temp_file("control-port-")?)
        } else {
            None
        };

        let args = build_args(conf, &self.data_dir, &torrc, port_file.as_deref());
        self.process = Some(creator.create(&args)?);

        if let Some(port_file) = &port_file {
            self.control_port = discover_control_port(port_file).await?;
        }
        debug!(port = self.control_port, "connecting to control port");
        let client = TorClient::connect(&format!("127.0.0.1:{}", self.control_port)).await?;
        self.control = Some(Arc::new(client));

        if !conf.disable_eager_auth {
            self.control()?.authenticate("").await?;
        }
        Ok(())
    }

    fn create_temp_file(&self, prefix: &str) -> Result<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(&self.data_dir)
            .map_err(|e| {
                TorControlError::ProcessStartFailed(format!(
                    "Unable to create {} file: {}",
                    prefix, e
                ))
            })?;
        let (_, path) = file.keep().map_err(|e| {
            TorControlError::ProcessStartFailed(format!("Unable to keep {} file: {}", prefix, e))
        })?;
        Ok(path)
    }

    /// Attach to an already-running Tor's control port without supervising
    /// a process. [`Tor::close`] then only closes the controller; the daemon
    /// keeps running.
    pub async fn connect(addr: &str, password: &str) -> Result<Tor> {
        let client = TorClient::connect(addr).await?;
        client.authenticate(password).await?;
        Ok(Tor {
            process: None,
            control: Some(Arc::new(client)),
            control_port: 0,
            data_dir: PathBuf::new(),
            delete_data_dir_on_close: false,
            halt_on_close: false,
        })
    }

    /// The control client; errors once the instance has been closed.
    pub fn control(&self) -> Result<&Arc<TorClient>> {
        self.control.as_ref().ok_or(TorControlError::ConnectionClosed)
    }

    /// The control port in use.
    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    /// The data directory Tor is running from.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Enable networking (`SETCONF DisableNetwork=0`); when `wait` is set,
    /// block until bootstrap reports 100%.
    pub async fn enable_network(&self, cancel: &CancellationToken, wait: bool) -> Result<()> {
        let control = self.control()?;
        debug!("enabling network");
        control
            .set_conf(&[KeyVal::new("DisableNetwork", "0")])
            .await?;
        if !wait {
            return Ok(());
        }
        debug!("waiting for bootstrap");
        control
            .event_wait(&[EventType::StatusClient], cancel, |event| {
                let Event::Status(status) = event else {
                    return Ok(false);
                };
                if status.action != "BOOTSTRAP" {
                    return Ok(false);
                }
                if status.severity == "NOTICE"
                    && status.arguments.get("PROGRESS").map(String::as_str) == Some("100")
                {
                    return Ok(true);
                }
                if status.severity == "ERR" {
                    return Err(TorControlError::ConnectionFailed(format!(
                        "Failed bootstrapping, status: {:?}",
                        status.arguments
                    )));
                }
                Ok(false)
            })
            .await?;
        Ok(())
    }

    /// Ordered shutdown: HALT when authenticated, controller close, forced
    /// termination when HALT was not sent, a bounded wait for process exit,
    /// and optional data-directory removal. Errors from every step are
    /// aggregated; calling close again is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let mut errs: Vec<String> = Vec::new();
        let mut sent_halt = false;
        if let Some(control) = self.control.take() {
            if self.halt_on_close && control.is_authenticated() {
                match control.signal(Signal::Halt).await {
                    Ok(()) => sent_halt = true,
                    Err(e) => errs.push(format!("Unable to signal halt: {}", e)),
                }
            }
            if let Err(e) = control.close().await {
                errs.push(format!("Unable to close controller: {}", e));
            }
        }
        if let Some(mut process) = self.process.take() {
            if !sent_halt {
                if let Err(e) = process.terminate() {
                    errs.push(format!("Unable to terminate process: {}", e));
                }
            }
            match tokio::time::timeout(CLOSE_WAIT, process.wait()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errs.push(format!("Process wait failed: {}", e)),
                Err(_) => errs.push(format!(
                    "Process did not exit after {} ms",
                    CLOSE_WAIT.as_millis()
                )),
            }
        }
        if self.delete_data_dir_on_close {
            self.delete_data_dir_on_close = false;
            if let Err(e) = tokio::fs::remove_dir_all(&self.data_dir).await {
                errs.push(format!(
                    "Failed to remove data dir {}: {}",
                    self.data_dir.display(),
                    e
                ));
            }
        }
        if errs.is_empty() {
            Ok(())
        } else {
            Err(TorControlError::CloseErrors(errs))
        }
    }
}

async fn discover_control_port(path: &Path) -> Result<u16> {
    let mut last_err = None;
    for attempt in 0..CONTROL_PORT_POLL_ATTEMPTS {
        match process::control_port_from_file(path).await {
            Ok(port) => return Ok(port),
            // The file is created by us before launch; failing to read it at
            // all is not worth retrying.
            Err(e @ TorControlError::Io(_)) => return Err(e),
            Err(e) => last_err = Some(e),
        }
        debug!(attempt, "control port file not ready");
        tokio::time::sleep(CONTROL_PORT_POLL_DELAY).await;
    }
    Err(TorControlError::ControlPortUnavailable(
        last_err.map(|e| e.to_string()).unwrap_or_default(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf() -> StartConf {
        StartConf::default()
    }

    #[test]
    fn test_build_args_defaults() {
        let args = build_args(
            &conf(),
            Path::new("/data"),
            Path::new("/data/torrc-1"),
            Some(Path::new("/data/control-port-1")),
        );
        assert_eq!(
            args,
            vec![
                "--DataDirectory",
                "/data",
                "--CookieAuthentication",
                "1",
                "--DisableNetwork",
                "1",
                "-f",
                "/data/torrc-1",
                "--ControlPort",
                "auto",
                "--ControlPortWriteToFile",
                "/data/control-port-1",
                "--SocksPort",
                "auto",
            ]
        );
    }

    #[test]
    fn test_build_args_opt_outs() {
        let conf = conf()
            .disable_cookie_auth(true)
            .enable_network(true)
            .no_auto_socks_port(true)
            .extra_args(["--Log", "notice stdout"]);
        let args = build_args(&conf, Path::new("/data"), Path::new("/torrc"), None);
        assert_eq!(
            args,
            vec![
                "--DataDirectory",
                "/data",
                "-f",
                "/torrc",
                "--Log",
                "notice stdout",
            ]
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent_without_process() {
        let mut tor = Tor {
            process: None,
            control: None,
            control_port: 0,
            data_dir: PathBuf::from("/nonexistent"),
            delete_data_dir_on_close: false,
            halt_on_close: true,
        };
        tor.close().await.unwrap();
        tor.close().await.unwrap();
        assert!(tor.control().is_err());
    }

    #[tokio::test]
    async fn test_close_removes_temp_data_dir() {
        let dir = tempfile::tempdir().unwrap().keep();
        assert!(dir.exists());
        let mut tor = Tor {
            process: None,
            control: None,
            control_port: 0,
            data_dir: dir.clone(),
            delete_data_dir_on_close: true,
            halt_on_close: true,
        };
        tor.close().await.unwrap();
        assert!(!dir.exists());
        // Second close must not error on the already-removed directory.
        tor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_discover_control_port_gives_up() {
        tokio::time::pause();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "").unwrap();
        let fut = discover_control_port(file.path());
        let result = tokio::time::timeout(Duration::from_secs(30), fut).await;
        assert!(matches!(
            result,
            Ok(Err(TorControlError::ControlPortUnavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_discover_control_port_success() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "PORT=127.0.0.1:41337\n").unwrap();
        assert_eq!(discover_control_port(file.path()).await.unwrap(), 41337);
    }
}
