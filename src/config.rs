//! Configuration for launching a Tor process.

use crate::process::ProcessCreator;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for [`crate::tor::Tor::start`].
///
/// The default value launches `tor` from PATH with a temporary data
/// directory, cookie authentication, networking disabled, and an
/// auto-assigned control port discovered through a port file.
#[derive(Clone, Default)]
pub struct StartConf {
    /// Path to the Tor executable; empty means `tor` on PATH. Ignored when
    /// `process_creator` is set.
    pub exe_path: String,
    /// Alternate process factory (e.g. an embedded Tor). Mutually exclusive
    /// with `exe_path`.
    pub process_creator: Option<Arc<dyn ProcessCreator>>,
    /// When non-zero, connect to this control port instead of asking Tor to
    /// pick one and write it to a file.
    pub control_port: u16,
    /// Data directory to use. When empty, a temporary directory is created
    /// under `temp_data_dir_base`.
    pub data_dir: Option<PathBuf>,
    /// Parent directory for the temporary data directory; defaults to the
    /// current directory. Unused when `data_dir` is set.
    pub temp_data_dir_base: Option<PathBuf>,
    /// Keep the temporary data directory on close. Unused when `data_dir`
    /// is set.
    pub retain_temp_data_dir: bool,
    /// Path to a torrc; when absent a blank temporary torrc is created in
    /// the data directory.
    pub torrc_file: Option<PathBuf>,
    /// Leave networking enabled at launch. By default `--DisableNetwork 1`
    /// is passed and the network is enabled later (e.g. by
    /// [`crate::tor::Tor::enable_network`]).
    pub enable_network: bool,
    /// Do not pass `--CookieAuthentication 1`.
    pub disable_cookie_auth: bool,
    /// Skip the automatic `authenticate("")` after connecting.
    pub disable_eager_auth: bool,
    /// Do not pass `--SocksPort auto`.
    pub no_auto_socks_port: bool,
    /// Extra command-line arguments, appended verbatim after the generated
    /// ones.
    pub extra_args: Vec<String>,
}

impl StartConf {
    /// A configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Tor executable path.
    pub fn exe_path(mut self, path: impl Into<String>) -> Self {
        self.exe_path = path.into();
        self
    }

    /// Use an alternate process factory.
    pub fn process_creator(mut self, creator: Arc<dyn ProcessCreator>) -> Self {
        self.process_creator = Some(creator);
        self
    }

    /// Use a fixed control port instead of auto-discovery.
    pub fn control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }

    /// Use a fixed data directory.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Parent directory for temporary data directories.
    pub fn temp_data_dir_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.temp_data_dir_base = Some(base.into());
        self
    }

    /// Keep the temporary data directory on close.
    pub fn retain_temp_data_dir(mut self, retain: bool) -> Self {
        self.retain_temp_data_dir = retain;
        self
    }

    /// Use a specific torrc file.
    pub fn torrc_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.torrc_file = Some(path.into());
        self
    }

    /// Leave networking enabled at launch.
    pub fn enable_network(mut self, enable: bool) -> Self {
        self.enable_network = enable;
        self
    }

    /// Disable cookie authentication.
    pub fn disable_cookie_auth(mut self, disable: bool) -> Self {
        self.disable_cookie_auth = disable;
        self
    }

    /// Skip eager authentication after connect.
    pub fn disable_eager_auth(mut self, disable: bool) -> Self {
        self.disable_eager_auth = disable;
        self
    }

    /// Do not force an automatic SOCKS port.
    pub fn no_auto_socks_port(mut self, no_auto: bool) -> Self {
        self.no_auto_socks_port = no_auto;
        self
    }

    /// Append extra Tor command-line arguments.
    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Debug for StartConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartConf")
            .field("exe_path", &self.exe_path)
            .field(
                "process_creator",
                &self.process_creator.as_ref().map(|_| "<custom>"),
            )
            .field("control_port", &self.control_port)
            .field("data_dir", &self.data_dir)
            .field("temp_data_dir_base", &self.temp_data_dir_base)
            .field("retain_temp_data_dir", &self.retain_temp_data_dir)
            .field("torrc_file", &self.torrc_file)
            .field("enable_network", &self.enable_network)
            .field("disable_cookie_auth", &self.disable_cookie_auth)
            .field("disable_eager_auth", &self.disable_eager_auth)
            .field("no_auto_socks_port", &self.no_auto_socks_port)
            .field("extra_args", &self.extra_args)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_conf() {
        let conf = StartConf::default();
        assert_eq!(conf.exe_path, "");
        assert_eq!(conf.control_port, 0);
        assert!(!conf.enable_network);
        assert!(conf.data_dir.is_none());
    }

    #[test]
    fn test_builder() {
        let conf = StartConf::new()
            .exe_path("/usr/bin/tor")
            .control_port(9051)
            .data_dir("/tmp/tor-data")
            .enable_network(true)
            .extra_args(["--Log", "notice stdout"]);
        assert_eq!(conf.exe_path, "/usr/bin/tor");
        assert_eq!(conf.control_port, 9051);
        assert_eq!(conf.data_dir.as_deref(), Some(std::path::Path::new("/tmp/tor-data")));
        assert!(conf.enable_network);
        assert_eq!(conf.extra_args, vec!["--Log", "notice stdout"]);
    }
}
