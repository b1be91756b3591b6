//! Test utilities: response builders and protocol fixtures.
//!
//! Enable with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! tor-conductor = { version = "0.1", features = ["test-utils"] }
//! ```
//!
//! [`MockTorResponse`] builds properly framed control-port responses for
//! feeding parsers or scripted mock servers; [`fixtures`] holds canned
//! responses and event frames for common commands.

/// Builder for control-protocol response strings.
#[derive(Debug, Clone, Default)]
pub struct MockTorResponse {
    lines: Vec<String>,
}

impl MockTorResponse {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// A bare `250 OK` response.
    pub fn ok() -> Self {
        Self {
            lines: vec!["250 OK".to_string()],
        }
    }

    /// A single-line error response.
    pub fn error(code: u16, message: &str) -> Self {
        Self {
            lines: vec![format!("{} {}", code, message)],
        }
    }

    /// Append a mid-reply line (`250-...`).
    pub fn mid_line(mut self, line: &str) -> Self {
        self.lines.push(format!("250-{}", line));
        self
    }

    /// Append a data block (`250+...` through a lone `.`), dot-escaping
    /// body lines.
    pub fn data_block(mut self, first_line: &str, body: &str) -> Self {
        self.lines.push(format!("250+{}", first_line));
        for line in body.lines() {
            if line.starts_with('.') {
                self.lines.push(format!(".{}", line));
            } else {
                self.lines.push(line.to_string());
            }
        }
        self.lines.push(".".to_string());
        self
    }

    /// Append the final `250 OK` line.
    pub fn finish(mut self) -> Self {
        self.lines.push("250 OK".to_string());
        self
    }

    /// Render the response with CRLF line endings.
    pub fn build(&self) -> String {
        self.lines
            .iter()
            .map(|l| format!("{}\r\n", l))
            .collect()
    }

    /// Render the response as bytes.
    pub fn as_bytes(&self) -> Vec<u8> {
        self.build().into_bytes()
    }
}

/// Canned responses and event frames.
pub mod fixtures {
    /// A PROTOCOLINFO response advertising every auth method.
    pub fn protocolinfo_response() -> &'static str {
        "250-PROTOCOLINFO 1\r\n\
         250-AUTH METHODS=NULL,HASHEDPASSWORD,COOKIE,SAFECOOKIE COOKIEFILE=\"/var/run/tor/control.authcookie\"\r\n\
         250-VERSION Tor=\"0.4.8.12\"\r\n\
         250 OK\r\n"
    }

    /// A PROTOCOLINFO response advertising only NULL auth.
    pub fn protocolinfo_null_response() -> &'static str {
        "250-PROTOCOLINFO 1\r\n\
         250-AUTH METHODS=NULL\r\n\
         250-VERSION Tor=\"0.4.7.10\"\r\n\
         250 OK\r\n"
    }

    /// A successful AUTHENTICATE response.
    pub fn auth_ok_response() -> &'static str {
        "250 OK\r\n"
    }

    /// A GETINFO version response.
    pub fn version_response() -> &'static str {
        "250-version=0.4.8.12\r\n250 OK\r\n"
    }

    /// An ADDONION response carrying a generated key (64 zero bytes).
    pub fn add_onion_response() -> String {
        format!(
            "250-ServiceID=exampleoniont2pqglbny66wpovyvao3ylc23eileodtevc4b75ikpad\r\n\
             250-PrivateKey=ED25519-V3:{}==\r\n\
             250 OK\r\n",
            "A".repeat(86)
        )
    }

    /// A circuit-built event frame.
    pub fn circuit_built_event() -> &'static str {
        "650 CIRC 12345 BUILT $9695DFC35FFEB861329B9F1AB04C46397020CE31~Relay1 PURPOSE=GENERAL\r\n"
    }

    /// A bandwidth event frame.
    pub fn bandwidth_event() -> &'static str {
        "650 BW 1024 2048\r\n"
    }

    /// A bootstrap-complete status event frame.
    pub fn bootstrap_done_event() -> &'static str {
        "650 STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=100 TAG=done SUMMARY=\"Done\"\r\n"
    }

    /// An error response.
    pub fn error_response() -> &'static str {
        "552 Unrecognized option\r\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_response_ok() {
        assert_eq!(MockTorResponse::ok().build(), "250 OK\r\n");
    }

    #[test]
    fn test_mock_response_with_mid_lines() {
        let response = MockTorResponse::new()
            .mid_line("version=0.4.8.12")
            .mid_line("config-file=/etc/tor/torrc")
            .finish();
        assert_eq!(
            response.build(),
            "250-version=0.4.8.12\r\n250-config-file=/etc/tor/torrc\r\n250 OK\r\n"
        );
    }

    #[test]
    fn test_mock_response_data_block_dot_escape() {
        let response = MockTorResponse::new()
            .data_block("config-text=", "SocksPort 9050\n.leading-dot")
            .finish();
        assert_eq!(
            response.build(),
            "250+config-text=\r\nSocksPort 9050\r\n..leading-dot\r\n.\r\n250 OK\r\n"
        );
    }

    #[test]
    fn test_mock_response_error() {
        assert_eq!(
            MockTorResponse::error(552, "Unrecognized option").build(),
            "552 Unrecognized option\r\n"
        );
    }
}
