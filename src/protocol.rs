//! Protocol message parsing and formatting.
//!
//! This module handles the low-level wire details of the control protocol:
//! the simple-quoted-string convention, reply line framing, and command
//! formatting (including multi-line data blocks).

use crate::error::{Result, StatusCode, TorControlError};

/// Split `s` at the first occurrence of `ch`.
///
/// Returns `(left, right, found)`. When `ch` is absent, `left` is the whole
/// string and `right` is empty.
pub fn partition(s: &str, ch: char) -> (&str, &str, bool) {
    match s.find(ch) {
        Some(i) => (&s[..i], &s[i + ch.len_utf8()..], true),
        None => (s, "", false),
    }
}

/// Split `s` at the last occurrence of `ch`.
pub fn partition_from_end(s: &str, ch: char) -> (&str, &str, bool) {
    match s.rfind(ch) {
        Some(i) => (&s[..i], &s[i + ch.len_utf8()..], true),
        None => (s, "", false),
    }
}

/// Quote `s` only when it contains a character that requires quoting.
pub fn escape_quoted_if_needed(s: &str) -> String {
    if s.contains([' ', '\\', '"', '\r', '\n']) {
        escape_quoted(s)
    } else {
        s.to_string()
    }
}

/// Wrap `s` in double quotes, escaping backslash, quote, CR, and LF.
pub fn escape_quoted(s: &str) -> String {
    let mut ret = String::with_capacity(s.len() + 2);
    ret.push('"');
    for c in s.chars() {
        match c {
            '\\' => ret.push_str("\\\\"),
            '"' => ret.push_str("\\\""),
            '\r' => ret.push_str("\\r"),
            '\n' => ret.push_str("\\n"),
            _ => ret.push(c),
        }
    }
    ret.push('"');
    ret
}

/// Unquote `s` when it is surrounded by double quotes, otherwise return it
/// unchanged.
pub fn unescape_quoted_if_needed(s: &str) -> Result<String> {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        unescape_quoted(s)
    } else {
        Ok(s.to_string())
    }
}

/// Unquote a double-quoted string.
pub fn unescape_quoted(s: &str) -> Result<String> {
    if s.len() < 2 || !s.starts_with('"') || !s.ends_with('"') {
        return Err(TorControlError::ParseError("Missing quotes".to_string()));
    }
    unescape_quoted_contents(&s[1..s.len() - 1])
}

/// Unescape the contents of a quoted string (without the surrounding quotes).
///
/// A trailing lone backslash is tolerated and produces no output character.
pub fn unescape_quoted_contents(s: &str) -> Result<String> {
    let mut ret = String::with_capacity(s.len());
    let mut escaping = false;
    for c in s.chars() {
        match c {
            '\\' => {
                if escaping {
                    ret.push('\\');
                }
                escaping = !escaping;
            }
            '"' => {
                if !escaping {
                    return Err(TorControlError::ParseError("Unescaped quote".to_string()));
                }
                ret.push('"');
                escaping = false;
            }
            'n' if escaping => {
                ret.push('\n');
                escaping = false;
            }
            'r' if escaping => {
                ret.push('\r');
                escaping = false;
            }
            _ => {
                if escaping {
                    return Err(TorControlError::ParseError(
                        "Unexpected escape".to_string(),
                    ));
                }
                ret.push(c);
            }
        }
    }
    Ok(ret)
}

/// A raw reply line from Tor: three status digits, a continuation character,
/// and the remaining text.
#[derive(Debug, Clone)]
pub struct ReplyLine {
    /// The 3-digit status code.
    pub status: u16,
    /// The separator character: '-' for mid-reply, '+' for data, ' ' for end.
    pub separator: char,
    /// The text content after the separator.
    pub text: String,
}

impl ReplyLine {
    /// Parse a reply line (without its trailing CRLF).
    pub fn parse(line: &str) -> Result<Self> {
        let bytes = line.as_bytes();
        if bytes.len() < 4 {
            return Err(TorControlError::ProtocolError(format!(
                "Truncated reply line: '{}'",
                line
            )));
        }
        if !bytes[..3].iter().all(u8::is_ascii_digit) {
            return Err(TorControlError::ProtocolError(format!(
                "Invalid status code in: '{}'",
                line
            )));
        }
        let status: u16 = line[..3].parse().expect("three ascii digits");
        let separator = bytes[3] as char;
        if !matches!(separator, ' ' | '-' | '+') {
            return Err(TorControlError::ProtocolError(format!(
                "Invalid line continuation '{}' in: '{}'",
                separator, line
            )));
        }
        Ok(ReplyLine {
            status,
            separator,
            text: line[4..].to_string(),
        })
    }

    /// Check if this is the final line of a reply.
    pub fn is_end(&self) -> bool {
        self.separator == ' '
    }

    /// Check if this line opens a multi-line data block.
    pub fn is_data(&self) -> bool {
        self.separator == '+'
    }
}

/// A complete reply from Tor.
///
/// `data` holds one entry per `NNN-` line and per `NNN+` data block (the
/// block body keeps its CRLF line breaks); `reply` is the text of the final
/// `NNN<sp>` line. A reply is immutable once constructed.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Status code of the final line.
    pub status: u16,
    /// Text of the final line.
    pub reply: String,
    /// Intermediate entries, in wire order.
    pub data: Vec<String>,
}

impl Reply {
    /// Get the status code as an enum.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status)
    }

    /// Check if this reply indicates success (2xx).
    pub fn is_ok(&self) -> bool {
        self.status / 100 == 2
    }

    /// Check if this is an asynchronous event notification (650).
    pub fn is_async(&self) -> bool {
        self.status / 100 == 6
    }

    /// The data entries followed by the final reply text. Several commands
    /// put their last entry on the reply line.
    pub fn data_with_reply(&self) -> Vec<String> {
        let mut ret = self.data.clone();
        ret.push(self.reply.clone());
        ret
    }

    /// Convert this reply into a Result, failing on non-ok, non-async status.
    pub fn into_result(self) -> Result<Self> {
        if self.is_ok() || self.is_async() {
            Ok(self)
        } else {
            Err(TorControlError::CommandRejected {
                code: self.status,
                message: self.reply,
            })
        }
    }
}

/// Format a command line with arguments, CRLF-terminated.
pub fn format_command(keyword: &str, args: &[&str]) -> String {
    let mut cmd = keyword.to_string();
    for arg in args {
        cmd.push(' ');
        cmd.push_str(arg);
    }
    cmd.push_str("\r\n");
    cmd
}

/// Format a multi-line command carrying a data block terminated by a lone
/// `.`, escaping leading dots in the body.
pub fn format_command_with_data(keyword: &str, args: &[&str], data: &str) -> String {
    let mut cmd = String::from("+");
    cmd.push_str(keyword);
    for arg in args {
        cmd.push(' ');
        cmd.push_str(arg);
    }
    cmd.push_str("\r\n");
    for line in data.lines() {
        if line.starts_with('.') {
            cmd.push('.');
        }
        cmd.push_str(line);
        cmd.push_str("\r\n");
    }
    cmd.push_str(".\r\n");
    cmd
}
