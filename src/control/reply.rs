//! Control protocol replies.
//!
//! A reply is one or more lines of the form `NNN<sep><text>`, where the
//! separator is `-` for a mid-reply line, `+` for a line followed by a data
//! block terminated by a lone `.`, and a space for the final line.

use super::{ControlError, ControlResult};

/// Status code for a successful command.
pub const STATUS_OK: u16 = 250;

/// Kind of reply line, as given by the separator after the status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineKind {
    Mid,
    Data,
    End,
}

/// A complete reply to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Status code of the final line
    pub code: u16,
    /// Text of every line, without status codes
    pub lines: Vec<String>,
}

impl Reply {
    /// Whether the command succeeded
    pub fn is_ok(&self) -> bool {
        self.code == STATUS_OK
    }

    /// Text of the final line
    pub fn message(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or_default()
    }

    /// Look up a `Key=Value` entry among the reply lines
    pub fn value(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            line.split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }

    /// Turn a non-250 reply into an error
    pub fn into_result(self) -> ControlResult<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(ControlError::Rejected {
                code: self.code,
                message: self.message().to_string(),
            })
        }
    }
}

/// Split a reply line into status code, kind, and text.
pub(crate) fn parse_line(line: &str) -> ControlResult<(u16, LineKind, &str)> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.len() < 4 || !line.is_char_boundary(3) || !line.is_char_boundary(4) {
        return Err(ControlError::MalformedReply(line.to_string()));
    }

    let code = line[..3]
        .parse::<u16>()
        .map_err(|_| ControlError::MalformedReply(line.to_string()))?;
    let kind = match &line[3..4] {
        "-" => LineKind::Mid,
        "+" => LineKind::Data,
        " " => LineKind::End,
        _ => return Err(ControlError::MalformedReply(line.to_string())),
    };

    Ok((code, kind, &line[4..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_end_line() {
        let (code, kind, text) = parse_line("250 OK\r\n").unwrap();
        assert_eq!(code, 250);
        assert_eq!(kind, LineKind::End);
        assert_eq!(text, "OK");
    }

    #[test]
    fn test_parse_mid_line() {
        let (code, kind, text) = parse_line("250-ServiceID=abc").unwrap();
        assert_eq!(code, 250);
        assert_eq!(kind, LineKind::Mid);
        assert_eq!(text, "ServiceID=abc");
    }

    #[test]
    fn test_parse_data_line() {
        let (_, kind, _) = parse_line("250+info=").unwrap();
        assert_eq!(kind, LineKind::Data);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_line("").is_err());
        assert!(parse_line("OK").is_err());
        assert!(parse_line("25x OK").is_err());
        assert!(parse_line("250?OK").is_err());
        assert!(parse_line("2é0 OK").is_err());
    }

    #[test]
    fn test_reply_value_lookup() {
        let reply = Reply {
            code: 250,
            lines: vec!["ServiceID=abcdef".to_string(), "OK".to_string()],
        };
        assert!(reply.is_ok());
        assert_eq!(reply.value("ServiceID"), Some("abcdef"));
        assert_eq!(reply.value("PrivateKey"), None);
        assert_eq!(reply.message(), "OK");
    }

    #[test]
    fn test_reply_error_into_result() {
        let reply = Reply {
            code: 515,
            lines: vec!["Authentication failed".to_string()],
        };
        match reply.into_result() {
            Err(ControlError::Rejected { code, message }) => {
                assert_eq!(code, 515);
                assert_eq!(message, "Authentication failed");
            }
            other => panic!("Expected Rejected error, got {:?}", other),
        }
    }
}
