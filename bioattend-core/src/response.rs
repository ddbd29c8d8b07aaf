//! Device-to-host response lines
//!
//! The firmware prints one tagged line per event. The prefix set and its
//! evaluation order are the wire contract with the sketch:
//!
//! ```text
//! F:MATCH:<id>   -> Match(id)
//! F:ENROLLED:    -> Enrolled
//! F:<text>       -> StatusText(text)
//! ID:<id>|ID:-1  -> IdResult(Some(id)) | IdResult(None)
//! anything else  -> Unrecognized(line)
//! ```

use std::fmt;

use crate::constants::{prefixes, NO_MATCH_ID};

/// Typed event parsed from one response line
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResponseEvent {
    /// A finger matched the template stored under this ID
    Match(u32),

    /// Enrollment of the requested ID finished
    Enrolled,

    /// Free-form progress or status text
    StatusText(String),

    /// Answer to a scan query; `None` when no template matched
    IdResult(Option<u32>),

    /// Line without a known prefix
    Unrecognized(String),
}

impl ResponseEvent {
    /// Fingerprint ID carried by the event, if any
    pub fn fingerprint_id(&self) -> Option<u32> {
        match self {
            Self::Match(id) => Some(*id),
            Self::IdResult(id) => *id,
            _ => None,
        }
    }

    /// Check if the event answers a verify or scan request
    pub fn is_verification_result(&self) -> bool {
        matches!(self, Self::Match(_) | Self::IdResult(_))
    }

    /// Check if the event answers a scan request
    pub fn is_id_result(&self) -> bool {
        matches!(self, Self::IdResult(_))
    }

    /// Short tag used in logs
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Match(_) => "MATCH",
            Self::Enrolled => "ENROLLED",
            Self::StatusText(_) => "STATUS",
            Self::IdResult(_) => "ID",
            Self::Unrecognized(_) => "UNRECOGNIZED",
        }
    }
}

impl fmt::Display for ResponseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match(id) => write!(f, "{}:{}", self.tag(), id),
            Self::IdResult(Some(id)) => write!(f, "{}:{}", self.tag(), id),
            Self::IdResult(None) => write!(f, "{}:none", self.tag()),
            Self::StatusText(text) | Self::Unrecognized(text) => {
                write!(f, "{}:{:?}", self.tag(), text)
            }
            Self::Enrolled => f.write_str(self.tag()),
        }
    }
}

/// Parse one response line
///
/// Never fails: anything that does not fit a known prefix becomes
/// [`ResponseEvent::Unrecognized`].
///
/// # Examples
///
/// ```
/// use bioattend_core::{parse_line, ResponseEvent};
///
/// assert_eq!(parse_line("F:MATCH:7"), ResponseEvent::Match(7));
/// assert_eq!(parse_line("ID:-1"), ResponseEvent::IdResult(None));
/// assert_eq!(parse_line("ID:42"), ResponseEvent::IdResult(Some(42)));
/// ```
pub fn parse_line(raw: &str) -> ResponseEvent {
    let line = raw.trim_end_matches(['\r', '\n']);

    if let Some(id) = line
        .strip_prefix(prefixes::MATCH)
        .and_then(|rest| rest.trim().parse::<u32>().ok())
    {
        return ResponseEvent::Match(id);
    }

    if line.starts_with(prefixes::ENROLLED) {
        return ResponseEvent::Enrolled;
    }

    if let Some(rest) = line.strip_prefix(prefixes::STATUS) {
        return ResponseEvent::StatusText(rest.to_string());
    }

    if let Some(rest) = line.strip_prefix(prefixes::ID) {
        match rest.trim().parse::<i64>() {
            Ok(NO_MATCH_ID) => return ResponseEvent::IdResult(None),
            Ok(value) => {
                if let Ok(id) = u32::try_from(value) {
                    return ResponseEvent::IdResult(Some(id));
                }
            }
            Err(_) => {}
        }
    }

    ResponseEvent::Unrecognized(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_parse_match() {
        assert_eq!(parse_line("F:MATCH:7"), ResponseEvent::Match(7));
        assert_eq!(parse_line("F:MATCH:7\r\n"), ResponseEvent::Match(7));
    }

    #[test]
    fn test_parse_match_without_id_is_status() {
        assert_eq!(
            parse_line("F:MATCH:none"),
            ResponseEvent::StatusText("MATCH:none".into())
        );
    }

    #[test]
    fn test_parse_enrolled() {
        assert_eq!(parse_line("F:ENROLLED:"), ResponseEvent::Enrolled);
        assert_eq!(parse_line("F:ENROLLED:12"), ResponseEvent::Enrolled);
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(
            parse_line("F:Place finger"),
            ResponseEvent::StatusText("Place finger".into())
        );
        assert_eq!(parse_line("F:"), ResponseEvent::StatusText(String::new()));
    }

    #[test]
    fn test_parse_id_result() {
        assert_eq!(parse_line("ID:42"), ResponseEvent::IdResult(Some(42)));
        assert_eq!(parse_line("ID:-1"), ResponseEvent::IdResult(None));
        assert_eq!(parse_line("ID:0"), ResponseEvent::IdResult(Some(0)));
    }

    #[test]
    fn test_parse_bad_id_is_unrecognized() {
        assert_eq!(
            parse_line("ID:abc"),
            ResponseEvent::Unrecognized("ID:abc".into())
        );
        assert_eq!(
            parse_line("ID:-7"),
            ResponseEvent::Unrecognized("ID:-7".into())
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(
            parse_line("garbage"),
            ResponseEvent::Unrecognized("garbage".into())
        );
        assert_eq!(parse_line(""), ResponseEvent::Unrecognized(String::new()));
    }

    #[test]
    fn test_acknowledgements_follow_commands() {
        // Canonical answer printed by the sketch for each request
        let cases = [
            (Command::enroll(4), "F:ENROLLED:", ResponseEvent::Enrolled),
            (Command::verify(), "F:MATCH:4", ResponseEvent::Match(4)),
            (Command::scan(), "ID:4", ResponseEvent::IdResult(Some(4))),
            (
                Command::count(),
                "F:Templates: 4",
                ResponseEvent::StatusText("Templates: 4".into()),
            ),
            (
                Command::check_sensor(),
                "F:Sensor OK",
                ResponseEvent::StatusText("Sensor OK".into()),
            ),
        ];

        for (command, reply, expected) in cases {
            let frame = command.encode();
            assert_eq!(Command::decode(std::str::from_utf8(&frame).unwrap()).unwrap(), command);
            assert_eq!(parse_line(reply), expected);
        }
    }

    #[test]
    fn test_fingerprint_id() {
        assert_eq!(ResponseEvent::Match(3).fingerprint_id(), Some(3));
        assert_eq!(ResponseEvent::IdResult(Some(9)).fingerprint_id(), Some(9));
        assert_eq!(ResponseEvent::IdResult(None).fingerprint_id(), None);
        assert_eq!(ResponseEvent::Enrolled.fingerprint_id(), None);
        assert!(ResponseEvent::IdResult(None).is_verification_result());
        assert!(!ResponseEvent::StatusText("x".into()).is_verification_result());
    }

    proptest! {
        #[test]
        fn prop_parse_never_panics(line in ".*") {
            let _ = parse_line(&line);
        }

        #[test]
        fn prop_id_lines_parse(id in any::<u32>()) {
            prop_assert_eq!(parse_line(&format!("ID:{}", id)), ResponseEvent::IdResult(Some(id)));
            prop_assert_eq!(parse_line(&format!("F:MATCH:{}", id)), ResponseEvent::Match(id));
        }
    }
}
