//! Sensor command definitions and frame encoding

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::FRAME_TERMINATOR;

/// Single-character command codes understood by the sensor sketch
///
/// Codes `P/E/V/D/C/X` belong to the character firmware, `S` to the
/// scan-query firmware that answers with `ID:` lines.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CommandCode {
    Enroll,
    Verify,
    Delete,
    Count,
    EmptyDatabase,
    CheckSensor,
    Scan,
}

impl CommandCode {
    /// All known codes in wire order
    pub const ALL: [CommandCode; 7] = [
        Self::Enroll,
        Self::Verify,
        Self::Delete,
        Self::Count,
        Self::EmptyDatabase,
        Self::CheckSensor,
        Self::Scan,
    ];

    /// Wire character
    pub fn as_char(self) -> char {
        match self {
            Self::Enroll => 'E',
            Self::Verify => 'V',
            Self::Delete => 'D',
            Self::Count => 'C',
            Self::EmptyDatabase => 'X',
            Self::CheckSensor => 'P',
            Self::Scan => 'S',
        }
    }

    /// Check if the command carries a user ID parameter
    pub fn takes_user_id(self) -> bool {
        matches!(self, Self::Enroll | Self::Delete)
    }

    /// Get command name
    pub fn name(self) -> &'static str {
        match self {
            Self::Enroll => "ENROLL",
            Self::Verify => "VERIFY",
            Self::Delete => "DELETE",
            Self::Count => "COUNT",
            Self::EmptyDatabase => "EMPTY",
            Self::CheckSensor => "CHECK",
            Self::Scan => "SCAN",
        }
    }

    fn flag(self) -> CommandSet {
        match self {
            Self::Enroll => CommandSet::ENROLL,
            Self::Verify => CommandSet::VERIFY,
            Self::Delete => CommandSet::DELETE,
            Self::Count => CommandSet::COUNT,
            Self::EmptyDatabase => CommandSet::EMPTY_DATABASE,
            Self::CheckSensor => CommandSet::CHECK_SENSOR,
            Self::Scan => CommandSet::SCAN,
        }
    }
}

impl TryFrom<char> for CommandCode {
    type Error = Error;

    fn try_from(value: char) -> Result<Self> {
        match value {
            'E' => Ok(Self::Enroll),
            'V' => Ok(Self::Verify),
            'D' => Ok(Self::Delete),
            'C' => Ok(Self::Count),
            'X' => Ok(Self::EmptyDatabase),
            'P' => Ok(Self::CheckSensor),
            'S' => Ok(Self::Scan),
            _ => Err(Error::UnknownCommand(value)),
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.as_char())
    }
}

bitflags::bitflags! {
    /// Commands a given firmware build accepts
    ///
    /// The character firmware and the scan-query firmware are separate
    /// builds, so the host selects the set it talks to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommandSet: u8 {
        const ENROLL = 1;
        const VERIFY = 1 << 1;
        const DELETE = 1 << 2;
        const COUNT = 1 << 3;
        const EMPTY_DATABASE = 1 << 4;
        const CHECK_SENSOR = 1 << 5;
        const SCAN = 1 << 6;

        /// `P/E/V/D/C/X` firmware
        const CHARACTER = Self::ENROLL.bits()
            | Self::VERIFY.bits()
            | Self::DELETE.bits()
            | Self::COUNT.bits()
            | Self::EMPTY_DATABASE.bits()
            | Self::CHECK_SENSOR.bits();

        /// `S` / `ID:` firmware
        const SCAN_QUERY = Self::SCAN.bits();
    }
}

impl CommandSet {
    /// Check if a command code is accepted by this set
    pub fn supports(self, code: CommandCode) -> bool {
        self.contains(code.flag())
    }

    /// Command used for a single attendance verification
    ///
    /// Prefers `V`; falls back to `S` on scan-query firmware.
    pub fn verification_code(self) -> Option<CommandCode> {
        if self.supports(CommandCode::Verify) {
            Some(CommandCode::Verify)
        } else if self.supports(CommandCode::Scan) {
            Some(CommandCode::Scan)
        } else {
            None
        }
    }

    /// Ensure a command is accepted by this set
    pub fn check(self, code: CommandCode) -> Result<()> {
        if self.supports(code) {
            Ok(())
        } else {
            Err(Error::Unsupported(code))
        }
    }
}

impl Default for CommandSet {
    fn default() -> Self {
        Self::CHARACTER
    }
}

/// Host-to-device command frame
///
/// # Frame Structure
///
/// ```text
/// ┌──────────┬─────────────────────┬──────┐
/// │   Code   │      Parameter      │  LF  │
/// │  1 char  │  decimal, 0 if none │  \n  │
/// └──────────┴─────────────────────┴──────┘
/// ```
///
/// # Examples
///
/// ```
/// use bioattend_core::Command;
///
/// let frame = Command::enroll(7).encode();
/// assert_eq!(&frame[..], b"E7\n");
///
/// let frame = Command::verify().encode();
/// assert_eq!(&frame[..], b"V0\n");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    /// Command code
    pub code: CommandCode,

    /// Optional integer parameter (user ID for enroll/delete)
    pub parameter: Option<u32>,
}

impl Command {
    /// Create a command without parameter
    pub fn new(code: CommandCode) -> Self {
        Self {
            code,
            parameter: None,
        }
    }

    /// Create a command with parameter
    pub fn with_parameter(code: CommandCode, parameter: u32) -> Self {
        Self {
            code,
            parameter: Some(parameter),
        }
    }

    pub fn enroll(user_id: u32) -> Self {
        Self::with_parameter(CommandCode::Enroll, user_id)
    }

    pub fn verify() -> Self {
        Self::new(CommandCode::Verify)
    }

    pub fn delete(user_id: u32) -> Self {
        Self::with_parameter(CommandCode::Delete, user_id)
    }

    pub fn count() -> Self {
        Self::new(CommandCode::Count)
    }

    pub fn empty_database() -> Self {
        Self::new(CommandCode::EmptyDatabase)
    }

    pub fn check_sensor() -> Self {
        Self::new(CommandCode::CheckSensor)
    }

    pub fn scan() -> Self {
        Self::new(CommandCode::Scan)
    }

    /// Encode command to a wire frame
    pub fn encode(&self) -> Bytes {
        let param = self.parameter.unwrap_or(0).to_string();
        let mut buf = BytesMut::with_capacity(2 + param.len());

        buf.put_u8(self.code.as_char() as u8);
        buf.put_slice(param.as_bytes());
        buf.put_u8(FRAME_TERMINATOR);

        buf.freeze()
    }

    /// Decode a frame as the firmware reads it
    ///
    /// Used by simulated peripherals. A parameter of `0` decodes as `None`
    /// for commands that take no user ID.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The frame is empty
    /// - The code character is unknown
    /// - The parameter is not a non-negative integer
    pub fn decode(frame: &str) -> Result<Self> {
        let frame = frame.trim_end_matches(['\r', '\n']);

        let mut chars = frame.chars();
        let first = chars
            .next()
            .ok_or_else(|| Error::InvalidFrame("empty frame".into()))?;
        let code = CommandCode::try_from(first)?;

        let raw = chars.as_str();
        let parameter = if raw.is_empty() {
            0
        } else {
            raw.parse::<u32>().map_err(|_| Error::InvalidParameter {
                code,
                raw: raw.to_string(),
            })?
        };

        if code.takes_user_id() {
            Ok(Self::with_parameter(code, parameter))
        } else if parameter == 0 {
            Ok(Self::new(code))
        } else {
            Ok(Self::with_parameter(code, parameter))
        }
    }
}

impl From<CommandCode> for Command {
    fn from(code: CommandCode) -> Self {
        Self::new(code)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parameter {
            Some(param) => write!(f, "{}[{}]", self.code, param),
            None => write!(f, "{}", self.code),
        }
    }
}
