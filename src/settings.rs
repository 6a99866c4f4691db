//! Line configuration for a serial port.
//!
//! [`SerialSettings`] is the raw request as it arrives from a config file or
//! command line. [`LineConfig`] is the validated, immutable form accepted by
//! [`SerialPort::open`](crate::SerialPort::open).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacterSize {
    Five,
    Six,
    Seven,
    Eight,
}

impl CharacterSize {
    /// Number of bits as an integer.
    pub fn bits(self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

impl TryFrom<u8> for CharacterSize {
    type Error = Error;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            other => Err(Error::invalid_settings(format!(
                "character size {other} is not supported (expected 5-8)"
            ))),
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl Parity {
    /// Integer code used by binding layers (`0 = none, 1 = odd, 2 = even`).
    pub fn code(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Odd => 1,
            Self::Even => 2,
        }
    }
}

impl TryFrom<i32> for Parity {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Odd),
            2 => Ok(Self::Even),
            other => Err(Error::invalid_settings(format!("unknown parity code {other}"))),
        }
    }
}

impl std::str::FromStr for Parity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(Error::invalid_settings(format!("unknown parity '{other}'"))),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Odd => "odd",
            Self::Even => "even",
        })
    }
}

/// Unvalidated line settings, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Baud rate (bits per second).
    pub baud: u32,
    /// Number of data bits (5, 6, 7, or 8).
    pub character_size: u8,
    /// Use two stop bits instead of one.
    pub two_stop_bits: bool,
    /// Parity checking mode.
    pub parity: Parity,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud: 9600,
            character_size: 8,
            two_stop_bits: false,
            parity: Parity::None,
        }
    }
}

impl SerialSettings {
    /// Settings with the given baud rate and 8N1 framing.
    pub fn with_baud(baud: u32) -> Self {
        Self {
            baud,
            ..Self::default()
        }
    }

    /// Validate into an immutable [`LineConfig`].
    pub fn validate(&self) -> Result<LineConfig> {
        LineConfig::new(
            self.baud,
            CharacterSize::try_from(self.character_size)?,
            self.two_stop_bits,
            self.parity,
        )
    }
}

/// A validated line configuration.
///
/// Every baud rate held by a `LineConfig` is one the current platform's
/// native layer can program, so opening never fails on settings alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineConfig {
    baud: u32,
    character_size: CharacterSize,
    two_stop_bits: bool,
    parity: Parity,
}

impl LineConfig {
    /// Validate a line configuration.
    ///
    /// Fails with [`Error::InvalidSettings`] when the baud rate is zero or not
    /// supported by the platform.
    pub fn new(
        baud: u32,
        character_size: CharacterSize,
        two_stop_bits: bool,
        parity: Parity,
    ) -> Result<Self> {
        if baud == 0 {
            return Err(Error::invalid_settings("baud rate must be positive"));
        }
        if !crate::native::is_supported_baud(baud) {
            return Err(Error::invalid_settings(format!(
                "baud rate {baud} is not supported on this platform"
            )));
        }
        Ok(Self {
            baud,
            character_size,
            two_stop_bits,
            parity,
        })
    }

    /// Validate the integer form used by binding layers.
    pub fn from_raw(baud: i32, character_size: i32, two_stop_bits: bool, parity: i32) -> Result<Self> {
        let baud = u32::try_from(baud)
            .map_err(|_| Error::invalid_settings(format!("baud rate {baud} must be positive")))?;
        let character_size = u8::try_from(character_size)
            .map_err(|_| Error::invalid_settings(format!("character size {character_size} is not supported")))
            .and_then(CharacterSize::try_from)?;
        Self::new(baud, character_size, two_stop_bits, Parity::try_from(parity)?)
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    pub fn character_size(&self) -> CharacterSize {
        self.character_size
    }

    pub fn two_stop_bits(&self) -> bool {
        self.two_stop_bits
    }

    pub fn parity(&self) -> Parity {
        self.parity
    }
}

impl From<LineConfig> for SerialSettings {
    fn from(config: LineConfig) -> Self {
        Self {
            baud: config.baud,
            character_size: config.character_size.bits(),
            two_stop_bits: config.two_stop_bits,
            parity: config.parity,
        }
    }
}

impl fmt::Display for LineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        let stop = if self.two_stop_bits { 2 } else { 1 };
        write!(f, "{} {}{}{}", self.baud, self.character_size.bits(), parity, stop)
    }
}
