//! UUT test protocol -- peripheral codes, outcome codes and the wire codec.

pub mod wire;

use serde::Serialize;

pub use wire::{CodecError, CommandMessage, ResultMessage};

/// Result code the UUT sends when a peripheral test passed.
pub const OUTCOME_SUCCESS: u8 = 0x01;
/// Canonical result code the UUT sends when a peripheral test failed.
pub const OUTCOME_FAILURE: u8 = 0xFF;

/// A peripheral the UUT knows how to exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Peripheral {
    Uart,
    Spi,
    I2c,
}

impl Peripheral {
    /// Every peripheral in slot order.
    pub const ALL: [Peripheral; 3] = [Peripheral::Uart, Peripheral::Spi, Peripheral::I2c];

    /// Bit used for this peripheral in the command mask and in result datagrams.
    pub fn code(self) -> u8 {
        match self {
            Peripheral::Uart => 0x02,
            Peripheral::Spi => 0x04,
            Peripheral::I2c => 0x08,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }

    /// Payload used when the operator does not supply one.
    pub fn default_message(self) -> &'static str {
        match self {
            Peripheral::Uart => "Hello UART",
            Peripheral::Spi => "Hello SPI",
            Peripheral::I2c => "Hello I2C",
        }
    }
}

impl std::fmt::Display for Peripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Peripheral::Uart => write!(f, "UART"),
            Peripheral::Spi => write!(f, "SPI"),
            Peripheral::I2c => write!(f, "I2C"),
        }
    }
}

/// Set of peripherals requested in one session.
///
/// Only the UART, SPI and I2C bits are kept; the reserved bit 0x01 and any
/// other unknown bits are dropped on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeripheralMask(u8);

impl PeripheralMask {
    const KNOWN_BITS: u8 = 0x02 | 0x04 | 0x08;

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Self(Self::KNOWN_BITS)
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::KNOWN_BITS)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, peripheral: Peripheral) -> bool {
        self.0 & peripheral.code() != 0
    }

    pub fn insert(&mut self, peripheral: Peripheral) {
        self.0 |= peripheral.code();
    }

    /// Number of requested peripherals (popcount of the mask).
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Requested peripherals in slot order (UART, SPI, I2C).
    pub fn iter(self) -> impl Iterator<Item = Peripheral> {
        Peripheral::ALL.into_iter().filter(move |p| self.contains(*p))
    }

    /// Slot index of `peripheral` within this mask, if it was requested.
    pub fn position(self, peripheral: Peripheral) -> Option<usize> {
        self.iter().position(|p| p == peripheral)
    }
}

impl FromIterator<Peripheral> for PeripheralMask {
    fn from_iter<I: IntoIterator<Item = Peripheral>>(iter: I) -> Self {
        let mut mask = Self::empty();
        for peripheral in iter {
            mask.insert(peripheral);
        }
        mask
    }
}

impl std::fmt::Display for PeripheralMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<String> = self.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", names.join("|"))
    }
}

/// Per-peripheral outcome reported by the UUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// Anything other than `0x01` is a failure, including non-canonical codes.
    pub fn from_code(code: u8) -> Self {
        if code == OUTCOME_SUCCESS {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Outcome::Success => OUTCOME_SUCCESS,
            Outcome::Failure => OUTCOME_FAILURE,
        }
    }
}
