//! Collation of listener receptions into per-peripheral slots and the overall
//! verdict.

use serde::Serialize;
use tracing::warn;

use crate::protocol::{Outcome, Peripheral, PeripheralMask, ResultMessage};

use super::ListenerError;

/// What one listener thread came back with.
#[derive(Debug)]
pub enum Reception {
    /// A well-formed result carrying the session's test id.
    Accepted(ResultMessage),
    Failed(ListenerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SlotStatus {
    Passed,
    /// The UUT answered with a non-success outcome code.
    Failed { outcome_code: u8 },
    /// No usable answer for this peripheral.
    Missing { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotReport {
    pub peripheral: Peripheral,
    #[serde(flatten)]
    pub status: SlotStatus,
}

impl SlotReport {
    pub fn passed(&self) -> bool {
        self.status == SlotStatus::Passed
    }
}

impl std::fmt::Display for SlotReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.status {
            SlotStatus::Passed => write!(f, "{:<5} PASS", self.peripheral.to_string()),
            SlotStatus::Failed { outcome_code } => write!(
                f,
                "{:<5} FAIL (outcome code 0x{:02X})",
                self.peripheral.to_string(),
                outcome_code
            ),
            SlotStatus::Missing { reason } => {
                write!(f, "{:<5} FAIL ({})", self.peripheral.to_string(), reason)
            }
        }
    }
}

/// Place every reception into the slot of the peripheral it answers for.
///
/// Slots follow the mask order (UART, SPI, I2C) whatever the arrival order.
/// Two answers for the same peripheral are ANDed. Peripherals left without an
/// answer take the reason of a failed listener, in listener order.
pub fn collate(peripherals: PeripheralMask, receptions: &[Reception]) -> Vec<SlotReport> {
    let mut slots: Vec<Option<SlotStatus>> = vec![None; peripherals.len()];
    let mut failures = Vec::new();

    for reception in receptions {
        match reception {
            Reception::Accepted(msg) => {
                let slot = Peripheral::from_code(msg.peripheral_code)
                    .and_then(|p| peripherals.position(p));
                let Some(index) = slot else {
                    warn!(
                        test_id = msg.test_id,
                        peripheral_code = msg.peripheral_code,
                        "result for a peripheral that was not requested, ignoring"
                    );
                    continue;
                };
                let status = match msg.outcome() {
                    Outcome::Success => SlotStatus::Passed,
                    Outcome::Failure => SlotStatus::Failed {
                        outcome_code: msg.outcome_code,
                    },
                };
                slots[index] = Some(match slots[index].take() {
                    None => status,
                    Some(previous) => {
                        warn!(
                            test_id = msg.test_id,
                            peripheral_code = msg.peripheral_code,
                            "duplicate result for peripheral"
                        );
                        if previous == SlotStatus::Passed {
                            status
                        } else {
                            previous
                        }
                    }
                });
            }
            Reception::Failed(err) => failures.push(err.to_string()),
        }
    }

    let mut reasons = failures.into_iter();
    peripherals
        .iter()
        .zip(slots)
        .map(|(peripheral, status)| SlotReport {
            peripheral,
            status: status.unwrap_or_else(|| SlotStatus::Missing {
                reason: reasons
                    .next()
                    .unwrap_or_else(|| "no result received".to_string()),
            }),
        })
        .collect()
}

/// True only if there is at least one slot and every slot passed.
pub fn overall_verdict(slots: &[SlotReport]) -> bool {
    !slots.is_empty() && slots.iter().all(SlotReport::passed)
}
