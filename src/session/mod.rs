//! Test session orchestration.
//!
//! A session allocates a test id, sends one command datagram to the UUT, then
//! blocks one listener thread per requested peripheral until each has received
//! a result datagram. The scope that owns the listeners is a join-all barrier:
//! the verdict is only computed once every listener has returned.

pub mod verdict;

use std::thread;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::protocol::wire::RESULT_LEN;
use crate::protocol::{CodecError, CommandMessage, PeripheralMask, ResultMessage};
use crate::storage::{ResultStore, StoreError, TestRun};
use crate::transport::{Transport, TransportError};

pub use verdict::{collate, overall_verdict, Reception, SlotReport, SlotStatus};

/// Start-time format used for persisted runs.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors that abort a session before any result is observed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no peripheral requested")]
    EmptyMask,

    #[error("invalid payload: {0}")]
    PayloadTooLong(#[source] CodecError),

    #[error("could not allocate a test id: {0}")]
    IdAllocation(#[source] StoreError),

    #[error("could not send the test command: {0}")]
    Send(#[source] TransportError),
}

/// Why a single listener produced no usable result. Never aborts a session.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("undecodable result datagram: {0}")]
    Malformed(#[from] CodecError),
}

/// Everything a caller needs to report on a finished session.
#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub test_id: u32,
    pub started_at: String,
    pub duration_secs: f64,
    pub slots: Vec<SlotReport>,
    pub overall: bool,
    /// Set when the run was observed but could not be written to the store.
    pub persist_error: Option<String>,
    /// The stored record as rendered by the result store.
    pub summary: String,
}

impl SessionReport {
    pub fn persisted(&self) -> bool {
        self.persist_error.is_none()
    }
}

/// Drives test sessions over one transport and one result store.
///
/// `run` takes `&mut self`, so one orchestrator never runs two sessions at
/// once. Separate orchestrators sharing a store may still race for an id.
pub struct Orchestrator<T, S> {
    transport: T,
    store: S,
}

impl<T: Transport, S: ResultStore> Orchestrator<T, S> {
    pub fn new(transport: T, store: S) -> Self {
        Self { transport, store }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one session to completion.
    ///
    /// Listeners have no deadline of their own: unless the transport applies a
    /// receive timeout, a peripheral the UUT never answers blocks this call
    /// forever.
    pub fn run(
        &mut self,
        peripherals: PeripheralMask,
        iterations: u8,
        payload: &[u8],
    ) -> Result<SessionReport, SessionError> {
        if peripherals.is_empty() {
            return Err(SessionError::EmptyMask);
        }
        // Validated before touching the store so a bad payload burns no id.
        CommandMessage::new(0, peripherals, iterations, payload)
            .map_err(SessionError::PayloadTooLong)?;

        let test_id = self.store.allocate_id().map_err(SessionError::IdAllocation)?;
        let command = CommandMessage::new(test_id, peripherals, iterations, payload)
            .map_err(SessionError::PayloadTooLong)?;

        info!(
            test_id,
            peripherals = %peripherals,
            iterations,
            payload_len = payload.len(),
            "sending test command"
        );
        self.transport
            .send_datagram(&command.encode())
            .map_err(SessionError::Send)?;

        let started_at = chrono::Local::now();
        let clock = Instant::now();

        let receptions = self.listen(test_id, peripherals.len());

        let duration_secs = clock.elapsed().as_secs_f64();
        let slots = collate(peripherals, &receptions);
        let overall = overall_verdict(&slots);
        for slot in &slots {
            debug!(test_id, slot = %slot, "slot outcome");
        }

        let run = TestRun {
            test_id,
            started_at: started_at.format(TIMESTAMP_FORMAT).to_string(),
            duration_secs,
            success: overall,
        };
        let persist_error = match self.store.record_run(&run) {
            Ok(()) => None,
            Err(e) => {
                error!(test_id, error = %e, "failed to persist test run");
                Some(e.to_string())
            }
        };

        let summary = self.store.lookup_run(test_id).unwrap_or_else(|e| {
            warn!(test_id, error = %e, "failed to read back test run");
            format!("Test record unavailable for test ID {}.", test_id)
        });

        info!(test_id, overall, duration_secs, "test session complete");

        Ok(SessionReport {
            test_id,
            started_at: run.started_at,
            duration_secs,
            slots,
            overall,
            persist_error,
            summary,
        })
    }

    /// Spawn `count` listeners and wait for all of them.
    ///
    /// Each listener owns exactly one cell of the reception vector; the scope
    /// joins every thread before the cells are read.
    fn listen(&self, test_id: u32, count: usize) -> Vec<Reception> {
        let mut cells: Vec<Option<Reception>> = (0..count).map(|_| None).collect();
        let transport = &self.transport;

        thread::scope(|scope| {
            for (index, cell) in cells.iter_mut().enumerate() {
                let spawned = thread::Builder::new()
                    .name(format!("listener-{}", index))
                    .spawn_scoped(scope, move || {
                        *cell = Some(receive_result(transport, test_id, index));
                    });
                if let Err(e) = spawned {
                    error!(test_id, listener = index, error = %e, "failed to spawn listener");
                }
            }
        });

        cells
            .into_iter()
            .map(|cell| {
                cell.unwrap_or_else(|| {
                    Reception::Failed(ListenerError::Transport(TransportError::Receive(
                        std::io::Error::new(std::io::ErrorKind::Other, "listener did not start"),
                    )))
                })
            })
            .collect()
    }
}

/// Block until a result datagram for `test_id` arrives.
///
/// Well-formed datagrams carrying another test id are stale or cross-talk and
/// are dropped; the listener keeps waiting.
fn receive_result<T: Transport>(transport: &T, test_id: u32, listener: usize) -> Reception {
    loop {
        let (bytes, peer) = match transport.receive_datagram(RESULT_LEN) {
            Ok(received) => received,
            Err(e) => {
                warn!(test_id, listener, error = %e, "listener failed");
                return Reception::Failed(e.into());
            }
        };
        let msg = match ResultMessage::decode(&bytes) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(test_id, listener, %peer, error = %e, "malformed result datagram");
                return Reception::Failed(e.into());
            }
        };
        if msg.test_id != test_id {
            warn!(
                test_id,
                listener,
                %peer,
                received_test_id = msg.test_id,
                "discarding result for another test id"
            );
            continue;
        }
        info!(
            test_id,
            listener,
            %peer,
            peripheral_code = msg.peripheral_code,
            outcome_code = msg.outcome_code,
            "result received"
        );
        return Reception::Accepted(msg);
    }
}
