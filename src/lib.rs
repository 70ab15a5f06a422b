//! hwtester -- drive peripheral tests on a remote embedded unit under test.
//!
//! The controller sends one UDP command naming the peripherals to exercise,
//! collects one result datagram per peripheral, and records every run in a
//! local SQLite database.

pub mod config;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod transport;

use anyhow::{Context, Result};

use crate::config::TesterConfig;
use crate::session::Orchestrator;
use crate::storage::SqliteStore;
use crate::transport::UdpTransport;

/// Open the result store configured in `config`.
pub fn open_store(config: &TesterConfig) -> Result<SqliteStore> {
    let db_path = config.storage.resolve_db_path()?;
    tracing::debug!(db_path = %db_path.display(), "Opening result store");
    let pool = storage::open_pool(&db_path)
        .with_context(|| format!("database init failed: {}", db_path.display()))?;
    Ok(SqliteStore::new(pool))
}

/// Open the UDP transport towards the configured UUT.
pub fn open_transport(config: &TesterConfig) -> Result<UdpTransport, transport::TransportError> {
    UdpTransport::open(
        &config.uut.address,
        config.uut.port,
        config.uut.receive_timeout(),
    )
}

/// Orchestrator wired to the production transport and store.
pub type Tester = Orchestrator<UdpTransport, SqliteStore>;
