//! End-to-end sessions against a fake UUT on the loopback interface, using the
//! real UDP transport and SQLite result store.

use std::net::UdpSocket;
use std::thread;
use std::time::Duration;

use hwtester::protocol::{CommandMessage, Peripheral, PeripheralMask, ResultMessage};
use hwtester::session::{Orchestrator, SlotStatus};
use hwtester::storage::{open_pool, ResultStore, SqliteStore};
use hwtester::transport::UdpTransport;

/// Behaviour of the fake UUT for one session.
#[derive(Clone, Copy)]
enum Reply {
    /// Answer every requested peripheral with this outcome code, last one first.
    All(u8),
    /// Answer every requested peripheral except this one.
    AllBut(Peripheral),
}

/// Bind a fake UUT, serve exactly one command, and return its port plus a
/// handle yielding the command it received.
fn spawn_uut(reply: Reply) -> (u16, thread::JoinHandle<CommandMessage>) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = socket.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let mut buf = [0u8; 512];
        let (len, controller) = socket.recv_from(&mut buf).unwrap();
        let command = CommandMessage::decode(&buf[..len]).unwrap();

        let requested: Vec<Peripheral> = command.peripherals.iter().collect();
        for peripheral in requested.into_iter().rev() {
            let outcome_code = match reply {
                Reply::All(code) => code,
                Reply::AllBut(skip) if skip == peripheral => continue,
                Reply::AllBut(_) => 0x01,
            };
            let msg = ResultMessage {
                test_id: command.test_id,
                peripheral_code: peripheral.code(),
                outcome_code,
            };
            socket.send_to(&msg.encode(), controller).unwrap();
        }
        command
    });
    (port, handle)
}

fn sqlite_store(dir: &tempfile::TempDir) -> SqliteStore {
    SqliteStore::new(open_pool(&dir.path().join("records.db")).unwrap())
}

#[test]
fn test_all_peripherals_pass_and_are_recorded() {
    let dir = tempfile::TempDir::new().unwrap();
    let (port, uut) = spawn_uut(Reply::All(0x01));
    let transport = UdpTransport::open("127.0.0.1", port, Some(Duration::from_secs(5))).unwrap();
    let mut tester = Orchestrator::new(transport, sqlite_store(&dir));

    let report = tester.run(PeripheralMask::all(), 10, b"Hello UART").unwrap();

    let command = uut.join().unwrap();
    assert_eq!(command.test_id, report.test_id);
    assert_eq!(command.iterations, 10);
    assert_eq!(command.payload(), b"Hello UART");

    assert_eq!(report.test_id, 1);
    assert!(report.overall);
    let order: Vec<Peripheral> = report.slots.iter().map(|s| s.peripheral).collect();
    assert_eq!(order, Peripheral::ALL.to_vec());
    assert!(report.summary.contains("Test ID: 1"));
    assert!(report.summary.ends_with("Result: Success"));

    let csv = tester.store().export_all().unwrap();
    assert_eq!(csv.lines().count(), 2);
    assert!(csv.lines().nth(1).unwrap().starts_with("1,"));
    assert!(csv.lines().nth(1).unwrap().ends_with(",1"));
}

#[test]
fn test_consecutive_sessions_get_increasing_ids() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = sqlite_store(&dir);

    let mut ids = Vec::new();
    for _ in 0..2 {
        let (port, uut) = spawn_uut(Reply::All(0x01));
        let transport =
            UdpTransport::open("127.0.0.1", port, Some(Duration::from_secs(5))).unwrap();
        let mut tester = Orchestrator::new(transport, store.clone());
        let mask: PeripheralMask = [Peripheral::Uart].into_iter().collect();
        ids.push(tester.run(mask, 1, b"").unwrap().test_id);
        uut.join().unwrap();
    }

    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn test_failure_outcome_is_recorded_as_failure() {
    let dir = tempfile::TempDir::new().unwrap();
    let (port, uut) = spawn_uut(Reply::All(0xFF));
    let transport = UdpTransport::open("127.0.0.1", port, Some(Duration::from_secs(5))).unwrap();
    let mut tester = Orchestrator::new(transport, sqlite_store(&dir));

    let mask: PeripheralMask = [Peripheral::Spi, Peripheral::I2c].into_iter().collect();
    let report = tester.run(mask, 1, b"Hello SPI").unwrap();
    uut.join().unwrap();

    assert!(!report.overall);
    assert!(report
        .slots
        .iter()
        .all(|s| s.status == SlotStatus::Failed { outcome_code: 0xFF }));
    assert!(report.summary.ends_with("Result: Failure"));
}

#[test]
fn test_timeout_fails_the_silent_peripheral() {
    let dir = tempfile::TempDir::new().unwrap();
    let (port, uut) = spawn_uut(Reply::AllBut(Peripheral::Spi));
    let transport =
        UdpTransport::open("127.0.0.1", port, Some(Duration::from_millis(300))).unwrap();
    let mut tester = Orchestrator::new(transport, sqlite_store(&dir));

    let report = tester.run(PeripheralMask::all(), 1, b"x").unwrap();
    uut.join().unwrap();

    assert!(!report.overall);
    assert!(report.slots[0].passed());
    match &report.slots[1].status {
        SlotStatus::Missing { reason } => assert!(reason.contains("timed out")),
        other => panic!("unexpected SPI status {:?}", other),
    }
    assert!(report.slots[2].passed());
    assert!(report.persisted());
    assert!(tester.store().find_run(report.test_id).unwrap().is_some());
}
