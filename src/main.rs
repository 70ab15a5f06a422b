use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use hwtester::config::{LoggingConfig, TesterConfig};
use hwtester::protocol::wire::MAX_PAYLOAD_LEN;
use hwtester::protocol::{Peripheral, PeripheralMask};
use hwtester::session::{Orchestrator, SessionError, SessionReport};
use hwtester::storage::ResultStore;
use hwtester::Tester;

/// Invalid command line.
const EXIT_ARGS: u8 = 1;
/// UDP communication error.
const EXIT_NETWORK: u8 = 2;
/// Result database error.
const EXIT_STORAGE: u8 = 3;

#[derive(Parser)]
#[command(
    name = "hwtester",
    about = "Run UART, SPI and I2C tests on a remote unit under test",
    version,
    long_about = None,
    args_conflicts_with_subcommands = true,
    after_help = "One MESSAGE is sent to every requested peripheral, wherever it appears on \
the command line. Without one, the greeting of the first requested peripheral \
is sent (UART, SPI, I2C order): -s sends \"Hello SPI\", -us sends \"Hello UART\"."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    #[command(flatten)]
    options: GlobalOpts,
}

#[derive(Subcommand)]
enum Commands {
    /// Print stored test records by test ID
    Get {
        /// Test IDs to print
        #[arg(required = true)]
        ids: Vec<u32>,
    },

    /// Print every stored test record as CSV
    Export,
}

/// Peripheral selection for a test session. Flags stack (`-usi`).
#[derive(Args, Debug)]
struct RunArgs {
    /// Run the UART test
    #[arg(short = 'u', long = "uart", action = ArgAction::Count)]
    uart: u8,

    /// Run the SPI test
    #[arg(short = 's', long = "spi", action = ArgAction::Count)]
    spi: u8,

    /// Run the I2C test
    #[arg(short = 'i', long = "i2c", action = ArgAction::Count)]
    i2c: u8,

    /// Run every peripheral test
    #[arg(long, action = ArgAction::Count)]
    all: u8,

    /// Number of test iterations (0-255)
    #[arg(short = 'n', long = "iterations", default_value_t = 1)]
    iterations: u8,

    /// Print the session report as JSON
    #[arg(long)]
    json: bool,

    /// Payload shared by every requested test, not tied to the flag before it
    /// [default: "Hello UART", "Hello SPI" or "Hello I2C" for the first requested
    /// peripheral]
    message: Option<String>,
}

impl RunArgs {
    /// Validate the selection and pick the payload.
    fn validate(&self) -> Result<(PeripheralMask, Vec<u8>), String> {
        for (count, flag) in [
            (self.uart, "-u"),
            (self.spi, "-s"),
            (self.i2c, "-i"),
            (self.all, "--all"),
        ] {
            if count > 1 {
                return Err(format!("'{}' cannot be repeated", flag));
            }
        }

        let single = [
            (self.uart, Peripheral::Uart),
            (self.spi, Peripheral::Spi),
            (self.i2c, Peripheral::I2c),
        ];
        let peripherals = if self.all > 0 {
            if single.iter().any(|(count, _)| *count > 0) {
                return Err("'--all' cannot be combined with -u, -s or -i".to_string());
            }
            PeripheralMask::all()
        } else {
            single
                .into_iter()
                .filter(|(count, _)| *count > 0)
                .map(|(_, p)| p)
                .collect()
        };

        let Some(first) = peripherals.iter().next() else {
            return Err("at least one of -u, -s, -i or --all must be provided".to_string());
        };

        let payload = match &self.message {
            Some(message) => message.as_bytes().to_vec(),
            None => first.default_message().as_bytes().to_vec(),
        };
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(format!(
                "message is {} bytes long, the limit is {}",
                payload.len(),
                MAX_PAYLOAD_LEN
            ));
        }

        Ok((peripherals, payload))
    }
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// TOML config file (default: $HWTESTER_CONFIG, then ~/HW_tester/hwtester.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// UUT hostname or IP address
    #[arg(long, global = true, value_name = "HOST")]
    uut: Option<String>,

    /// UUT UDP port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Receive timeout per result in milliseconds (0 waits forever)
    #[arg(long = "timeout-ms", global = true, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// SQLite database holding the test records
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
}

impl GlobalOpts {
    fn load_config(&self) -> Result<TesterConfig> {
        let mut config = match &self.config {
            Some(path) => TesterConfig::load(path)?,
            None => TesterConfig::load_or_default(),
        };
        if let Some(uut) = &self.uut {
            config.uut.address = uut.clone();
        }
        if let Some(port) = self.port {
            config.uut.port = port;
        }
        if let Some(ms) = self.timeout_ms {
            config.uut.receive_timeout_ms = Some(ms);
        }
        if let Some(db) = &self.db {
            config.storage.db_path = Some(db.clone());
        }
        Ok(config)
    }
}

fn init_tracing(logging: &LoggingConfig) {
    // stdout carries reports and CSV, so logs go to stderr.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_ARGS)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // Config-loading warnings fire before the configured subscriber exists.
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .finish();
    let loaded = tracing::subscriber::with_default(bootstrap, || cli.options.load_config());
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(EXIT_ARGS);
        }
    };
    init_tracing(&config.logging);

    match cli.command {
        Some(Commands::Get { ids }) => get_records(&config, &ids),
        Some(Commands::Export) => export_records(&config),
        None => run_session(config, cli.run).await,
    }
}

fn get_records(config: &TesterConfig, ids: &[u32]) -> ExitCode {
    let store = match hwtester::open_store(config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(EXIT_STORAGE);
        }
    };
    for id in ids {
        match store.lookup_run(*id) {
            Ok(text) => println!("{}\n", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::from(EXIT_STORAGE);
            }
        }
    }
    ExitCode::SUCCESS
}

fn export_records(config: &TesterConfig) -> ExitCode {
    let exported = hwtester::open_store(config).and_then(|store| Ok(store.export_all()?));
    match exported {
        Ok(csv) => {
            print!("{}", csv);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_STORAGE)
        }
    }
}

async fn run_session(config: TesterConfig, args: RunArgs) -> ExitCode {
    let (peripherals, payload) = match args.validate() {
        Ok(selection) => selection,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            eprintln!("Run 'hwtester --help' for usage.");
            return ExitCode::from(EXIT_ARGS);
        }
    };

    let transport = match hwtester::open_transport(&config) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Network connection failed: {}", e);
            return ExitCode::from(EXIT_NETWORK);
        }
    };
    let store = match hwtester::open_store(&config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(EXIT_STORAGE);
        }
    };

    tracing::info!(
        uut = %config.uut.address,
        port = config.uut.port,
        peripherals = %peripherals,
        iterations = args.iterations,
        "Starting test session"
    );

    let iterations = args.iterations;
    let outcome = tokio::task::spawn_blocking(move || {
        let mut tester: Tester = Orchestrator::new(transport, store);
        tester.run(peripherals, iterations, &payload)
    })
    .await;

    let report = match outcome {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(session_exit_code(&e));
        }
        Err(e) => {
            eprintln!("Error: test session aborted: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error: failed to render report: {}", e),
        }
    } else {
        print_report(&report, iterations);
    }

    if let Some(err) = &report.persist_error {
        eprintln!("Error logging to database: {}", err);
        return ExitCode::from(EXIT_STORAGE);
    }
    ExitCode::SUCCESS
}

fn session_exit_code(err: &SessionError) -> u8 {
    match err {
        SessionError::EmptyMask | SessionError::PayloadTooLong(_) => EXIT_ARGS,
        SessionError::IdAllocation(_) => EXIT_STORAGE,
        SessionError::Send(_) => EXIT_NETWORK,
    }
}

fn print_report(report: &SessionReport, iterations: u8) {
    println!(
        "\nTest #{} | {} iteration(s) | {}",
        report.test_id,
        iterations,
        if report.overall { "PASS" } else { "FAIL" }
    );
    for slot in &report.slots {
        println!("  {}", slot);
    }
    println!();
    println!("{}", report.summary);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(args: &[&str]) -> (PeripheralMask, Vec<u8>) {
        let cli = Cli::try_parse_from(std::iter::once("hwtester").chain(args.iter().copied()))
            .unwrap();
        cli.run.validate().unwrap()
    }

    #[test]
    fn test_message_is_shared_wherever_it_appears() {
        let (mask, payload) = selection(&["-s", "custom", "-u"]);
        assert_eq!(mask.bits(), 0x02 | 0x04);
        assert_eq!(payload, b"custom");
    }

    #[test]
    fn test_default_message_follows_first_peripheral() {
        assert_eq!(selection(&["-si"]).1, b"Hello SPI");
        assert_eq!(selection(&["-i", "-u"]).1, b"Hello UART");
        assert_eq!(selection(&["--all"]).1, b"Hello UART");
    }
}
