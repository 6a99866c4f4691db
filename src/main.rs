use clap::{Args, Parser, Subcommand};
use flow_serial::config::{Config, ConfigLoader};
use flow_serial::{logging, Error, Event, Parity, SerialConnection, SerialOperator};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::task;
use tracing::{info, warn};

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Talk to a serial device from the terminal.",
    long_about = "Opens a serial device with the given line settings and either bridges it to stdin/stdout or performs deadline-bounded reads. Settings not given on the command line come from the configuration file."
)]
struct Cli {
    /// Configuration file to use instead of the standard locations.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bridge stdin/stdout to a serial device until EOF on the device or Ctrl-C.
    Monitor(PortArgs),
    /// Read from a device with a deadline and print a hex dump of each chunk.
    Read {
        #[command(flatten)]
        port: PortArgs,
        /// Give up on a read after this many milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Number of reads to perform.
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Print the effective configuration as TOML.
    Config {
        /// Write the configuration to this file instead of printing it.
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct PortArgs {
    /// Device path or configured alias. Defaults to `serial.device`.
    device: Option<String>,

    /// Baud rate.
    #[arg(short, long)]
    baud: Option<u32>,

    /// Data bits per character (5-8).
    #[arg(long)]
    char_size: Option<u8>,

    /// Use two stop bits.
    #[arg(long)]
    two_stop_bits: bool,

    /// Parity: none, odd or even.
    #[arg(long)]
    parity: Option<Parity>,

    /// Log a diagnostic for every failed OS call.
    #[arg(long)]
    debug: bool,
}

impl PortArgs {
    /// Fold command-line settings into `config` and resolve the device name.
    fn apply(&self, config: &mut Config) -> Result<String, Box<dyn std::error::Error>> {
        if let Some(baud) = self.baud {
            config.serial.baud = baud;
        }
        if let Some(bits) = self.char_size {
            config.serial.character_size = bits;
        }
        if self.two_stop_bits {
            config.serial.two_stop_bits = true;
        }
        if let Some(parity) = self.parity {
            config.serial.parity = parity;
        }
        if self.debug {
            config.logging.debug = true;
        }
        config.validate()?;

        let device = self
            .device
            .clone()
            .or_else(|| config.serial.device.clone())
            .ok_or("no device given and `serial.device` is not configured")?;
        Ok(config.serial.resolve_port(&device))
    }
}

// --- Main Application Entry Point ---
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let mut config = loader.config().clone();
    apply_verbosity(&mut config, &cli.command, cli.verbose);

    match cli.command {
        Command::Monitor(port) => {
            let device = port.apply(&mut config)?;
            logging::init(&config.logging);
            monitor(&device, &config).await
        }
        Command::Read {
            port,
            timeout_ms,
            count,
        } => {
            let device = port.apply(&mut config)?;
            logging::init(&config.logging);
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .or_else(|| config.serial.read_timeout());
            task::block_in_place(|| read_chunks(&device, &config, timeout, count))
        }
        Command::Config { write } => {
            let loader = ConfigLoader {
                config_path: loader.config_path,
                config,
            };
            match write {
                Some(path) => {
                    loader.save_to(&path)?;
                    println!("Configuration written to {}", path.display());
                }
                None => print!("{}", toml::to_string_pretty(loader.config())?),
            }
            Ok(())
        }
    }
}

/// Raise the log level for `-v` on commands that talk to a device.
///
/// `config` prints or saves the file's own settings, so it is left alone.
fn apply_verbosity(config: &mut Config, command: &Command, verbose: u8) {
    if matches!(command, Command::Config { .. }) {
        return;
    }
    match verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }
}

async fn monitor(device: &str, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let connection = SerialConnection::open(device, &config.serial.settings())?;
    info!(device, config = %connection.config(), "monitoring serial port");
    let (operator, mut events) = SerialOperator::spawn(connection, config.serial.buffer_size)?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut stdout = tokio::io::stdout();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let outcome: Result<(), Box<dyn std::error::Error>> = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(mut line)) => {
                    line.push('\n');
                    if let Err(err) = task::block_in_place(|| operator.write_all(line.as_bytes())) {
                        break Err(err.into());
                    }
                }
                // Keep printing device output after stdin runs dry.
                Ok(None) => stdin_open = false,
                Err(err) => break Err(err.into()),
            },
            event = events.recv() => match event {
                Some(Event::Received(data)) => {
                    if let Err(err) = async {
                        stdout.write_all(&data).await?;
                        stdout.flush().await
                    }.await {
                        break Err(err.into());
                    }
                }
                Some(Event::Closed(Some(err))) => break Err(err.into()),
                Some(Event::Closed(None)) | None => break Ok(()),
            },
        }
    };

    task::block_in_place(|| operator.close())?;
    outcome
}

fn read_chunks(
    device: &str,
    config: &Config,
    timeout: Option<Duration>,
    count: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let connection = SerialConnection::open(device, &config.serial.settings())?;
    let mut buffer = vec![0u8; config.serial.buffer_size];

    let mut outcome = Ok(());
    for _ in 0..count {
        let result = match timeout {
            Some(timeout) => connection.read_timeout(&mut buffer, timeout),
            None => connection.read(&mut buffer),
        };
        match result {
            Ok(n) => print!("{}", hex_dump(&buffer[..n])),
            Err(Error::TimedOut(after)) => {
                warn!(device, "no data within {after:?}");
                break;
            }
            Err(err) => {
                outcome = Err(err);
                break;
            }
        }
    }

    connection.close()?;
    Ok(outcome?)
}

/// Format bytes as 16-column hex with an ASCII gutter.
fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", row * 16);
        for i in 0..16 {
            match chunk.get(i) {
                Some(byte) => {
                    let _ = write!(out, "{byte:02x} ");
                }
                None => out.push_str("   "),
            }
        }
        out.push(' ');
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }
    out
}

// --- Graceful Shutdown Handler ---
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, closing serial port");
}
