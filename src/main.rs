// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// XMODEM command line front end
use clap::{Parser, Subcommand};
use log::LevelFilter;
use serialport::{DataBits, Parity, StopBits};
use std::path::PathBuf;
use std::time::Duration;
use xmodem::{Config, FileStorage, LogObserver, Mode, SerialTransport, TcpTransport, Transport};

#[derive(Parser)]
#[command(name = "xmodem")]
#[command(about = "XMODEM file transfer over a serial port or TCP", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long, conflicts_with_all = ["connect", "listen"])]
    port: Option<String>,

    /// Connect to a TCP peer (host:port) instead of a serial port
    #[arg(long, value_name = "ADDR")]
    connect: Option<String>,

    /// Wait for one TCP peer on this address instead of a serial port
    #[arg(long, value_name = "ADDR", conflicts_with = "connect")]
    listen: Option<String>,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name="BITS")]
    stop_bits: u8,

    /// Payload bytes per block
    #[arg(long, default_value = "128", value_name = "BYTES")]
    block_size: usize,

    /// Sequence number of the first block (some peers start at 0)
    #[arg(long, default_value = "1", value_name = "N")]
    start_block: u32,

    /// Retry interval in seconds
    #[arg(long, default_value = "10", value_name = "SECS")]
    timeout_seconds: u64,

    /// Bad blocks tolerated per block before giving up
    #[arg(long, default_value = "10")]
    max_errors: u32,

    /// Silent intervals the sender tolerates before giving up
    #[arg(long, default_value = "5")]
    max_timeouts: u32,

    /// CRC requests sent before falling back to checksum mode
    #[arg(long, default_value = "3")]
    crc_attempts: u32,

    /// Ask for checksum mode instead of CRC when receiving
    #[arg(long)]
    checksum: bool,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file
    Send {
        /// File to send
        file: PathBuf,
    },
    /// Receive a file
    Receive {
        /// Where to save the received data
        file: PathBuf,
    },
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn open_transport(cli: &Cli) -> Result<Box<dyn Transport>, String> {
    if let Some(addr) = &cli.connect {
        println!("Connecting to {}", addr);
        let stream = TcpTransport::connect(addr.as_str()).map_err(|e| format!("Failed to connect: {}", e))?;
        return Ok(Box::new(stream));
    }

    if let Some(addr) = &cli.listen {
        println!("Waiting for a connection on {}", addr);
        let stream = TcpTransport::accept(addr.as_str()).map_err(|e| format!("Failed to accept: {}", e))?;
        return Ok(Box::new(stream));
    }

    let port = cli.port.as_deref().ok_or("One of --port, --connect or --listen is required")?;
    let data_bits = parse_data_bits(cli.data_bits)?;
    let parity = parse_parity(&cli.parity)?;
    let stop_bits = parse_stop_bits(cli.stop_bits)?;

    println!("Opening serial port: {}", port);
    println!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let serial = SerialTransport::open(port, cli.baud, data_bits, parity, stop_bits)
        .map_err(|e| format!("Failed to open serial port: {}", e))?;
    Ok(Box::new(serial))
}

fn build_config(cli: &Cli) -> Result<Config, String> {
    let config = Config {
        timeout: Duration::from_secs(cli.timeout_seconds.max(1)),
        max_timeouts: cli.max_timeouts,
        max_errors: cli.max_errors,
        crc_attempts: cli.crc_attempts,
        mode: if cli.checksum { Mode::Checksum } else { Mode::Crc },
        block_size: cli.block_size,
        start_block: cli.start_block,
    };
    config.validate().map_err(|e| format!("Invalid settings: {}", e))?;
    Ok(config)
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let (config, transport) = match build_config(&cli).and_then(|config| Ok((config, open_transport(&cli)?))) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match &cli.command {
        Commands::Send { file } => {
            println!("\nSending file: {}", file.display());
            let payload = match std::fs::read(file) {
                Ok(data) => data,
                Err(e) => {
                    eprintln!("Failed to read {}: {}", file.display(), e);
                    std::process::exit(1);
                }
            };
            if let Err(e) = xmodem::send(transport, &payload, config, Box::new(LogObserver)) {
                eprintln!("Send failed: {}", e);
                std::process::exit(1);
            }
            println!("\nFile sent successfully!");
        }
        Commands::Receive { file } => {
            println!("\nReceiving to: {}", file.display());
            let storage = Box::new(FileStorage::new(file));
            if let Err(e) = xmodem::receive(transport, storage, config, Box::new(LogObserver)) {
                eprintln!("Receive failed: {}", e);
                std::process::exit(1);
            }
            println!("\nFile received successfully!");
        }
    }
}
