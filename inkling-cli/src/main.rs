//! Send rendered content to BLE e-paper displays.

mod config;
mod render;
mod upload;

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use inkling_ble::{
    Address, BtleTransport, ColorScheme, DeviceManager, ProtocolId, RetryPolicy,
};
use tracing::debug;

use config::Config;
use upload::{BlockUploader, DirectWriteUploader};

#[derive(Parser)]
#[command(name = "inkling")]
#[command(about = "Send content to e-paper displays over BLE")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover nearby display tags
    Discover {
        /// Discovery timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },
    /// Send content to a device using a layout configuration
    Send {
        /// Layout configuration file
        config: PathBuf,
        /// Override the device address from the configuration
        #[arg(short, long)]
        device: Option<String>,
        /// Override the protocol from the configuration
        #[arg(short, long)]
        protocol: Option<String>,
        /// Connection timeout in seconds
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },
    /// Test connectivity to a specific device
    Ping {
        /// Device address
        address: String,
        /// Device protocol (auto-detected when omitted)
        #[arg(short, long)]
        protocol: Option<String>,
        /// Connection timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },
    /// Render a layout to an image file without any radio
    Generate {
        /// Layout configuration file
        config: PathBuf,
        /// Output image path (format chosen by extension)
        #[arg(short, long)]
        output: PathBuf,
        /// Assumed display width
        #[arg(short, long, default_value = "296")]
        width: u32,
        /// Assumed display height
        #[arg(long, default_value = "128")]
        height: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    match run(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Commands::Discover { timeout } => discover(Duration::from_secs(timeout)).await,
        Commands::Send {
            config,
            device,
            protocol,
            timeout,
        } => send(&config, device, protocol, Duration::from_secs(timeout)).await,
        Commands::Ping {
            address,
            protocol,
            timeout,
        } => ping(&address, protocol, Duration::from_secs(timeout)).await,
        Commands::Generate {
            config,
            output,
            width,
            height,
        } => generate(&config, &output, width, height),
    }
}

async fn manager() -> inkling_ble::Result<DeviceManager> {
    let transport = Arc::new(BtleTransport::new().await?);
    let mut manager = DeviceManager::new(transport, RetryPolicy::default());
    manager.register_uploader(ProtocolId::Oepl, Arc::new(DirectWriteUploader::default()));
    manager.register_uploader(ProtocolId::Atc, Arc::new(BlockUploader::default()));
    Ok(manager)
}

async fn discover(timeout: Duration) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let manager = manager().await?;
    let tags = manager.discover(timeout).await?;

    if tags.is_empty() {
        println!("No devices found.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("Found {} device(s):", tags.len());
    for tag in tags {
        let rssi = tag
            .rssi
            .map(|r| format!("{r} dBm"))
            .unwrap_or_else(|| "N/A".to_string());
        println!(
            "  {} - {} ({}) RSSI: {}",
            tag.address, tag.name, tag.protocol, rssi
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn send(
    config_path: &std::path::Path,
    device_override: Option<String>,
    protocol_override: Option<String>,
    timeout: Duration,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = Config::load(config_path)?;

    let address = match device_override {
        Some(raw) => Address::from_str(&raw)?,
        None => config.address()?,
    };
    let protocol = match protocol_override {
        Some(raw) => Some(ProtocolId::from_str(&raw)?),
        None => config.protocol()?,
    };

    println!("Connecting to device {address}...");
    let manager = manager().await?;
    let info = manager.connect(address, protocol, timeout).await?;

    println!("Connected to {} ({})", info.name, info.protocol);
    println!(
        "Display: {}x{} pixels, {}",
        info.capabilities.width, info.capabilities.height, info.capabilities.color_scheme
    );

    println!("Rendering image...");
    let mut canvas = render::render(
        &config.display,
        &config.content,
        u32::from(info.capabilities.width),
        u32::from(info.capabilities.height),
        info.capabilities.color_scheme,
    );
    if info.capabilities.rotate_buffer {
        debug!("rotating buffer for panel orientation");
        canvas = canvas.rotated(90);
    }
    let payload = canvas.to_payload();

    println!("Uploading image ({} bytes)...", payload.len());
    if manager.upload(&payload, &info, &RetryPolicy::default()).await {
        println!("Image sent successfully.");
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("Failed to send image.");
        Ok(ExitCode::FAILURE)
    }
}

async fn ping(
    address: &str,
    protocol: Option<String>,
    timeout: Duration,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let address = Address::from_str(address)?;
    let protocol = protocol.map(|raw| ProtocolId::from_str(&raw)).transpose()?;

    println!("Pinging device {address}...");
    let manager = manager().await?;
    let info = manager.connect(address, protocol, timeout).await?;

    println!("Device responded: {} ({})", info.name, info.protocol);
    println!(
        "  Display: {}x{} pixels",
        info.capabilities.width, info.capabilities.height
    );
    println!("  Color scheme: {}", info.capabilities.color_scheme);
    println!(
        "  Rotated buffer: {}",
        if info.capabilities.rotate_buffer { "yes" } else { "no" }
    );
    Ok(ExitCode::SUCCESS)
}

fn generate(
    config_path: &std::path::Path,
    output: &std::path::Path,
    width: u32,
    height: u32,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = Config::load(config_path)?;

    println!("Generating {width}x{height} image...");
    let canvas = render::render(
        &config.display,
        &config.content,
        width,
        height,
        ColorScheme::BlackWhiteRed,
    );
    canvas.to_image().save(output)?;

    println!("Image saved to {}", output.display());
    Ok(ExitCode::SUCCESS)
}
