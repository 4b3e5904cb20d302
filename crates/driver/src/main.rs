//! uvc-cam
//!
//! Command line front-end for the camera driver. Lists matching cameras,
//! dumps their descriptor forest, and reads or writes image controls.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{CameraBridge, CameraCommand, CameraEvent, create_camera_bridge, setup_logging};
use driver::config::DriverConfig;
use driver::usb::spawn_camera_worker;
use protocol::{CameraControl, CameraInfo, DeviceLocation, DescriptorForest};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "uvc-cam")]
#[command(author, version, about = "Control a USB video camera")]
#[command(long_about = "
Attaches to a USB video camera, parses its descriptors and reads or writes
its brightness, contrast and hue controls.

EXAMPLES:
    # List matching cameras
    uvc-cam list

    # Dump the descriptor forest as JSON
    uvc-cam describe --json

    # Show supported controls and their ranges
    uvc-cam controls

    # Read and write a control on a specific camera
    uvc-cam get brightness --device 001:004
    uvc-cam set brightness -10

CONFIGURATION:
    The driver looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/uvc-cam/driver.toml
    3. /etc/uvc-cam/driver.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List connected cameras
    List,

    /// Print the descriptor forest of a camera
    Describe {
        /// Camera as BUS:ADDR (first match if omitted)
        #[arg(short, long, value_name = "BUS:ADDR")]
        device: Option<DeviceLocation>,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Show supported controls and their ranges
    Controls {
        #[arg(short, long, value_name = "BUS:ADDR")]
        device: Option<DeviceLocation>,
    },

    /// Read a control value
    Get {
        /// brightness, contrast or hue
        control: CameraControl,

        #[arg(short, long, value_name = "BUS:ADDR")]
        device: Option<DeviceLocation>,
    },

    /// Write a control value
    Set {
        /// brightness, contrast or hue
        control: CameraControl,

        #[arg(allow_hyphen_values = true)]
        value: i32,

        #[arg(short, long, value_name = "BUS:ADDR")]
        device: Option<DeviceLocation>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = DriverConfig::default();
        let path = DriverConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        DriverConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        DriverConfig::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.driver.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("uvc-cam v{}", env!("CARGO_PKG_VERSION"));

    let settings = config
        .probe_settings()
        .context("Invalid device settings")?;

    let (bridge, worker) = create_camera_bridge();
    let worker_handle = spawn_camera_worker(worker, vec![config.device_filter()], settings);

    let result = run(args.command.unwrap_or(Command::List), &bridge).await;

    drain_events(&bridge);

    if let Err(e) = bridge.send_command(CameraCommand::Shutdown).await {
        error!("Error shutting down camera worker: {:#}", e);
    }

    match worker_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Camera worker failed: {}", e),
        Err(e) => error!("Camera worker thread panicked: {:?}", e),
    }

    result
}

async fn run(command: Command, bridge: &CameraBridge) -> Result<()> {
    match command {
        Command::List => list_devices(bridge).await,
        Command::Describe { device, json } => {
            let info = attach(bridge, device).await?;
            let location = info.summary.location();
            let forest = bridge
                .request(|response| CameraCommand::Describe { location, response })
                .await
                .context("Failed to read descriptor forest")?;
            print_forest(&info, &forest, json)?;
            detach(bridge, location).await
        }
        Command::Controls { device } => {
            let info = attach(bridge, device).await?;
            let location = info.summary.location();
            let controls = bridge
                .request(|response| CameraCommand::Controls { location, response })
                .await
                .context("Failed to query controls")?;

            if controls.is_empty() {
                println!("{} advertises no supported controls.", info.node);
            }
            for c in controls {
                println!(
                    "  {:<11} min {:>6}  max {:>6}  step {:>4}  default {:>6}",
                    c.control, c.range.min, c.range.max, c.range.step, c.range.default
                );
            }
            detach(bridge, location).await
        }
        Command::Get { control, device } => {
            let info = attach(bridge, device).await?;
            let location = info.summary.location();
            let value = bridge
                .request(|response| CameraCommand::GetControl {
                    location,
                    control,
                    response,
                })
                .await
                .with_context(|| format!("Failed to read {}", control))?;
            println!("{} = {}", control, value);
            detach(bridge, location).await
        }
        Command::Set {
            control,
            value,
            device,
        } => {
            let info = attach(bridge, device).await?;
            let location = info.summary.location();
            let outcome = bridge
                .request(|response| CameraCommand::SetControl {
                    location,
                    control,
                    value,
                    response,
                })
                .await
                .with_context(|| format!("Failed to set {}", control))?;
            println!(
                "{}: {} -> {} (requested {})",
                control, outcome.previous, outcome.current, outcome.requested
            );
            if !outcome.applied() {
                println!("  note: the camera adjusted the requested value");
            }
            detach(bridge, location).await
        }
    }
}

/// List matching cameras
async fn list_devices(bridge: &CameraBridge) -> Result<()> {
    let devices = bridge
        .request(|response| CameraCommand::ListDevices { response })
        .await
        .context("Failed to list cameras")?;

    if devices.is_empty() {
        println!("No cameras found.");
    } else {
        println!("Found {} camera(s):\n", devices.len());
        for device in devices {
            println!(
                "  [{}] {:04x}:{:04x} - {} {}",
                device.location(),
                device.vendor_id,
                device.product_id,
                device
                    .manufacturer
                    .as_deref()
                    .unwrap_or("Unknown Manufacturer"),
                device.product.as_deref().unwrap_or("Unknown Product")
            );
            if let Some(serial) = &device.serial_number {
                println!("      Serial: {}", serial);
            }
        }
    }

    Ok(())
}

async fn attach(bridge: &CameraBridge, device: Option<DeviceLocation>) -> Result<CameraInfo> {
    let info = bridge
        .request(|response| CameraCommand::Attach {
            location: device,
            response,
        })
        .await
        .context("Failed to attach camera")?;
    info!("Attached {} as {}", info.summary.location(), info.node);
    Ok(info)
}

async fn detach(bridge: &CameraBridge, location: DeviceLocation) -> Result<()> {
    bridge
        .request(|response| CameraCommand::Detach { location, response })
        .await
        .context("Failed to detach camera")?;
    Ok(())
}

fn print_forest(info: &CameraInfo, forest: &DescriptorForest, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(forest).context("Failed to serialize forest")?;
        println!("{}", text);
        return Ok(());
    }

    let counts = forest.counts();
    println!(
        "{} ({}) at {}",
        info.capability_info.card, info.node, info.capability_info.bus_info
    );
    println!(
        "  {} configuration(s), {} interface(s), {} endpoint(s), {} video record(s)",
        counts.configurations, counts.interfaces, counts.endpoints, counts.video_interfaces
    );
    println!(
        "  controls: brightness={} contrast={} hue={}",
        info.capability.brightness, info.capability.contrast, info.capability.hue
    );
    println!(
        "  format: {}x{} {}",
        info.format.width,
        info.format.height,
        info.format.fourcc_str()
    );
    match info.streaming {
        Some(sel) => println!(
            "  streaming: interface {} alt {} endpoint {:#04x} ({} bytes)",
            sel.interface_number, sel.alternate_setting, sel.endpoint_address, sel.packet_size
        ),
        None => println!("  streaming: no matching alternate setting"),
    }
    Ok(())
}

/// Log any events the worker queued while the command ran
fn drain_events(bridge: &CameraBridge) {
    while let Some(event) = bridge.try_recv_event() {
        match event {
            CameraEvent::StreamStateChanged { location, state } => {
                warn!("Streaming on {} left {:?}", location, state);
            }
            other => info!("Camera event: {:?}", other),
        }
    }
}
