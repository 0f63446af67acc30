mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    blades::BladesSubcommand, config::ConfigSubcommand, control::ControlSubcommand,
    device::DeviceSubcommand, disk_type::DiskTypeSubcommand, scans::ScansSubcommand, Connection,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "soundscan",
    about = "Acoustic blade inspection rig: calibrate, scan, and export recordings",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .soundscan/)
    #[arg(long, global = true, env = "SOUNDSCAN_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Serial port (default: config.yaml, then auto-detect)
    #[arg(long, global = true, env = "SOUNDSCAN_PORT")]
    port: Option<String>,

    /// Baud rate (default: config.yaml)
    #[arg(long, global = true, env = "SOUNDSCAN_BAUD")]
    baud: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .soundscan/ with a default config and an empty store
    Init,

    /// List serial ports; candidates for auto-connect are marked
    Ports,

    /// Manage disk types
    DiskType {
        #[command(subcommand)]
        subcommand: DiskTypeSubcommand,
    },

    /// Show or change the rig calibration
    Device {
        #[command(subcommand)]
        subcommand: DeviceSubcommand,
    },

    /// Run a scan session until the base returns (Ctrl-C to stop)
    Scan {
        /// Disk type id
        #[arg(long = "disk-type")]
        disk_type: u64,
    },

    /// Send a single command to the rig
    Control {
        #[command(subcommand)]
        subcommand: ControlSubcommand,
    },

    /// List scan sessions
    Scans {
        #[command(subcommand)]
        subcommand: ScansSubcommand,
    },

    /// List and export blade recordings
    Blades {
        #[command(subcommand)]
        subcommand: BladesSubcommand,
    },

    /// Record a test clip from the microphone
    Record {
        /// Clip length in milliseconds
        #[arg(long, default_value = "3000")]
        ms: u64,

        /// Output WAV file
        #[arg(long, required_unless_present = "list_devices")]
        out: Option<PathBuf>,

        /// List input devices instead of recording
        #[arg(long)]
        list_devices: bool,
    },

    /// Inspect and validate config.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Scan { .. } | Commands::Record { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let conn = Connection {
        port: cli.port,
        baud: cli.baud,
    };

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Ports => cmd::ports::run(cli.json),
        Commands::DiskType { subcommand } => cmd::disk_type::run(&root, subcommand, cli.json),
        Commands::Device { subcommand } => cmd::device::run(&root, subcommand, cli.json),
        Commands::Scan { disk_type } => cmd::scan::run(&root, disk_type, &conn, cli.json),
        Commands::Control { subcommand } => cmd::control::run(&root, subcommand, &conn, cli.json),
        Commands::Scans { subcommand } => cmd::scans::run(&root, subcommand, cli.json),
        Commands::Blades { subcommand } => cmd::blades::run(&root, subcommand, cli.json),
        Commands::Record {
            ms,
            out,
            list_devices,
        } => cmd::record::run(&root, ms, out.as_deref(), list_devices, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
