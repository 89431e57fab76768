//! Appliance entry point: wire the sysfs GPIO hardware to the orchestrator
//! and run the control loop.

use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use cardcopy::config::Config;
use cardcopy::errors::{CopyError, CopyResult};
use cardcopy::hal::{SysfsButton, SysfsLamp};
use cardcopy::indicators::IndicatorPanel;
use cardcopy::orchestrator::{Buttons, Orchestrator};
use cardcopy::space::SystemDiskSpace;

#[derive(Parser, Debug)]
#[command(
    name = "cardcopyd",
    about = "Headless one-button removable-volume duplicator"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/cardcopy.toml")]
    config: PathBuf,

    /// Override the mount root from the configuration file.
    #[arg(long)]
    mount_root: Option<PathBuf>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> CopyResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        warn!(
            "config file {} not found, using defaults",
            cli.config.display()
        );
        Config::default()
    };
    if let Some(mount_root) = cli.mount_root {
        config.mount_root = mount_root;
    }
    config.validate()?;

    if cli.print_config {
        let rendered =
            toml::to_string_pretty(&config).map_err(|e| CopyError::Config(e.to_string()))?;
        print!("{rendered}");
        return Ok(());
    }

    info!("watching {} for volumes", config.mount_root.display());

    let pins = config.pins;
    let panel = IndicatorPanel::new(
        Arc::new(SysfsLamp::new(pins.status_lamp)?),
        Arc::new(SysfsLamp::new(pins.progress_lamp)?),
        Arc::new(SysfsLamp::new(pins.error_lamp)?),
        Arc::new(SysfsLamp::new(pins.source_mounted_lamp)?),
        Arc::new(SysfsLamp::new(pins.dest_mounted_lamp)?),
    );

    let hold = config.hold_threshold();
    let buttons = Buttons {
        go: Arc::new(SysfsButton::new(pins.go_button, hold)?),
        cancel: Arc::new(SysfsButton::new(pins.cancel_button, hold)?),
        eject: Arc::new(SysfsButton::new(pins.eject_button, hold)?),
        power: Arc::new(SysfsButton::new(pins.power_button, hold)?),
    };

    let mut orchestrator =
        Orchestrator::new(Arc::new(config), Arc::new(SystemDiskSpace), panel, buttons);
    orchestrator.run().await;
    Ok(())
}
