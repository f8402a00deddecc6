use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use broker_host::{LocalHost, PluginRegistry};
use clap::Parser;
use hello_plugin::logging::{self, LoggingMode};
use hello_plugin::{HelloWorldPlugin, HostSimulator, PluginConfig, SimulationConfig};
use tracing::{info, warn};

/// Hello-world plugin demo
///
/// Runs the plugin against an in-process broker host that simulates client
/// connections, publishes and scheduled callbacks.
#[derive(Parser, Debug)]
#[command(name = "hello-plugin")]
#[command(about = "Run the hello-world plugin against a simulated broker")]
#[command(version)]
pub struct Args {
    /// Plugin configuration file (JSON); defaults are used when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of simulated clients
    #[arg(long, default_value = "3")]
    pub clients: usize,

    /// Milliseconds between publishes of each client
    #[arg(long, default_value = "500")]
    pub publish_interval_ms: u64,

    /// Milliseconds between schedule firings
    #[arg(long, default_value = "2000")]
    pub schedule_interval_ms: u64,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    pub run_for: Option<u64>,

    /// Log mode (silent, development, debug)
    #[arg(long, default_value = "development")]
    pub log_mode: String,

    /// Log filter, e.g. "info" or "info,rx_broker=debug"
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Args {
    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        if self.clients == 0 {
            return Err(anyhow::anyhow!("At least one simulated client is required"));
        }

        if self.publish_interval_ms == 0 || self.schedule_interval_ms == 0 {
            return Err(anyhow::anyhow!("Intervals must be positive"));
        }

        if self.run_for == Some(0) {
            return Err(anyhow::anyhow!("--run-for must be positive"));
        }

        match self.log_mode.to_lowercase().as_str() {
            "silent" | "development" | "dev" | "debug" => {}
            _ => {
                return Err(anyhow::anyhow!(
                    "Invalid log mode '{}'. Valid modes: silent, development, debug",
                    self.log_mode
                ));
            }
        }

        Ok(())
    }
}

/// Configuration derived from command line arguments
#[derive(Debug, Clone)]
pub struct Config {
    pub plugin_config: Option<PathBuf>,
    pub simulation: SimulationConfig,
    pub run_for: Option<Duration>,
    pub log_mode: LoggingMode,
    pub log_level: Option<String>,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            plugin_config: args.config,
            simulation: SimulationConfig {
                clients: args.clients,
                publish_interval: Duration::from_millis(args.publish_interval_ms),
                schedule_interval: Duration::from_millis(args.schedule_interval_ms),
            },
            run_for: args.run_for.map(Duration::from_secs),
            log_mode: LoggingMode::from_name(&args.log_mode),
            log_level: args.log_level,
        }
    }
}

impl Config {
    pub fn from_args() -> Result<Self> {
        let args = Args::parse();
        args.validate()?;
        Ok(Config::from(args))
    }

    fn load_plugin_config(&self) -> Result<PluginConfig> {
        match &self.plugin_config {
            Some(path) => PluginConfig::from_file(path)
                .with_context(|| format!("Failed to load plugin config from {}", path.display())),
            None => Ok(PluginConfig::default()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_args()?;
    logging::init_logging_with(config.log_mode, config.log_level.as_deref())
        .context("Failed to initialize logging")?;

    let plugin_config = config.load_plugin_config()?;
    info!("Plugin configuration: {:?}", plugin_config);

    run(config, plugin_config).await
}

async fn run(config: Config, plugin_config: PluginConfig) -> Result<()> {
    let host = LocalHost::new();
    let plugin = HelloWorldPlugin::new(plugin_config);
    let stats = plugin.stats();

    let mut plugins = PluginRegistry::new();
    plugins.register(Box::new(plugin));
    plugins
        .initialize_all(&host.context())
        .await
        .context("Failed to initialize plugins")?;
    info!("Initialized plugins: {:?}", plugins.plugin_names());

    let simulator = Arc::new(HostSimulator::new(
        Arc::clone(&host.registry),
        config.simulation.clone(),
    ));
    if let Err(e) = simulator.start_broker() {
        warn!("Broker start callback failed: {}", e);
    }

    let clients = simulator
        .spawn_clients()
        .context("Failed to start simulated client threads")?;
    let scheduler = tokio::spawn({
        let simulator = Arc::clone(&simulator);
        async move { simulator.run_scheduler().await }
    });

    match config.run_for {
        Some(duration) => {
            info!("Running for {}s", duration.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            info!("Running until Ctrl+C");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl+C")?;
        }
    }

    info!("Stopping simulated traffic...");
    simulator.stop();
    let published = tokio::task::spawn_blocking(move || {
        clients
            .into_iter()
            .map(|client| client.join().unwrap_or(0))
            .sum::<usize>()
    })
    .await
    .context("Client threads did not finish")?;
    scheduler.await.context("Scheduler task failed")?;

    if let Err(e) = simulator.stop_broker() {
        warn!("Broker stop callback failed: {}", e);
    }

    plugins
        .shutdown_all()
        .await
        .context("Failed to shut down plugins")?;
    host.registry.shutdown();

    let snapshot = stats.snapshot();
    info!("Simulated clients published {} message(s)", published);
    info!("Plugin stats: {:?}", snapshot);

    Ok(())
}
