//! Simulated broker traffic for the demo binary.
//!
//! [`HostSimulator`] plays the broker against a [`LocalRegistry`]: it fires
//! lifecycle events, runs one OS thread per simulated client (connect, publish
//! periodically, disconnect), and fires every registered schedule on a fixed
//! cadence. Dispatch happens on those threads, exactly as a real host would
//! invoke callbacks from its own workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use broker_host::{
    CallbackError, ClientData, Connect, Disconnect, HostEvent, LocalRegistry, Publish, QoS,
};
use tracing::{debug, warn};

/// Simulation parameters
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of simulated clients, one host thread each
    /// Default: 3
    pub clients: usize,

    /// Pause between publishes of one client
    /// Default: 500 milliseconds
    pub publish_interval: Duration,

    /// Cadence at which every registered schedule fires
    /// Default: 2 seconds
    pub schedule_interval: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            clients: 3,
            publish_interval: Duration::from_millis(500),
            schedule_interval: Duration::from_secs(2),
        }
    }
}

/// Drives a [`LocalRegistry`] the way a broker would.
pub struct HostSimulator {
    registry: Arc<LocalRegistry>,
    config: SimulationConfig,
    running: Arc<AtomicBool>,
}

impl HostSimulator {
    pub fn new(registry: Arc<LocalRegistry>, config: SimulationConfig) -> Self {
        Self {
            registry,
            config,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn start_broker(&self) -> Result<(), CallbackError> {
        self.registry.dispatch(&HostEvent::BrokerStart)
    }

    pub fn stop_broker(&self) -> Result<(), CallbackError> {
        self.registry.dispatch(&HostEvent::BrokerStop)
    }

    /// Ask client threads and the scheduler to wind down.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Fire every registered schedule once.
    pub fn fire_schedules(&self) -> usize {
        let schedules = self.registry.schedules();
        for cron in &schedules {
            if let Err(e) = self.registry.fire_schedule(cron) {
                warn!("Scheduled callback for {} failed: {}", cron, e);
            }
        }
        schedules.len()
    }

    /// Fire schedules every `schedule_interval` until [`HostSimulator::stop`].
    pub async fn run_scheduler(&self) {
        let mut ticker = tokio::time::interval(self.config.schedule_interval);
        // The first tick completes immediately
        ticker.tick().await;

        while self.is_running() {
            ticker.tick().await;
            if !self.is_running() {
                break;
            }
            let fired = self.fire_schedules();
            debug!("Fired {} schedule(s)", fired);
        }
    }

    /// Start one host thread per simulated client.
    ///
    /// Each thread connects, publishes until [`HostSimulator::stop`], then
    /// disconnects, and returns how many messages it published.
    pub fn spawn_clients(&self) -> std::io::Result<Vec<JoinHandle<usize>>> {
        (0..self.config.clients)
            .map(|n| {
                let registry = Arc::clone(&self.registry);
                let running = Arc::clone(&self.running);
                let interval = self.config.publish_interval;
                let client_id = format!("client-{}", n + 1);

                std::thread::Builder::new()
                    .name(format!("host-worker-{}", n + 1))
                    .spawn(move || run_client(&registry, &running, &client_id, interval))
            })
            .collect()
    }
}

fn run_client(
    registry: &LocalRegistry,
    running: &AtomicBool,
    client_id: &str,
    interval: Duration,
) -> usize {
    let client = ClientData::new(client_id);
    let connect = HostEvent::ClientConnect {
        connect: Connect::new(client_id),
        client: client.clone(),
    };
    if let Err(e) = registry.dispatch(&connect) {
        warn!("Connection of {} refused: {}", client_id, e);
        return 0;
    }

    let mut published = 0;
    while running.load(Ordering::SeqCst) {
        published += 1;
        let publish = Publish::new(
            format!("sensors/{}/temperature", client_id),
            format!("{}", 20 + published % 10),
        )
        .with_qos(QoS::AtLeastOnce);
        let event = HostEvent::PublishReceived {
            publish,
            client: client.clone(),
        };
        if let Err(e) = registry.dispatch(&event) {
            warn!("Publish from {} rejected: {}", client_id, e);
        }
        std::thread::sleep(interval);
    }

    let disconnect = HostEvent::ClientDisconnect {
        disconnect: Disconnect { abrupt: false },
        client,
    };
    if let Err(e) = registry.dispatch(&disconnect) {
        warn!("Disconnect of {} failed: {}", client_id, e);
    }

    published
}
