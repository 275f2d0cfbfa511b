use crate::broadcast::BroadcastHub;
use crate::ports::{Port, PortCatalog};
use crate::protocol::{ControlCommand, Outbound, ServerEvent, DEFAULT_SPEED_FACTOR};
use crate::route::RouteGenerator;
use crate::voyage::{Mmsi, PositionReport, SimulationError, VoyageSimulator};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_PUBLISH_BATCH_SIZE: usize = 10;
const STATS_LOG_EVERY_MESSAGES: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error("port catalog needs at least two ports to plan a voyage")]
    NoPorts,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub speed_factor: f64,
    pub publish_batch_size: usize,
    pub seed: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            speed_factor: DEFAULT_SPEED_FACTOR,
            publish_batch_size: DEFAULT_PUBLISH_BATCH_SIZE,
            seed: None,
        }
    }
}

/// Snapshot of the scheduler's monotonically increasing counters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerStats {
    pub messages_sent: u64,
    pub reports_generated: u64,
    pub report_failures: u64,
    pub ticks: u64,
    pub vessels_added: u64,
    pub active_vessels: usize,
    pub runtime: Duration,
    pub messages_per_second: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VesselAdded {
    pub mmsi: Mmsi,
    pub start_port: Port,
    pub end_port: Port,
    pub distance_nm: f64,
}

impl From<&VesselAdded> for ServerEvent {
    fn from(added: &VesselAdded) -> Self {
        ServerEvent::VesselAdded {
            mmsi: added.mmsi.to_string(),
            start_port: added.start_port.name.clone(),
            end_port: added.end_port.name.clone(),
            distance_nm: added.distance_nm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickSummary {
    pub reports: usize,
    pub published: usize,
}

/// A control command on its way to the scheduler task, with an optional
/// channel for the outcome.
#[derive(Debug)]
pub struct ControlRequest {
    pub command: ControlCommand,
    pub reply: Option<oneshot::Sender<ServerEvent>>,
}

struct VesselEntry {
    simulator: VoyageSimulator,
    start_port: Port,
    end_port: Port,
}

/// Per-tick driver of every active voyage.
///
/// The scheduler is the only owner of the vessel map. Control commands reach
/// it through [`ControlRequest`]s and are applied between ticks.
pub struct BroadcastScheduler {
    vessels: BTreeMap<Mmsi, VesselEntry>,
    catalog: PortCatalog,
    route_generator: RouteGenerator,
    hub: BroadcastHub,
    rng: StdRng,

    tick_interval: Duration,
    speed_factor: f64,
    publish_batch_size: usize,

    // Counters, never reset
    messages_sent: u64,
    reports_generated: u64,
    report_failures: u64,
    ticks: u64,
    vessels_added: u64,
    start_time: Instant,
}

impl BroadcastScheduler {
    pub fn new(config: SchedulerConfig, catalog: PortCatalog, hub: BroadcastHub) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            vessels: BTreeMap::new(),
            catalog,
            route_generator: RouteGenerator::new(),
            hub,
            rng,
            tick_interval: config.tick_interval,
            speed_factor: config.speed_factor,
            publish_batch_size: config.publish_batch_size.max(1),
            messages_sent: 0,
            reports_generated: 0,
            report_failures: 0,
            ticks: 0,
            vessels_added: 0,
            start_time: Instant::now(),
        }
    }

    pub fn with_route_generator(mut self, route_generator: RouteGenerator) -> Self {
        self.route_generator = route_generator;
        self
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn speed_factor(&self) -> f64 {
        self.speed_factor
    }

    pub fn active_vessels(&self) -> usize {
        self.vessels.len()
    }

    pub fn vessel(&self, mmsi: &Mmsi) -> Option<&VoyageSimulator> {
        self.vessels.get(mmsi).map(|entry| &entry.simulator)
    }

    pub fn vessel_ids(&self) -> impl Iterator<Item = &Mmsi> {
        self.vessels.keys()
    }

    /// Starts a voyage between two randomly selected ports. An existing
    /// voyage for the same vessel is replaced.
    pub fn add_vessel(&mut self, mmsi: &str, speed_knots: f64) -> Result<VesselAdded, SchedulerError> {
        let (start_port, end_port) = self
            .catalog
            .select_pair(&mut self.rng)
            .ok_or(SchedulerError::NoPorts)?;

        self.add_vessel_between(mmsi, speed_knots, start_port, end_port)
    }

    pub fn add_vessel_between(
        &mut self,
        mmsi: &str,
        speed_knots: f64,
        start_port: Port,
        end_port: Port,
    ) -> Result<VesselAdded, SchedulerError> {
        let mut simulator = VoyageSimulator::for_vessel(mmsi)?;
        let route = self
            .route_generator
            .generate_route(start_port.location(), end_port.location());
        simulator.start_voyage(route, speed_knots)?;

        let (distance_nm, duration_hours) = simulator
            .voyage()
            .map(|v| (v.total_distance, v.estimated_duration_hours()))
            .unwrap_or_default();

        info!(
            "Added vessel {}: {} -> {}, speed {} kn, distance {:.2} nm, estimated duration {:.2} h",
            mmsi, start_port.name, end_port.name, speed_knots, distance_nm, duration_hours
        );

        let mmsi = simulator.mmsi().clone();
        let added = VesselAdded {
            mmsi: mmsi.clone(),
            start_port: start_port.clone(),
            end_port: end_port.clone(),
            distance_nm,
        };

        if self
            .vessels
            .insert(
                mmsi,
                VesselEntry {
                    simulator,
                    start_port,
                    end_port,
                },
            )
            .is_some()
        {
            debug!("Replaced previous voyage for vessel {}", added.mmsi);
        }
        self.vessels_added += 1;

        Ok(added)
    }

    pub fn route_of(&self, mmsi: &Mmsi) -> Option<(&Port, &Port)> {
        self.vessels
            .get(mmsi)
            .map(|entry| (&entry.start_port, &entry.end_port))
    }

    /// Values `<= 0` switch the loop into fast-forward mode with no sleep.
    pub fn set_speed_factor(&mut self, speed_factor: f64) -> Result<(), SchedulerError> {
        if speed_factor.is_nan() {
            return Err(SimulationError::InvalidParameter("speed factor must be a number".to_string()).into());
        }
        self.speed_factor = speed_factor;
        info!("Simulation speed changed to {}x", speed_factor);
        Ok(())
    }

    /// Inter-tick pause, or `None` in fast-forward mode.
    pub fn sleep_duration(&self) -> Option<Duration> {
        if self.speed_factor <= 0.0 {
            return None;
        }
        let secs = self.tick_interval.as_secs_f64() / self.speed_factor;
        if secs.is_finite() {
            Some(Duration::from_secs_f64(secs))
        } else {
            Some(self.tick_interval)
        }
    }

    /// One report per active vessel. Vessels that fail are logged and skipped.
    pub fn generate_reports(&mut self, now: DateTime<Utc>) -> Vec<PositionReport> {
        let mut reports = Vec::with_capacity(self.vessels.len());
        for (mmsi, entry) in self.vessels.iter_mut() {
            match entry.simulator.report_at(now) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    self.report_failures += 1;
                    error!("Error generating report for vessel {}: {}", mmsi, e);
                }
            }
        }
        self.reports_generated += reports.len() as u64;
        reports
    }

    /// Generates this tick's reports and publishes them in fixed-size sub-batches.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickSummary {
        let reports = self.generate_reports(now);
        let mut published = 0;

        for batch in reports.chunks(self.publish_batch_size) {
            for report in batch {
                published += self.publish(&Outbound::from(report));
            }
        }

        self.ticks += 1;
        TickSummary {
            reports: reports.len(),
            published,
        }
    }

    fn publish(&mut self, message: &Outbound) -> usize {
        if self.hub.publish(message) == 0 {
            return 0;
        }

        let before = self.messages_sent;
        self.messages_sent += 1;
        if before / STATS_LOG_EVERY_MESSAGES != self.messages_sent / STATS_LOG_EVERY_MESSAGES {
            self.log_stats();
        }
        1
    }

    pub fn handle_command(&mut self, command: ControlCommand) -> Result<ServerEvent, SchedulerError> {
        let event = match command {
            ControlCommand::AddVessel { mmsi, speed } => {
                let added = self.add_vessel(&mmsi, speed)?;
                ServerEvent::from(&added)
            }
            ControlCommand::SetSpeed { speed_factor } => {
                self.set_speed_factor(speed_factor)?;
                ServerEvent::SpeedUpdated {
                    speed_factor: self.speed_factor,
                }
            }
        };

        self.publish(&Outbound::from(event.clone()));
        Ok(event)
    }

    fn handle_request(&mut self, request: ControlRequest) {
        let reply = match self.handle_command(request.command) {
            Ok(event) => event,
            Err(e) => {
                warn!("Control command failed: {}", e);
                ServerEvent::Error {
                    message: e.to_string(),
                }
            }
        };

        if let Some(tx) = request.reply {
            // The requesting client may already be gone
            let _ = tx.send(reply);
        }
    }

    pub fn get_stats(&self) -> SchedulerStats {
        let runtime = self.start_time.elapsed();
        let secs = runtime.as_secs_f64();
        SchedulerStats {
            messages_sent: self.messages_sent,
            reports_generated: self.reports_generated,
            report_failures: self.report_failures,
            ticks: self.ticks,
            vessels_added: self.vessels_added,
            active_vessels: self.vessels.len(),
            runtime,
            messages_per_second: if secs > 0.0 {
                self.messages_sent as f64 / secs
            } else {
                0.0
            },
        }
    }

    fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Simulation statistics: messages sent {}, active vessels {}, runtime {:.1} min, speed factor {}x, {:.1} msg/s",
            stats.messages_sent,
            stats.active_vessels,
            stats.runtime.as_secs_f64() / 60.0,
            self.speed_factor,
            stats.messages_per_second
        );
    }

    /// Runs the tick loop until the process ends. Commands are applied while
    /// waiting for the next tick, never in the middle of one.
    pub async fn run(mut self, commands: mpsc::Receiver<ControlRequest>) {
        let mut commands = Some(commands);
        info!("Starting message generation...");

        loop {
            self.tick(Utc::now());

            match self.sleep_duration() {
                Some(delay) => self.wait_for_next_tick(delay, &mut commands).await,
                None => {
                    self.drain_pending(&mut commands);
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    async fn wait_for_next_tick(
        &mut self,
        delay: Duration,
        commands: &mut Option<mpsc::Receiver<ControlRequest>>,
    ) {
        let deadline = time::Instant::now() + delay;

        while let Some(rx) = commands.as_mut() {
            let mut closed = false;
            tokio::select! {
                _ = time::sleep_until(deadline) => return,
                request = rx.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => closed = true,
                },
            }
            if closed {
                debug!("Control channel closed, ticking without commands");
                *commands = None;
            }
        }

        time::sleep_until(deadline).await;
    }

    fn drain_pending(&mut self, commands: &mut Option<mpsc::Receiver<ControlRequest>>) {
        let Some(rx) = commands.as_mut() else {
            return;
        };

        loop {
            match rx.try_recv() {
                Ok(request) => self.handle_request(request),
                Err(mpsc::error::TryRecvError::Empty) => return,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    *commands = None;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_scheduler() -> BroadcastScheduler {
        let config = SchedulerConfig {
            seed: Some(42),
            ..SchedulerConfig::default()
        };
        BroadcastScheduler::new(config, PortCatalog::default(), BroadcastHub::new(64))
    }

    #[test]
    fn test_sleep_duration_scales_with_speed_factor() {
        let mut scheduler = test_scheduler();
        assert_eq!(scheduler.sleep_duration(), Some(Duration::from_secs(1)));

        scheduler.set_speed_factor(0.5).unwrap();
        assert_eq!(scheduler.sleep_duration(), Some(Duration::from_secs(10)));

        scheduler.set_speed_factor(0.0).unwrap();
        assert_eq!(scheduler.sleep_duration(), None);

        scheduler.set_speed_factor(-3.0).unwrap();
        assert_eq!(scheduler.sleep_duration(), None);
    }

    #[test]
    fn test_nan_speed_factor_rejected() {
        let mut scheduler = test_scheduler();
        assert!(scheduler.set_speed_factor(f64::NAN).is_err());
        assert_eq!(scheduler.speed_factor(), DEFAULT_SPEED_FACTOR);
    }

    #[test]
    fn test_invalid_vessel_does_not_disturb_others() {
        let mut scheduler = test_scheduler();
        scheduler.add_vessel("123456789", 15.0).unwrap();
        assert!(scheduler.add_vessel("123", 15.0).is_err());
        assert!(scheduler.add_vessel("123456780", -1.0).is_err());
        assert_eq!(scheduler.active_vessels(), 1);
    }

    #[test]
    fn test_re_adding_vessel_replaces_voyage() {
        let mut scheduler = test_scheduler();
        let rotterdam = PortCatalog::default().find("Rotterdam").cloned().unwrap();
        let hamburg = PortCatalog::default().find("Hamburg").cloned().unwrap();
        let antwerp = PortCatalog::default().find("Antwerp").cloned().unwrap();

        scheduler
            .add_vessel_between("123456789", 15.0, rotterdam.clone(), hamburg)
            .unwrap();
        scheduler
            .add_vessel_between("123456789", 12.0, rotterdam, antwerp)
            .unwrap();

        let mmsi: Mmsi = "123456789".parse().unwrap();
        assert_eq!(scheduler.active_vessels(), 1);
        assert_eq!(scheduler.route_of(&mmsi).unwrap().1.name, "Antwerp");
        assert_eq!(scheduler.vessel(&mmsi).unwrap().voyage().unwrap().speed_knots, 12.0);
    }

    #[test]
    fn test_empty_catalog_reports_no_ports() {
        let mut scheduler = BroadcastScheduler::new(
            SchedulerConfig::default(),
            PortCatalog::new(Vec::new()),
            BroadcastHub::new(8),
        );
        assert!(matches!(scheduler.add_vessel("123456789", 15.0), Err(SchedulerError::NoPorts)));
    }
}
