use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::{
    apply_replicated_event, reference_order, ClockSync, ClockSyncExchange, ClusterError, ElectionEngine,
    ElectionOutcome, ElectionSettings, HeartbeatMonitor, LoadGauge, NodeDirectory, NodeId,
    ReplicationDispatcher, ReplicationEvent, ReplicationReport, SlotUnavailable, StatusReporter,
};
use crate::common::Clock;
use crate::config::{Config, TimingConfig};
use crate::network::{
    Ack, ClockResponse, ClockSyncRequest, ClockSyncResponse, ElectionRequest, HealthResponse,
    LeaderResponse, LeaderUpdate, NewBooking, PeerTransport, ServersResponse,
    SimulateLoadRequest, SimulateLoadResponse,
};
use crate::store::{Booking, BookingStore, ServerStore};

/// One cluster member: every component of the coordination layer wired
/// around a shared directory, transport and store.
pub struct ClusterNode {
    id: NodeId,
    directory: Arc<NodeDirectory>,
    transport: Arc<dyn PeerTransport>,
    servers: Arc<dyn ServerStore>,
    bookings: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    timing: TimingConfig,
    election: ElectionEngine,
    clock_sync: Arc<ClockSync>,
    heartbeat: Arc<HeartbeatMonitor>,
    dispatcher: ReplicationDispatcher,
    reporter: StatusReporter,
    gauge: Arc<LoadGauge>,
}

impl ClusterNode {
    pub fn new(
        config: &Config,
        transport: Arc<dyn PeerTransport>,
        servers: Arc<dyn ServerStore>,
        bookings: Arc<dyn BookingStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let id = config.node_id;
        let timing = config.timing.clone();
        let directory = Arc::new(config.directory());
        let gauge = Arc::new(LoadGauge::default());

        let election = ElectionEngine::new(
            id,
            Arc::clone(&directory),
            Arc::clone(&transport),
            Arc::clone(&servers),
            Arc::clone(&clock),
            ElectionSettings::from(&timing),
        );
        let clock_sync = Arc::new(ClockSync::new(id, Arc::clone(&clock)));
        let heartbeat = Arc::new(HeartbeatMonitor::new(
            id,
            Arc::clone(&directory),
            Arc::clone(&transport),
            Arc::clone(&servers),
            Arc::clone(&clock),
            election.reader(),
            Arc::clone(&gauge),
            Duration::from_millis(timing.health_timeout),
        ));
        let dispatcher = ReplicationDispatcher::new(
            id,
            Arc::clone(&directory),
            Arc::clone(&transport),
            Duration::from_millis(timing.replication_timeout),
            timing.replication_concurrency,
        );
        let reporter = StatusReporter::new(
            id,
            Arc::clone(&directory),
            Arc::clone(&servers),
            Arc::clone(&clock),
            election.reader(),
            Arc::clone(&clock_sync),
            Arc::clone(&heartbeat),
            Arc::clone(&gauge),
            timing.stale_after as i64,
        );

        Self {
            id,
            directory,
            transport,
            servers,
            bookings,
            clock,
            timing,
            election,
            clock_sync,
            heartbeat,
            dispatcher,
            reporter,
            gauge,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn directory(&self) -> &NodeDirectory {
        &self.directory
    }

    pub fn election(&self) -> &ElectionEngine {
        &self.election
    }

    pub fn clock_sync(&self) -> &ClockSync {
        &self.clock_sync
    }

    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    pub fn gauge(&self) -> &Arc<LoadGauge> {
        &self.gauge
    }

    pub fn bookings(&self) -> &Arc<dyn BookingStore> {
        &self.bookings
    }

    /// Spawn the heartbeat, probe and clock-sync loops plus one startup
    /// election after a jittered delay.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(
            "Starting node {} with {} members",
            self.id,
            self.directory.len()
        );
        let mut handles = self.heartbeat.spawn(
            Duration::from_millis(self.timing.heartbeat_interval),
            Duration::from_millis(self.timing.probe_interval),
        );

        let node = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(node.timing.clock_sync_interval));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; give the election a head start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = node.sync_clock_once().await {
                    warn!("Node {} clock sync skipped: {}", node.id, e);
                }
            }
        }));

        let node = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let base = node.timing.startup_election_delay;
            let jitter = rand::rng().random_range(0..=base / 2);
            tokio::time::sleep(Duration::from_millis(base + jitter)).await;
            node.election.initiate_election().await;
        }));

        handles
    }

    pub async fn handle_election(&self, request: ElectionRequest) -> Ack {
        self.election.on_election_message(request.candidate_id).await
    }

    pub async fn handle_leader_update(&self, update: LeaderUpdate) -> Ack {
        self.election.on_leader_update(update.new_leader_id).await
    }

    pub fn handle_clock_sync(&self, request: ClockSyncRequest) -> ClockSyncResponse {
        self.clock_sync.respond(request.client_time)
    }

    pub async fn handle_replicated(&self, event: ReplicationEvent) -> Ack {
        match apply_replicated_event(self.bookings.as_ref(), &event).await {
            Ok(()) => Ack::ok(),
            Err(e) => {
                error!(
                    "Node {} failed to apply replicated {} event: {}",
                    self.id,
                    event.label(),
                    e
                );
                Ack::with_message(false, e.to_string())
            }
        }
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            server_id: self.id,
            port: self
                .directory
                .get(self.id)
                .and_then(|n| n.port())
                .unwrap_or(0),
            timestamp: self.clock_sync.adjusted_now(),
        }
    }

    pub async fn servers(&self) -> ServersResponse {
        ServersResponse {
            data: self.reporter.snapshot().await,
            server: self.id,
            timestamp: self.clock_sync.adjusted_now(),
        }
    }

    pub async fn leader(&self) -> LeaderResponse {
        let view = self.election.view().await;
        LeaderResponse {
            leader_id: view.leader_id,
            self_id: self.id,
            role: view.role,
        }
    }

    pub fn clock_status(&self) -> ClockResponse {
        let local_time = self.clock_sync.local_time();
        let offset_ms = self.clock_sync.offset_ms();
        ClockResponse {
            local_time,
            offset_ms,
            adjusted_time: local_time + offset_ms,
        }
    }

    pub async fn trigger_election(&self) -> ElectionOutcome {
        self.election.initiate_election().await
    }

    /// Sync against the leader (or the first peer that answers). The leader
    /// itself is the reference and keeps its offset.
    pub async fn sync_clock_once(&self) -> Result<Option<ClockSyncExchange>, ClusterError> {
        let view = self.election.view().await;
        if view.leader_id == Some(self.id) {
            return Ok(None);
        }

        let candidates = reference_order(&self.directory, self.id, view.leader_id);
        let (_, exchange) = self
            .clock_sync
            .sync_with_reference(
                self.transport.as_ref(),
                &candidates,
                Duration::from_millis(self.timing.clock_sync_timeout),
            )
            .await?;

        if let Err(e) = self
            .servers
            .record_clock_offset(self.id, self.clock_sync.offset_ms())
            .await
        {
            warn!("Node {} could not record clock offset: {}", self.id, e);
        }
        Ok(Some(exchange))
    }

    /// Commit a booking locally, then replicate it. Only the local write can
    /// fail the call.
    pub async fn create_booking(
        &self,
        request: NewBooking,
    ) -> Result<(Booking, ReplicationReport), ClusterError> {
        let _connection = self.gauge.track();
        let booking = Booking {
            doctor_id: request.doctor_id,
            patient_name: request.patient_name,
            slot_time: request.slot_time,
            confirmation_id: confirmation_id(),
            booking_timestamp: self.clock_sync.adjusted_now(),
            origin_server_id: self.id,
        };

        self.bookings.insert_booking(booking.clone()).await?;
        self.bookings
            .mark_slot_unavailable(booking.doctor_id, &booking.slot_time)
            .await?;
        info!(
            "Node {} booked doctor {} at {} ({})",
            self.id, booking.doctor_id, booking.slot_time, booking.confirmation_id
        );

        let report = self
            .dispatcher
            .replicate(ReplicationEvent::BookingCreated(booking.clone()))
            .await;
        let slot_report = self
            .dispatcher
            .replicate(ReplicationEvent::SlotMarkedUnavailable(SlotUnavailable {
                doctor_id: booking.doctor_id,
                slot_time: booking.slot_time.clone(),
            }))
            .await;
        if !slot_report.is_complete() {
            warn!(
                "Slot update for booking {} reached {} of {} peers",
                booking.confirmation_id,
                slot_report.delivered.len(),
                self.directory.len() - 1
            );
        }

        Ok((booking, report))
    }

    pub async fn mark_slot_unavailable(
        &self,
        slot: SlotUnavailable,
    ) -> Result<ReplicationReport, ClusterError> {
        self.bookings
            .mark_slot_unavailable(slot.doctor_id, &slot.slot_time)
            .await?;
        Ok(self
            .dispatcher
            .replicate(ReplicationEvent::SlotMarkedUnavailable(slot))
            .await)
    }

    pub async fn replicate(&self, event: ReplicationEvent) -> ReplicationReport {
        self.dispatcher.replicate(event).await
    }

    pub async fn simulate_load(&self, request: SimulateLoadRequest) -> SimulateLoadResponse {
        let report = self
            .gauge
            .simulate_batch(request.tasks, Duration::from_millis(request.work_ms))
            .await;
        SimulateLoadResponse {
            completed: report.completed,
            peak_connections: report.peak_connections,
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}

fn confirmation_id() -> String {
    format!("CONF-{:08X}", rand::rng().random::<u32>())
}
