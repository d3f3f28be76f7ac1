//! Per-PID polling scheduler.
//!
//! One loop ticks every 10 ms, dispatching a request for each enabled
//! entry whose interval has elapsed. Deliberately monotonic: no catch-up
//! burst after a pause — the next dispatch happens on the first eligible
//! tick and stamps the actual dispatch time.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, watch};

/// Scheduler tick period, bounding dispatch jitter.
pub const TICK: Duration = Duration::from_millis(10);

/// Allowed polling interval bounds in milliseconds.
pub const MIN_INTERVAL_MS: u64 = 100;
pub const MAX_INTERVAL_MS: u64 = 5000;

/// A request emitted through the poller sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidRequest {
    pub pid: u8,
    pub name: String,
}

/// Control operations applied on the poller's own loop.
#[derive(Debug, Clone)]
pub enum PollerCommand {
    Enable(u8),
    Disable(u8),
    SetInterval { pid: u8, interval_ms: u64 },
    Add { pid: u8, name: String, interval_ms: u64 },
    Remove(u8),
}

/// One scheduled PID.
#[derive(Debug, Clone)]
pub struct PidScheduleEntry {
    pub pid: u8,
    pub name: String,
    pub interval: Duration,
    pub enabled: bool,
    last_dispatch: Option<Instant>,
}

impl PidScheduleEntry {
    pub fn new(pid: u8, name: impl Into<String>, interval_ms: u64, enabled: bool) -> Self {
        Self {
            pid,
            name: name.into(),
            interval: Duration::from_millis(interval_ms),
            enabled,
            last_dispatch: None,
        }
    }

    fn due(&self, now: Instant) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_dispatch {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        }
    }
}

/// Snapshot of scheduler state.
#[derive(Debug, Clone, Serialize)]
pub struct PollerStats {
    pub total_pids: usize,
    pub enabled_pids: usize,
    pub disabled_pids: usize,
}

/// The scheduling loop state. Owned by its task; mutated only through
/// queued [`PollerCommand`]s.
pub struct Poller {
    entries: Vec<PidScheduleEntry>,
}

impl Poller {
    pub fn new(entries: Vec<PidScheduleEntry>) -> Self {
        tracing::info!(pid_count = entries.len(), "initialized PID poller");
        Self { entries }
    }

    /// Apply one control command. Returns false if rejected.
    pub fn apply(&mut self, command: PollerCommand) -> bool {
        match command {
            PollerCommand::Enable(pid) => {
                if let Some(entry) = self.entry_mut(pid) {
                    entry.enabled = true;
                    tracing::info!(pid = %format!("0x{pid:02X}"), "enabled PID");
                    true
                } else {
                    false
                }
            }
            PollerCommand::Disable(pid) => {
                if let Some(entry) = self.entry_mut(pid) {
                    entry.enabled = false;
                    tracing::info!(pid = %format!("0x{pid:02X}"), "disabled PID");
                    true
                } else {
                    false
                }
            }
            PollerCommand::SetInterval { pid, interval_ms } => {
                if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&interval_ms) {
                    tracing::error!(
                        interval_ms,
                        "rejected interval outside [{MIN_INTERVAL_MS}, {MAX_INTERVAL_MS}]"
                    );
                    return false;
                }
                if let Some(entry) = self.entry_mut(pid) {
                    entry.interval = Duration::from_millis(interval_ms);
                    tracing::info!(pid = %format!("0x{pid:02X}"), interval_ms, "set PID interval");
                    true
                } else {
                    false
                }
            }
            PollerCommand::Add { pid, name, interval_ms } => {
                if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&interval_ms) {
                    tracing::error!(
                        interval_ms,
                        "rejected interval outside [{MIN_INTERVAL_MS}, {MAX_INTERVAL_MS}]"
                    );
                    return false;
                }
                if self.entry_mut(pid).is_some() {
                    tracing::warn!(pid = %format!("0x{pid:02X}"), "PID already scheduled");
                    return false;
                }
                tracing::info!(pid = %format!("0x{pid:02X}"), name = %name, interval_ms, "added PID");
                self.entries
                    .push(PidScheduleEntry::new(pid, name, interval_ms, true));
                true
            }
            PollerCommand::Remove(pid) => {
                let before = self.entries.len();
                self.entries.retain(|e| e.pid != pid);
                let removed = self.entries.len() < before;
                if removed {
                    tracing::info!(pid = %format!("0x{pid:02X}"), "removed PID");
                }
                removed
            }
        }
    }

    /// Collect requests due at `now`, stamping their dispatch time.
    pub fn due(&mut self, now: Instant) -> Vec<PidRequest> {
        let mut requests = Vec::new();
        for entry in &mut self.entries {
            if entry.due(now) {
                entry.last_dispatch = Some(now);
                requests.push(PidRequest {
                    pid: entry.pid,
                    name: entry.name.clone(),
                });
            }
        }
        requests
    }

    pub fn stats(&self) -> PollerStats {
        let enabled = self.entries.iter().filter(|e| e.enabled).count();
        PollerStats {
            total_pids: self.entries.len(),
            enabled_pids: enabled,
            disabled_pids: self.entries.len() - enabled,
        }
    }

    fn entry_mut(&mut self, pid: u8) -> Option<&mut PidScheduleEntry> {
        self.entries.iter_mut().find(|e| e.pid == pid)
    }

    /// Run the scheduling loop until shutdown.
    ///
    /// Dispatches through `sink`; control commands arrive on `commands`
    /// and are drained at each tick, so all mutation happens on this task.
    pub async fn run(
        mut self,
        sink: mpsc::Sender<PidRequest>,
        mut commands: mpsc::Receiver<PollerCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!("PID poller started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    while let Ok(command) = commands.try_recv() {
                        self.apply(command);
                    }
                    for request in self.due(Instant::now()) {
                        tracing::debug!(
                            pid = %format!("0x{:02X}", request.pid),
                            name = %request.name,
                            "dispatching PID request"
                        );
                        if sink.send(request).await.is_err() {
                            tracing::warn!("poller sink closed, stopping");
                            return;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("PID poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poller() -> Poller {
        Poller::new(vec![
            PidScheduleEntry::new(0x0C, "engine_rpm", 100, true),
            PidScheduleEntry::new(0x0D, "vehicle_speed", 500, true),
            PidScheduleEntry::new(0x05, "coolant_temp", 1000, false),
        ])
    }

    #[test]
    fn first_tick_dispatches_enabled_entries() {
        let mut p = poller();
        let requests = p.due(Instant::now());
        let pids: Vec<u8> = requests.iter().map(|r| r.pid).collect();
        assert_eq!(pids, vec![0x0C, 0x0D]);
    }

    #[test]
    fn entry_not_due_before_interval() {
        let mut p = poller();
        let start = Instant::now();
        p.due(start);

        assert!(p.due(start + Duration::from_millis(50)).is_empty());

        let pids: Vec<u8> = p
            .due(start + Duration::from_millis(110))
            .iter()
            .map(|r| r.pid)
            .collect();
        assert_eq!(pids, vec![0x0C]);
    }

    #[test]
    fn no_catch_up_burst_after_pause() {
        let mut p = poller();
        let start = Instant::now();
        p.due(start);

        // A 10-interval pause yields exactly one dispatch, stamped at the
        // actual dispatch time.
        let resumed = start + Duration::from_millis(1000);
        assert_eq!(p.due(resumed).len(), 2);
        assert!(p.due(resumed + Duration::from_millis(50)).is_empty());
    }

    #[test]
    fn enable_disable() {
        let mut p = poller();
        assert!(p.apply(PollerCommand::Enable(0x05)));
        let pids: Vec<u8> = p.due(Instant::now()).iter().map(|r| r.pid).collect();
        assert!(pids.contains(&0x05));

        assert!(p.apply(PollerCommand::Disable(0x0C)));
        assert_eq!(p.stats().disabled_pids, 1);
        assert!(!p.apply(PollerCommand::Enable(0x99)));
    }

    #[test]
    fn set_interval_bounds() {
        let mut p = poller();
        assert!(p.apply(PollerCommand::SetInterval { pid: 0x0C, interval_ms: 250 }));
        assert!(!p.apply(PollerCommand::SetInterval { pid: 0x0C, interval_ms: 50 }));
        assert!(!p.apply(PollerCommand::SetInterval { pid: 0x0C, interval_ms: 6000 }));
        assert!(!p.apply(PollerCommand::SetInterval { pid: 0x99, interval_ms: 250 }));
    }

    #[test]
    fn add_and_remove() {
        let mut p = poller();
        assert!(p.apply(PollerCommand::Add {
            pid: 0x10,
            name: "maf_flow_rate".into(),
            interval_ms: 200,
        }));
        assert_eq!(p.stats().total_pids, 4);

        // Duplicate add rejected.
        assert!(!p.apply(PollerCommand::Add {
            pid: 0x10,
            name: "maf_flow_rate".into(),
            interval_ms: 200,
        }));

        assert!(p.apply(PollerCommand::Remove(0x10)));
        assert_eq!(p.stats().total_pids, 3);
        assert!(!p.apply(PollerCommand::Remove(0x10)));
    }

    #[test]
    fn add_rejects_out_of_range_interval() {
        let mut p = poller();
        assert!(!p.apply(PollerCommand::Add {
            pid: 0x10,
            name: "maf_flow_rate".into(),
            interval_ms: 10,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn run_dispatches_on_schedule() {
        let p = Poller::new(vec![PidScheduleEntry::new(0x0C, "engine_rpm", 100, true)]);
        let (sink_tx, mut sink_rx) = mpsc::channel(64);
        let (_cmd_tx, cmd_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(p.run(sink_tx, cmd_rx, shutdown_rx));

        // Advance virtual time past two intervals.
        tokio::time::sleep(Duration::from_millis(250)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let mut received = Vec::new();
        while let Ok(req) = sink_rx.try_recv() {
            received.push(req.pid);
        }
        // First eligible tick plus two elapsed intervals.
        assert!(received.len() >= 2, "got {} dispatches", received.len());
        assert!(received.iter().all(|&pid| pid == 0x0C));
    }

    #[tokio::test(start_paused = true)]
    async fn run_applies_queued_commands() {
        let p = Poller::new(vec![PidScheduleEntry::new(0x0C, "engine_rpm", 100, true)]);
        let (sink_tx, mut sink_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        cmd_tx.send(PollerCommand::Disable(0x0C)).await.unwrap();
        let handle = tokio::spawn(p.run(sink_tx, cmd_rx, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(sink_rx.try_recv().is_err(), "disabled PID must not dispatch");
    }
}
