use std::sync::{Arc, Mutex};

use chrono::Utc;
use sysinfo::System;

use crate::{
    engine::EngineSupervisor,
    metrics::{compute_rate, probes, IpFamily, NetIo, PublicIp, PublicIpCache, StatusSnapshot},
    PanelcoreResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Produces [`StatusSnapshot`]s on demand.
///
/// The collector keeps one `sysinfo` handle across samples so CPU usage is measured over the
/// interval between consecutive calls.
#[derive(Debug)]
pub struct MetricsCollector {
    system: Mutex<System>,
    supervisor: Arc<EngineSupervisor>,
    public_ip: Arc<PublicIpCache>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MetricsCollector {
    /// Creates a collector that reads engine state from `supervisor`.
    pub fn new(supervisor: Arc<EngineSupervisor>, public_ip: Arc<PublicIpCache>) -> Self {
        Self {
            system: Mutex::new(System::new()),
            supervisor,
            public_ip,
        }
    }

    /// Takes a snapshot.
    ///
    /// Throughput is computed against `previous` when it is strictly older than this sample,
    /// otherwise it is zero. Probe failures are logged and leave their fields at zero.
    pub async fn sample(&self, previous: Option<&StatusSnapshot>) -> StatusSnapshot {
        let mut snapshot = StatusSnapshot {
            t: Utc::now(),
            ..Default::default()
        };

        self.sample_host(&mut snapshot);

        let (tcp_count, udp_count, ipv4, ipv6, xray) = tokio::join!(
            probes::tcp_count(),
            probes::udp_count(),
            self.public_ip.get(IpFamily::V4),
            self.public_ip.get(IpFamily::V6),
            self.supervisor.status(),
        );

        snapshot.tcp_count = or_zero("tcp_count", tcp_count);
        snapshot.udp_count = or_zero("udp_count", udp_count);
        snapshot.public_ip = PublicIp { ipv4, ipv6 };
        snapshot.xray = xray;

        if let Some(previous) = previous.filter(|previous| previous.t < snapshot.t) {
            let elapsed = (snapshot.t - previous.t).num_milliseconds() as f64 / 1000.0;
            snapshot.net_io = NetIo {
                up: compute_rate(
                    previous.net_traffic.sent,
                    snapshot.net_traffic.sent,
                    elapsed,
                ),
                down: compute_rate(
                    previous.net_traffic.recv,
                    snapshot.net_traffic.recv,
                    elapsed,
                ),
            };
        }

        snapshot
    }

    fn sample_host(&self, snapshot: &mut StatusSnapshot) {
        let Ok(mut sys) = self.system.lock() else {
            tracing::warn!("system handle poisoned, skipping host probes");
            return;
        };

        (snapshot.cpu, snapshot.cpu_speed_mhz) = or_zero("cpu", probes::cpu(&mut sys));
        (snapshot.cpu_cores, snapshot.logical_pro) = or_zero("cpu_cores", probes::cores(&sys));
        (snapshot.mem, snapshot.swap) = probes::memory(&mut sys);
        snapshot.disk = or_zero("disk", probes::root_disk());
        snapshot.app_stats = or_zero("app_stats", probes::app_stats(&mut sys));
        snapshot.uptime = System::uptime();
        snapshot.loads = probes::loads();
        snapshot.net_traffic = probes::network_totals();
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn or_zero<T: Default>(probe: &'static str, result: PanelcoreResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(probe, error = %e, "metrics probe failed");
            T::default()
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
