use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::EngineStatus;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A point-in-time view of the host, the engine and the panel process.
///
/// The serialized field names are consumed by the panel UI and must not change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// When the snapshot was taken. Used only to compute rates against the next sample.
    #[serde(skip)]
    pub t: DateTime<Utc>,

    /// Global CPU usage in percent.
    pub cpu: f64,

    /// Physical core count.
    pub cpu_cores: usize,

    /// Logical processor count.
    pub logical_pro: usize,

    /// Frequency of the first CPU in MHz.
    pub cpu_speed_mhz: f64,

    /// Memory in bytes.
    pub mem: Usage,

    /// Swap in bytes.
    pub swap: Usage,

    /// Space on the root filesystem in bytes.
    pub disk: Usage,

    /// The engine process.
    pub xray: EngineStatus,

    /// Host uptime in seconds.
    pub uptime: u64,

    /// The 1, 5 and 15 minute load averages.
    pub loads: [f64; 3],

    /// Open TCP sockets.
    pub tcp_count: usize,

    /// Open UDP sockets.
    pub udp_count: usize,

    /// Network throughput in bytes per second since the previous sample.
    #[serde(rename = "netIO")]
    pub net_io: NetIo,

    /// Network byte counters since boot.
    pub net_traffic: NetTraffic,

    /// The host's public addresses.
    #[serde(rename = "publicIP")]
    pub public_ip: PublicIp,

    /// The panel process itself.
    pub app_stats: AppStats,
}

/// Used and total amounts of a resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// The amount in use.
    pub current: u64,

    /// The total amount.
    pub total: u64,
}

/// Throughput in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetIo {
    /// Outgoing.
    pub up: u64,

    /// Incoming.
    pub down: u64,
}

/// Cumulative byte counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetTraffic {
    /// Bytes sent.
    pub sent: u64,

    /// Bytes received.
    pub recv: u64,
}

/// Public addresses, or the unavailable sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIp {
    /// The IPv4 address.
    pub ipv4: String,

    /// The IPv6 address.
    pub ipv6: String,
}

/// Resource use of the panel process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStats {
    /// Thread count.
    pub threads: u64,

    /// Resident memory in bytes.
    pub mem: u64,

    /// Seconds since the process started.
    pub uptime: u64,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The per-second rate between two readings of a monotonic counter.
///
/// A counter that went backwards (interface reset, reboot) yields zero, as does a non-positive
/// interval.
pub fn compute_rate(previous: u64, current: u64, elapsed_secs: f64) -> u64 {
    if elapsed_secs <= 0.0 {
        return 0;
    }

    (current.saturating_sub(previous) as f64 / elapsed_secs) as u64
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_rate() {
        assert_eq!(compute_rate(1000, 1500, 1.0), 500);
        assert_eq!(compute_rate(1000, 1500, 2.0), 250);
        assert_eq!(compute_rate(0, 10, 3.0), 3);
    }

    #[test]
    fn test_compute_rate_clamps_counter_reset() {
        assert_eq!(compute_rate(1500, 1000, 1.0), 0);
        assert_eq!(compute_rate(u64::MAX, 0, 1.0), 0);
    }

    #[test]
    fn test_compute_rate_requires_positive_interval() {
        assert_eq!(compute_rate(1000, 1500, 0.0), 0);
        assert_eq!(compute_rate(1000, 1500, -1.0), 0);
    }

    #[test]
    fn test_status_snapshot_wire_names() -> anyhow::Result<()> {
        let value = serde_json::to_value(StatusSnapshot::default())?;
        let object = value.as_object().expect("snapshot serializes to an object");

        for key in [
            "cpu",
            "cpuCores",
            "logicalPro",
            "cpuSpeedMhz",
            "mem",
            "swap",
            "disk",
            "xray",
            "uptime",
            "loads",
            "tcpCount",
            "udpCount",
            "netIO",
            "netTraffic",
            "publicIP",
            "appStats",
        ] {
            assert!(object.contains_key(key), "missing {key}");
        }
        assert!(!object.contains_key("t"));

        assert_eq!(value["xray"]["state"], "stop");
        assert!(value["xray"].get("errorMsg").is_some());
        assert!(value["netTraffic"].get("recv").is_some());
        assert!(value["publicIP"].get("ipv6").is_some());

        Ok(())
    }
}
