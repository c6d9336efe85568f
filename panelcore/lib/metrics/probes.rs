use std::path::Path;

use sysinfo::{Disks, Networks, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::{
    metrics::{AppStats, NetTraffic, Usage},
    PanelcoreError, PanelcoreResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const TCP_TABLES: [&str; 2] = ["/proc/net/tcp", "/proc/net/tcp6"];

const UDP_TABLES: [&str; 2] = ["/proc/net/udp", "/proc/net/udp6"];

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Global CPU usage in percent and the first CPU's frequency in MHz.
pub(super) fn cpu(sys: &mut System) -> PanelcoreResult<(f64, f64)> {
    sys.refresh_cpu_all();

    let frequency = sys
        .cpus()
        .first()
        .map(|cpu| cpu.frequency() as f64)
        .ok_or_else(|| probe_error("cpu", "no cpu reported"))?;

    Ok((sys.global_cpu_usage() as f64, frequency))
}

/// Physical and logical core counts. Expects [`cpu`] to have populated the CPU list.
pub(super) fn cores(sys: &System) -> PanelcoreResult<(usize, usize)> {
    let physical = System::physical_core_count()
        .ok_or_else(|| probe_error("cpu_cores", "physical core count unavailable"))?;

    let logical = sys.cpus().len();
    if logical == 0 {
        return Err(probe_error("logical_pro", "no cpu reported"));
    }

    Ok((physical, logical))
}

/// Memory and swap usage in bytes.
pub(super) fn memory(sys: &mut System) -> (Usage, Usage) {
    sys.refresh_memory();

    let mem = Usage {
        current: sys.used_memory(),
        total: sys.total_memory(),
    };
    let swap = Usage {
        current: sys.used_swap(),
        total: sys.total_swap(),
    };

    (mem, swap)
}

/// Used and total space on the filesystem mounted at `/`.
pub(super) fn root_disk() -> PanelcoreResult<Usage> {
    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .ok_or_else(|| probe_error("disk", "no filesystem mounted at /"))?;

    Ok(Usage {
        current: root.total_space().saturating_sub(root.available_space()),
        total: root.total_space(),
    })
}

/// The 1, 5 and 15 minute load averages.
pub(super) fn loads() -> [f64; 3] {
    let load = System::load_average();
    [load.one, load.five, load.fifteen]
}

/// Bytes sent and received on every interface since boot.
pub(super) fn network_totals() -> NetTraffic {
    let networks = Networks::new_with_refreshed_list();

    networks
        .iter()
        .fold(NetTraffic::default(), |traffic, (_, data)| NetTraffic {
            sent: traffic.sent + data.total_transmitted(),
            recv: traffic.recv + data.total_received(),
        })
}

/// Resource use of the current process.
pub(super) fn app_stats(sys: &mut System) -> PanelcoreResult<AppStats> {
    let pid = sysinfo::get_current_pid().map_err(|e| probe_error("app_stats", e))?;

    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_memory().with_tasks(),
    );

    let process = sys
        .process(pid)
        .ok_or_else(|| probe_error("app_stats", "current process not found"))?;

    let threads = process
        .tasks()
        .map(|tasks| tasks.len() as u64)
        .filter(|count| *count > 0)
        .unwrap_or(1);

    Ok(AppStats {
        threads,
        mem: process.memory(),
        uptime: process.run_time(),
    })
}

/// Open TCP sockets across IPv4 and IPv6.
pub(super) async fn tcp_count() -> PanelcoreResult<usize> {
    socket_count("tcp_count", &TCP_TABLES).await
}

/// Open UDP sockets across IPv4 and IPv6.
pub(super) async fn udp_count() -> PanelcoreResult<usize> {
    socket_count("udp_count", &UDP_TABLES).await
}

#[cfg(target_os = "linux")]
async fn socket_count(probe: &'static str, tables: &[&str]) -> PanelcoreResult<usize> {
    let mut total = 0;
    for table in tables {
        match tokio::fs::read_to_string(table).await {
            Ok(contents) => total += count_socket_entries(&contents),
            // The IPv6 tables are absent when IPv6 is disabled.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && table.ends_with('6') => {}
            Err(e) => return Err(probe_error(probe, format!("{}: {}", table, e))),
        }
    }

    Ok(total)
}

#[cfg(not(target_os = "linux"))]
async fn socket_count(probe: &'static str, _tables: &[&str]) -> PanelcoreResult<usize> {
    Err(probe_error(probe, "socket tables are only read on linux"))
}

/// Counts the socket rows of a `/proc/net` table, skipping its header.
fn count_socket_entries(contents: &str) -> usize {
    contents
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .count()
}

fn probe_error(probe: &'static str, reason: impl ToString) -> PanelcoreError {
    PanelcoreError::Probe {
        probe,
        reason: reason.to_string(),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_socket_entries_skips_header() {
        let table = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n\
                     0: 0100007F:0CEA 00000000:0000 0A 00000000:00000000 00:00000000 00000000   999        0 20391 1\n\
                     1: 00000000:0016 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 18462 1\n";

        assert_eq!(count_socket_entries(table), 2);
        assert_eq!(count_socket_entries("  sl  local_address\n"), 0);
        assert_eq!(count_socket_entries(""), 0);
    }

    #[test]
    fn test_memory_reports_totals() {
        let mut sys = System::new();
        let (mem, swap) = memory(&mut sys);

        assert!(mem.total > 0);
        assert!(mem.current <= mem.total);
        assert!(swap.current <= swap.total);
    }

    #[test]
    fn test_app_stats_reports_current_process() -> anyhow::Result<()> {
        let mut sys = System::new();
        let stats = app_stats(&mut sys)?;

        assert!(stats.threads >= 1);
        assert!(stats.mem > 0);

        Ok(())
    }
}
