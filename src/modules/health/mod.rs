//! Host resource checks run before a sweep starts.

use std::path::Path;

use sysinfo::{Disks, System};

/// Alert thresholds, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub min_free_disk_pct: f64,
    pub max_memory_pct: f64,
    pub max_cpu_pct: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_free_disk_pct: 10.0,
            max_memory_pct: 90.0,
            max_cpu_pct: 90.0,
        }
    }
}

/// Produces human-readable alerts about the host. An empty list means healthy.
pub trait HealthProbe: Send + Sync {
    fn check(&self) -> Vec<String>;
}

/// Disk, memory and CPU checks via `sysinfo`.
#[derive(Debug, Clone, Default)]
pub struct SystemHealth {
    thresholds: HealthThresholds,
}

impl SystemHealth {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self { thresholds }
    }

    fn root_disk_free_pct() -> Option<f64> {
        let disks = Disks::new_with_refreshed_list();
        let root = disks
            .list()
            .iter()
            .find(|disk| disk.mount_point() == Path::new("/"))
            .or_else(|| disks.list().first())?;
        let total = root.total_space();
        (total > 0).then(|| root.available_space() as f64 / total as f64 * 100.0)
    }
}

impl HealthProbe for SystemHealth {
    fn check(&self) -> Vec<String> {
        let mut readings = HealthReadings::default();

        readings.disk_free_pct = Self::root_disk_free_pct();
        if readings.disk_free_pct.is_none() {
            log::warn!("could not determine free disk space");
        }

        let mut system = System::new();
        system.refresh_memory();
        let total_memory = system.total_memory();
        if total_memory > 0 {
            readings.memory_pct =
                Some(system.used_memory() as f64 / total_memory as f64 * 100.0);
        }

        system.refresh_cpu_usage();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_cpu_usage();
        readings.cpu_pct = Some(system.global_cpu_usage() as f64);

        readings.alerts(&self.thresholds)
    }
}

/// Raw measurements, kept separate from sampling so the alert rules can be
/// checked without touching the host.
#[derive(Debug, Clone, Copy, Default)]
struct HealthReadings {
    disk_free_pct: Option<f64>,
    memory_pct: Option<f64>,
    cpu_pct: Option<f64>,
}

impl HealthReadings {
    fn alerts(&self, thresholds: &HealthThresholds) -> Vec<String> {
        let mut alerts = Vec::new();

        if let Some(free) = self.disk_free_pct
            && free < thresholds.min_free_disk_pct
        {
            log::warn!("low disk space: {free:.2}% free");
            alerts.push(format!("Low disk space: {free:.2}% free"));
        }

        if let Some(used) = self.memory_pct
            && used > thresholds.max_memory_pct
        {
            log::warn!("high memory usage: {used:.1}%");
            alerts.push(format!("Memory usage high: {used:.1}% in use"));
        }

        if let Some(cpu) = self.cpu_pct
            && cpu > thresholds.max_cpu_pct
        {
            log::warn!("high cpu usage: {cpu:.1}%");
            alerts.push(format!("CPU usage high: {cpu:.1}%"));
        }

        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_readings_raise_nothing() {
        let readings = HealthReadings {
            disk_free_pct: Some(55.0),
            memory_pct: Some(40.0),
            cpu_pct: Some(12.0),
        };
        assert!(readings.alerts(&HealthThresholds::default()).is_empty());
    }

    #[test]
    fn each_breach_raises_one_alert() {
        let readings = HealthReadings {
            disk_free_pct: Some(4.5),
            memory_pct: Some(97.0),
            cpu_pct: Some(99.0),
        };
        let alerts = readings.alerts(&HealthThresholds::default());
        assert_eq!(alerts.len(), 3);
        assert!(alerts[0].contains("4.50%"));
    }

    #[test]
    fn missing_readings_are_ignored() {
        let readings = HealthReadings::default();
        assert!(readings.alerts(&HealthThresholds::default()).is_empty());
    }
}
