// Resource monitor for EchoNote Core
// Samples system memory and CPU against the resource_monitor thresholds;
// the application layer pauses the transcription manager under pressure

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sysinfo::System;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub available_memory_mb: f64,
    pub cpu_percent: f64,
    pub low_memory: bool,
    pub high_cpu: bool,
}

impl ResourceSnapshot {
    pub fn under_pressure(&self) -> bool {
        self.low_memory || self.high_cpu
    }
}

/// Polls system load. Callers sample on their own cadence; the monitor keeps
/// no background thread.
pub struct ResourceMonitor {
    system: Mutex<System>,
    low_memory_mb: f64,
    high_cpu_percent: f64,
}

impl ResourceMonitor {
    pub fn new(low_memory_mb: f64, high_cpu_percent: f64) -> Self {
        Self {
            system: Mutex::new(System::new()),
            low_memory_mb,
            high_cpu_percent,
        }
    }

    pub fn set_thresholds(&mut self, low_memory_mb: f64, high_cpu_percent: f64) {
        self.low_memory_mb = low_memory_mb;
        self.high_cpu_percent = high_cpu_percent;
    }

    pub fn sample(&self) -> ResourceSnapshot {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_memory();
        system.refresh_cpu_usage();

        let available_memory_mb = system.available_memory() as f64 / (1024.0 * 1024.0);
        let cpu_percent = system.global_cpu_usage() as f64;

        ResourceSnapshot {
            available_memory_mb,
            cpu_percent,
            low_memory: available_memory_mb < self.low_memory_mb,
            high_cpu: cpu_percent > self.high_cpu_percent,
        }
    }

    pub fn is_under_pressure(&self) -> bool {
        self.sample().under_pressure()
    }
}
