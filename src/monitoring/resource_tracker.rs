// Process resource sampling for the monitoring scheduler
// CPU and memory of the current process, as percentages of the host

use super::metrics::ResourceUsage;
use crate::utils::error::{MonitorError, Result};
use std::sync::{Mutex, PoisonError};
use sysinfo::{CpuExt, Pid, ProcessExt, System, SystemExt};
use tracing::debug;

/// Source of resource usage samples
pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> Result<ResourceUsage>;
}

/// Samples the current process through `sysinfo`
pub struct ResourceTracker {
    system: Mutex<System>,
    pid: Pid,
}

impl ResourceTracker {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| MonitorError::resource(format!("cannot resolve current pid: {}", e)))?;

        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        // Prime the process entry so the first real sample has a CPU delta
        system.refresh_process(pid);

        Ok(Self {
            system: Mutex::new(system),
            pid,
        })
    }
}

impl ResourceProbe for ResourceTracker {
    fn sample(&self) -> Result<ResourceUsage> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();
        if !system.refresh_process(self.pid) {
            return Err(MonitorError::resource(format!(
                "process {} not found",
                self.pid
            )));
        }

        let process = system
            .process(self.pid)
            .ok_or_else(|| MonitorError::resource(format!("process {} not found", self.pid)))?;

        // sysinfo reports per-core percentages that sum past 100 on multi-core hosts
        let cores = system.cpus().len().max(1) as f64;
        let cpu_pct = (f64::from(process.cpu_usage()) / cores).clamp(0.0, 100.0);

        let total_memory = system.total_memory();
        let memory_pct = if total_memory > 0 {
            (process.memory() as f64 / total_memory as f64 * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        debug!(
            cpu_pct,
            memory_pct,
            global_cpu = system.global_cpu_info().cpu_usage(),
            "Sampled process resources"
        );

        Ok(ResourceUsage {
            cpu_pct,
            memory_pct,
        })
    }
}

/// Probe that always reports the same usage
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProbe(pub ResourceUsage);

impl ResourceProbe for FixedProbe {
    fn sample(&self) -> Result<ResourceUsage> {
        Ok(self.0)
    }
}
