//! Process-wide CPU and memory admission control.
//!
//! All concurrently-running tasks' declared reservations are capped to a
//! host budget by a pair of counted semaphores. Reservations larger than
//! the whole budget are downscaled with a warning rather than deadlocking.
//! Permits are always taken CPU-first, so waiters cannot form a cycle.

use crate::run::config::SchedulerConfig;
use std::sync::Arc;
use sysinfo::System;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

const MIB: u64 = 1 << 20;

/// The process-wide admission gate.
pub struct Admission {
    cpu_total: u32,
    memory_total: u64,
    cpu: Arc<Semaphore>,
    /// One permit per MiB.
    memory: Arc<Semaphore>,
}

impl Admission {
    /// Build from configuration, detecting host resources for unset budgets.
    pub fn new(config: &SchedulerConfig) -> Self {
        let (host_cpus, host_memory) = host_resources();
        let cpu_total = config.cpu_budget.unwrap_or(host_cpus).max(1);
        let memory_total = config.memory_budget.unwrap_or(host_memory).max(MIB);
        Self {
            cpu_total,
            memory_total,
            cpu: Arc::new(Semaphore::new(cpu_total as usize)),
            memory: Arc::new(Semaphore::new((memory_total / MIB) as usize)),
        }
    }

    pub fn cpu_total(&self) -> u32 {
        self.cpu_total
    }

    pub fn memory_total(&self) -> u64 {
        self.memory_total
    }

    /// Wait until `cpu` CPUs and `memory` bytes fit in the budget; holds
    /// both until the returned permit drops.
    pub async fn acquire(&self, cpu: u32, memory: u64) -> AdmissionPermit {
        let mut cpu_request = cpu.max(1);
        if cpu_request > self.cpu_total {
            warn!(
                target: "wdlrun::admission",
                requested = cpu_request,
                budget = self.cpu_total,
                "task cpu reservation exceeds host budget; downscaling"
            );
            cpu_request = self.cpu_total;
        }
        let mut memory_request = memory.max(MIB);
        if memory_request > self.memory_total {
            warn!(
                target: "wdlrun::admission",
                requested = memory_request,
                budget = self.memory_total,
                "task memory reservation exceeds host budget; downscaling"
            );
            memory_request = self.memory_total;
        }
        let memory_permits = (memory_request / MIB).max(1) as u32;

        let cpu_permit = Arc::clone(&self.cpu)
            .acquire_many_owned(cpu_request)
            .await
            .expect("admission semaphore closed");
        let memory_permit = Arc::clone(&self.memory)
            .acquire_many_owned(memory_permits)
            .await
            .expect("admission semaphore closed");

        AdmissionPermit {
            _cpu: cpu_permit,
            _memory: memory_permit,
            cpu: cpu_request,
            memory: memory_request,
        }
    }

    /// Non-blocking view of free CPUs, for logging.
    pub fn available_cpus(&self) -> usize {
        self.cpu.available_permits()
    }
}

/// Held resources of one running task attempt.
pub struct AdmissionPermit {
    _cpu: OwnedSemaphorePermit,
    _memory: OwnedSemaphorePermit,
    /// Granted CPU count (after any downscaling).
    pub cpu: u32,
    /// Granted memory in bytes (after any downscaling).
    pub memory: u64,
}

fn host_resources() -> (u32, u64) {
    let mut system = System::new();
    system.refresh_memory();
    system.refresh_cpu_all();
    let cpus = system.cpus().len().max(1) as u32;
    let memory = system.total_memory().max(MIB);
    (cpus, memory)
}
