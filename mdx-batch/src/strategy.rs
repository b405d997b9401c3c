//! Execution strategy and worker pool sizing
//!
//! The strategy is chosen once per batch from the `multiprocess` option and a
//! [`ResourcePolicy`]; it is never probed at runtime.

use mdx_common::config::BatchConfig;
use std::fmt;
use std::num::NonZeroUsize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// One file at a time, in input order
    Sequential,
    /// Up to N files in flight
    WorkerPool(NonZeroUsize),
}

impl ExecutionStrategy {
    pub fn choose(multiprocess: bool, policy: &ResourcePolicy) -> Self {
        if multiprocess {
            ExecutionStrategy::WorkerPool(policy.pool_size())
        } else {
            ExecutionStrategy::Sequential
        }
    }

    /// Files allowed in flight at once
    pub fn concurrency(&self) -> usize {
        match self {
            ExecutionStrategy::Sequential => 1,
            ExecutionStrategy::WorkerPool(n) => n.get(),
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStrategy::Sequential => f.write_str("sequential"),
            ExecutionStrategy::WorkerPool(n) => write!(f, "worker_pool({})", n),
        }
    }
}

/// Limits used to size the worker pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePolicy {
    pub cpu_count: usize,
    /// Accelerator memory available to analysis, MiB
    pub accelerator_memory_mb: Option<u64>,
    /// Accelerator memory one job needs, MiB
    pub memory_per_job_mb: Option<u64>,
    pub max_workers: Option<usize>,
}

impl ResourcePolicy {
    /// Current host CPU count plus configured limits
    pub fn detect(config: &BatchConfig) -> Self {
        Self {
            cpu_count: num_cpus::get(),
            accelerator_memory_mb: config.accelerator_memory_mb,
            memory_per_job_mb: config.memory_per_job_mb,
            max_workers: config.max_workers,
        }
    }

    /// min(CPUs, accelerator memory / per-job memory, hard cap), at least 1
    pub fn pool_size(&self) -> NonZeroUsize {
        let mut size = self.cpu_count;

        if let (Some(total), Some(per_job)) = (self.accelerator_memory_mb, self.memory_per_job_mb) {
            if per_job > 0 {
                let fits = usize::try_from(total / per_job).unwrap_or(usize::MAX);
                size = size.min(fits);
            }
        }
        if let Some(cap) = self.max_workers {
            size = size.min(cap);
        }

        NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(cpu: usize) -> ResourcePolicy {
        ResourcePolicy {
            cpu_count: cpu,
            accelerator_memory_mb: None,
            memory_per_job_mb: None,
            max_workers: None,
        }
    }

    #[test]
    fn test_sequential_without_multiprocess() {
        let strategy = ExecutionStrategy::choose(false, &policy(16));
        assert_eq!(strategy, ExecutionStrategy::Sequential);
        assert_eq!(strategy.concurrency(), 1);
        assert_eq!(strategy.to_string(), "sequential");
    }

    #[test]
    fn test_pool_bounded_by_memory_and_cap() {
        let mut p = policy(16);
        assert_eq!(p.pool_size().get(), 16);

        p.accelerator_memory_mb = Some(16_000);
        p.memory_per_job_mb = Some(6_000);
        assert_eq!(p.pool_size().get(), 2);

        p.max_workers = Some(1);
        assert_eq!(p.pool_size().get(), 1);
    }

    #[test]
    fn test_pool_never_empty() {
        let mut p = policy(8);
        p.accelerator_memory_mb = Some(1_000);
        p.memory_per_job_mb = Some(6_000);
        assert_eq!(p.pool_size().get(), 1);
        assert_eq!(
            ExecutionStrategy::choose(true, &p).to_string(),
            "worker_pool(1)"
        );
    }
}
