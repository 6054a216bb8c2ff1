//! Worker thread placement across CPU groups.
//!
//! Placement only decides where workers land at construction time; no
//! scheduling decision depends on it.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::thread;

/// How the pool places its workers at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementPolicy {
    /// No explicit placement. Workers stay wherever the OS puts them. Limited
    /// to 64 workers, the size of a single wait batch at shutdown.
    Unpinned,
    /// Fill each CPU group to its CPU count before moving to the next group;
    /// wraps around when oversubscribed. See [`GreedyPlacement`].
    Greedy,
    /// One worker per CPU group in rotation. See [`RoundRobinPlacement`].
    RoundRobin,
}

/// A strategy that decides which CPU group each worker thread lands on.
///
/// `create_threads` must invoke `for_each_thread(group_index, affinity_mask)`
/// exactly `desired_thread_count` times. `cpu_count_per_group` must name at
/// least one group.
pub trait ThreadPlacement {
    fn create_threads(
        &self,
        desired_thread_count: u32,
        cpu_count_per_group: &[u32],
        for_each_thread: &mut dyn FnMut(usize, u64),
    );
}

/// Fills CPU groups in order: group 0 up to its CPU count, then group 1, and
/// so on. When more threads are requested than CPUs exist, allocation wraps
/// back to group 0 and oversubscribes in the same greedy order.
pub struct GreedyPlacement;

impl ThreadPlacement for GreedyPlacement {
    fn create_threads(
        &self,
        desired_thread_count: u32,
        cpu_count_per_group: &[u32],
        for_each_thread: &mut dyn FnMut(usize, u64),
    ) {
        assert!(
            !cpu_count_per_group.is_empty(),
            "at least one CPU group is required"
        );

        let mut created = 0;

        while created < desired_thread_count {
            for (group_index, &cpu_count) in cpu_count_per_group.iter().enumerate() {
                if created >= desired_thread_count {
                    break;
                }

                let mask = affinity_mask(cpu_count);
                for _ in 0..cpu_count {
                    if created >= desired_thread_count {
                        break;
                    }
                    for_each_thread(group_index, mask);
                    created += 1;
                }
            }
        }
    }
}

/// Rotates over the CPU groups, placing one worker per group per round and
/// skipping groups that are already full. Once every CPU is taken, group
/// capacity is ignored and the rotation continues into oversubscription.
pub struct RoundRobinPlacement;

impl ThreadPlacement for RoundRobinPlacement {
    fn create_threads(
        &self,
        desired_thread_count: u32,
        cpu_count_per_group: &[u32],
        for_each_thread: &mut dyn FnMut(usize, u64),
    ) {
        assert!(
            !cpu_count_per_group.is_empty(),
            "at least one CPU group is required"
        );

        let total_cpu_count: u32 = cpu_count_per_group.iter().sum();
        let mut assigned_per_group = vec![0u32; cpu_count_per_group.len()];

        let mut created = 0;
        let mut group_index = 0;

        while created < desired_thread_count {
            // Place on the current group if it has a free CPU, or once every
            // CPU in the system is already taken (oversubscription).
            if assigned_per_group[group_index] < cpu_count_per_group[group_index]
                || created >= total_cpu_count
            {
                for_each_thread(group_index, affinity_mask(cpu_count_per_group[group_index]));
                created += 1;
                assigned_per_group[group_index] += 1;
            }

            group_index = (group_index + 1) % cpu_count_per_group.len();
        }
    }
}

/// Affinity mask covering all CPUs of a group: the N lowest bits for N CPUs.
fn affinity_mask(cpu_count: u32) -> u64 {
    assert!(
        cpu_count >= 1 && cpu_count <= 64,
        "a CPU group holds between 1 and 64 CPUs, got {cpu_count}"
    );
    u64::MAX >> (64 - cpu_count)
}

/// CPU topology as seen by the placement strategies: the machine's logical
/// CPUs chunked into groups of at most 64, the widest span one affinity mask
/// can cover.
pub(crate) fn cpu_groups() -> Vec<u32> {
    let cpu_count = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1) as u32;

    let mut groups = Vec::new();
    let mut remaining = cpu_count;
    while remaining > 64 {
        groups.push(64);
        remaining -= 64;
    }
    groups.push(remaining);
    groups
}

/// Pin the current thread to the CPUs selected by `mask` within its group.
///
/// On Linux this uses `pthread_setaffinity_np`; failures are ignored since
/// pinning is an optimization, not a correctness requirement. On other
/// platforms this is a no-op.
pub(crate) fn pin_current_thread(group_index: usize, mask: u64) {
    #[cfg(target_os = "linux")]
    unsafe {
        use libc::{cpu_set_t, pthread_self, pthread_setaffinity_np, CPU_SET, CPU_ZERO};

        let mut set: cpu_set_t = std::mem::zeroed();
        CPU_ZERO(&mut set);
        let base = group_index * 64;
        for bit in 0..64 {
            if mask & (1u64 << bit) != 0 {
                CPU_SET(base + bit, &mut set);
            }
        }
        let _ = pthread_setaffinity_np(pthread_self(), std::mem::size_of::<cpu_set_t>(), &set);
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (group_index, mask);
    }
}
