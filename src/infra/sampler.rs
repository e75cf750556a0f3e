//! Process-group memory sampling with `sysinfo`.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use sysinfo::{Pid, Process, ProcessesToUpdate, System};

use crate::config::ProcessGroup;
use crate::core::resources::MemorySampler;
use crate::core::SchedulerError;

/// Sums resident memory of a root process and all of its descendants.
///
/// Worker fleets are usually forked by one supervisor, so the default group
/// is this process's parent and everything under it.
pub struct ProcessGroupSampler {
    group: ProcessGroup,
    system: Mutex<System>,
}

impl ProcessGroupSampler {
    /// Sampler for `group`.
    #[must_use]
    pub fn new(group: ProcessGroup) -> Self {
        Self {
            group,
            system: Mutex::new(System::new()),
        }
    }

    fn root(&self, system: &System) -> Result<Pid, SchedulerError> {
        let current = sysinfo::get_current_pid()
            .map_err(|e| SchedulerError::Telemetry(format!("current pid unavailable: {e}")))?;
        Ok(match self.group {
            ProcessGroup::CurrentProcess => current,
            ProcessGroup::ParentTree => system
                .process(current)
                .and_then(Process::parent)
                .unwrap_or(current),
            ProcessGroup::Tree { root_pid } => Pid::from_u32(root_pid),
        })
    }
}

impl MemorySampler for ProcessGroupSampler {
    fn sample_bytes(&self) -> Result<u64, SchedulerError> {
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::All, true);
        let root = self.root(&system)?;
        if system.process(root).is_none() {
            return Err(SchedulerError::Telemetry(format!(
                "process group root {root} not found"
            )));
        }

        let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for (pid, process) in system.processes() {
            // Linux lists threads as tasks sharing their leader's memory.
            if process.thread_kind().is_some() {
                continue;
            }
            if let Some(parent) = process.parent() {
                children.entry(parent).or_default().push(*pid);
            }
        }

        let mut total = 0u64;
        let mut seen = HashSet::new();
        let mut pending = VecDeque::from([root]);
        while let Some(pid) = pending.pop_front() {
            if !seen.insert(pid) {
                continue;
            }
            if let Some(process) = system.process(pid) {
                total = total.saturating_add(process.memory());
            }
            if let Some(kids) = children.get(&pid) {
                pending.extend(kids.iter().copied());
            }
        }
        tracing::trace!(%root, processes = seen.len(), memory_bytes = total, "process group sampled");
        Ok(total)
    }
}
