//! CPU topology detection and core selection for thread pinning.

use crate::PinningStrategy;
use core_affinity::CoreId;

/// Core slot of the simulation (main) thread.
pub const SIMULATION_SLOT: usize = 0;
/// Core slot of the render thread.
pub const RENDER_SLOT: usize = 1;

/// Detected core layout of the machine.
#[derive(Debug, Clone)]
pub struct Topology {
    pub logical_cores: usize,
    pub physical_cores: usize,
    core_ids: Vec<CoreId>,
}

impl Topology {
    /// Queries the OS for the available cores.
    pub fn detect() -> Self {
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        let logical_cores = if core_ids.is_empty() {
            num_cpus::get()
        } else {
            core_ids.len()
        };

        Topology {
            logical_cores,
            physical_cores: num_cpus::get_physical().min(logical_cores),
            core_ids,
        }
    }

    /// True when more than one logical processor shares a physical core.
    pub fn has_smt(&self) -> bool {
        self.physical_cores < self.logical_cores
    }

    /// Picks the core for a thread slot. Slot 0 and 1 are the simulation and
    /// render threads, workers follow. Slots past the end wrap around.
    pub fn core_for(&self, strategy: PinningStrategy, slot: usize) -> Option<CoreId> {
        if self.core_ids.is_empty() {
            return None;
        }
        let len = self.core_ids.len();

        let index = match strategy {
            PinningStrategy::None => return None,
            PinningStrategy::Linear => slot % len,
            PinningStrategy::AvoidSMT if self.has_smt() => {
                // Even logical processors are the first hardware thread of each core.
                let physical = len.div_ceil(2);
                (slot % physical) * 2
            }
            PinningStrategy::AvoidSMT => slot % len,
        };

        self.core_ids.get(index).copied()
    }

    /// Pins the calling thread to the core chosen for `slot`.
    ///
    /// Returns false if no core was chosen or the OS rejected the request.
    pub fn pin_current(&self, strategy: PinningStrategy, slot: usize) -> bool {
        match self.core_for(strategy, slot) {
            Some(core) => {
                let pinned = core_affinity::set_for_current(core);
                if !pinned {
                    tracing::warn!(slot, core = core.id, "failed to pin thread");
                }
                pinned
            }
            None => false,
        }
    }

    #[cfg(test)]
    fn synthetic(logical: usize, physical: usize) -> Self {
        Topology {
            logical_cores: logical,
            physical_cores: physical,
            core_ids: (0..logical).map(|id| CoreId { id }).collect(),
        }
    }
}
