//! Reusable rendezvous barrier between named participants.
//!
//! Every active participant must arrive before any of them may proceed. A
//! participant can leave permanently with [`RendezvousBarrier::arrive_and_drop`],
//! after which the barrier only waits for the remaining ones. Once every
//! participant has dropped, all calls return immediately.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two threads of the frame pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Participant {
    Simulation,
    Render,
}

impl Participant {
    /// Both participants, simulation first.
    pub const ALL: [Participant; 2] = [Participant::Simulation, Participant::Render];

    fn bit(self) -> u8 {
        match self {
            Participant::Simulation => 0b01,
            Participant::Render => 0b10,
        }
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Participant::Simulation => f.write_str("simulation"),
            Participant::Render => f.write_str("render"),
        }
    }
}

#[derive(Debug)]
struct BarrierState {
    /// Participants still taking part.
    members: u8,
    /// Members that arrived in the current generation.
    arrived: u8,
    generation: u64,
}

impl BarrierState {
    /// Opens the next generation if every remaining member has arrived.
    fn try_release(&mut self) -> bool {
        if self.members != 0 && self.arrived == self.members {
            self.arrived = 0;
            self.generation = self.generation.wrapping_add(1);
            true
        } else {
            false
        }
    }
}

/// A reusable barrier that releases once every remaining participant arrived.
pub struct RendezvousBarrier {
    name: &'static str,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl RendezvousBarrier {
    /// Creates a barrier waiting on `participants`. `name` appears in logs.
    pub fn new(name: &'static str, participants: &[Participant]) -> Self {
        let members = participants.iter().fold(0, |acc, p| acc | p.bit());
        RendezvousBarrier {
            name,
            state: Mutex::new(BarrierState {
                members,
                arrived: 0,
                generation: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// A barrier for the simulation and render threads.
    pub fn two_party(name: &'static str) -> Self {
        Self::new(name, &Participant::ALL)
    }

    /// The name given at construction.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Arrives at the barrier and blocks until every member has arrived.
    ///
    /// Returns true for the arrival that completed the generation. A
    /// participant that already dropped returns false immediately.
    pub fn arrive_and_wait(&self, who: Participant) -> bool {
        let mut state = self.state.lock();
        if state.members & who.bit() == 0 {
            return false;
        }
        if state.arrived & who.bit() != 0 {
            tracing::warn!(barrier = self.name, participant = %who, "participant arrived twice in one generation");
        }

        state.arrived |= who.bit();
        if state.try_release() {
            self.released.notify_all();
            return true;
        }

        let generation = state.generation;
        while state.generation == generation {
            self.released.wait(&mut state);
        }
        false
    }

    /// Leaves the barrier permanently, releasing the others if they were only
    /// waiting for this participant.
    pub fn arrive_and_drop(&self, who: Participant) {
        let mut state = self.state.lock();
        if state.members & who.bit() == 0 {
            return;
        }
        state.members &= !who.bit();
        state.arrived &= !who.bit();
        tracing::debug!(barrier = self.name, participant = %who, "participant dropped");

        if state.try_release() {
            self.released.notify_all();
        }
    }

    /// True while the participant has not dropped.
    pub fn is_member(&self, who: Participant) -> bool {
        self.state.lock().members & who.bit() != 0
    }
}

impl fmt::Debug for RendezvousBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RendezvousBarrier")
            .field("name", &self.name)
            .field("members", &state.members)
            .field("generation", &state.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_both_must_arrive() {
        let barrier = Arc::new(RendezvousBarrier::two_party("start"));
        let passed = Arc::new(AtomicUsize::new(0));

        let b = barrier.clone();
        let p = passed.clone();
        let render = thread::spawn(move || {
            b.arrive_and_wait(Participant::Render);
            p.fetch_add(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(20));
        assert_eq!(passed.load(Ordering::SeqCst), 0);

        barrier.arrive_and_wait(Participant::Simulation);
        render.join().unwrap();
        assert_eq!(passed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reusable_across_generations() {
        let barrier = Arc::new(RendezvousBarrier::two_party("frame"));
        let b = barrier.clone();
        let render = thread::spawn(move || {
            let mut leaders = 0;
            for _ in 0..100 {
                if b.arrive_and_wait(Participant::Render) {
                    leaders += 1;
                }
            }
            leaders
        });

        let mut leaders = 0;
        for _ in 0..100 {
            if barrier.arrive_and_wait(Participant::Simulation) {
                leaders += 1;
            }
        }
        // Exactly one leader per generation.
        assert_eq!(leaders + render.join().unwrap(), 100);
    }

    #[test]
    fn test_drop_releases_waiter() {
        let barrier = Arc::new(RendezvousBarrier::two_party("finished"));
        let b = barrier.clone();
        let render = thread::spawn(move || b.arrive_and_wait(Participant::Render));

        thread::sleep(Duration::from_millis(20));
        barrier.arrive_and_drop(Participant::Simulation);

        render.join().unwrap();
        assert!(!barrier.is_member(Participant::Simulation));
        // The remaining member no longer waits for anyone.
        assert!(barrier.arrive_and_wait(Participant::Render));
    }

    #[test]
    fn test_all_dropped_never_blocks() {
        let barrier = RendezvousBarrier::two_party("done");
        barrier.arrive_and_drop(Participant::Simulation);
        barrier.arrive_and_drop(Participant::Render);
        barrier.arrive_and_drop(Participant::Render);

        assert!(!barrier.arrive_and_wait(Participant::Simulation));
        assert!(!barrier.arrive_and_wait(Participant::Render));
    }
}
