use parking_lot::{Mutex, MutexGuard};
use pystacks_common::WorkingState;

/// Per-worker scratch space for unwinding, one slot per concurrent walk.
pub struct SlotPool {
    slots: Vec<Mutex<Box<WorkingState>>>,
}

impl SlotPool {
    pub fn new(size: usize) -> Self {
        let slots = (0..size.max(1))
            .map(|_| Mutex::new(Box::default()))
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Locks the slot owned by worker `worker`, waiting for it if needed.
    /// The state is reset before it is handed out.
    pub fn acquire(&self, worker: usize) -> MutexGuard<'_, Box<WorkingState>> {
        let mut slot = self.slots[worker % self.slots.len()].lock();
        slot.reset();
        slot
    }
}
