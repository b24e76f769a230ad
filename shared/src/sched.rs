//! The task table and the services reached through the software-interrupt
//! gate.
//!
//! Tasks are slots in a fixed table, identified by index (the PID). The
//! timer IRQ calls [`Scheduler::preempt`] with the frame the ISR stub built;
//! preemption copies the inbound frame into the running task's slot,
//! advances round-robin to the next populated slot and rewrites the frame
//! from it. The common interrupt return path restores CR3 from the frame,
//! so the IRET lands in the chosen task's address space.
//!
//! All entry points assume interrupts are already disabled; the table takes
//! no locks of its own.

use crate::config::{USER_STACK_PAGE, USER_STACK_TOP};
use crate::paging::AddressSpace;
use crate::physmem::FrameBitmap;
use crate::task::InterruptFrame;

/// Index into the task table.
pub type Pid = usize;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SchedError {
    /// Every slot in the task table is populated.
    TaskTableFull,
    /// The PID does not name a populated slot.
    UnknownPid,
}

/// One populated task slot: the saved register state, which carries the
/// owning address space in `frame.cr3`.
#[derive(Clone, Copy, Debug)]
pub struct Task {
    pub frame: InterruptFrame,
}

/// Fixed-capacity round-robin task table.
pub struct Scheduler<const N: usize> {
    slots: [Option<Task>; N],
    current: Pid,
}

impl<const N: usize> Scheduler<N> {
    pub fn new() -> Self {
        Scheduler {
            slots: core::array::from_fn(|_| None),
            current: 0,
        }
    }

    /// Number of populated slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot the next timer tick will save into.
    pub fn current(&self) -> Pid {
        self.current
    }

    pub fn task(&self, pid: Pid) -> Option<&Task> {
        self.slots.get(pid)?.as_ref()
    }

    /// Populates the first empty slot with `frame`. `current` is left
    /// alone; insertion order is the round-robin order.
    pub fn insert(&mut self, frame: InterruptFrame) -> Result<Pid, SchedError> {
        let pid = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(SchedError::TaskTableFull)?;
        self.slots[pid] = Some(Task { frame });
        Ok(pid)
    }

    /// Gate service 0: registers the calling task itself. The inbound frame
    /// is copied into a new slot whose address-space pointer is `space_cr3`,
    /// and `current` moves to that slot so the caller keeps its time slice.
    pub fn insert_current(
        &mut self,
        frame: &InterruptFrame,
        space_cr3: u32,
    ) -> Result<Pid, SchedError> {
        let mut saved = *frame;
        saved.cr3 = space_cr3;
        let pid = self.insert(saved)?;
        self.current = pid;
        Ok(pid)
    }

    /// Gate service 1: fork. The caller's frame is snapshotted into a new
    /// slot which resumes at `return_addr` with the new PID in `eax`, still
    /// under the caller's address space. The live frame returns immediately
    /// as the child: `eax` zero and `cr3` switched to `child_cr3`, so the
    /// IRET comes back under the new space. One trap, two returns.
    pub fn fork(
        &mut self,
        frame: &mut InterruptFrame,
        child_cr3: u32,
        return_addr: u32,
    ) -> Result<Pid, SchedError> {
        let mut snapshot = *frame;
        let pid = self.insert(snapshot)?;
        snapshot.eax = pid as u32;
        snapshot.eip = return_addr;
        self.slots[pid] = Some(Task { frame: snapshot });

        frame.eax = 0;
        frame.cr3 = child_cr3;
        Ok(pid)
    }

    /// Vacates `pid`. The task's address space is not reclaimed; spaces are
    /// never freed in this revision.
    pub fn kill(&mut self, pid: Pid) -> Result<(), SchedError> {
        match self.slots.get_mut(pid) {
            Some(slot @ Some(_)) => *slot = None,
            _ => return Err(SchedError::UnknownPid),
        }
        if self.current == pid {
            self.current = self.next_populated(pid).unwrap_or(0);
        }
        Ok(())
    }

    /// Timer preemption. With fewer than two tasks this is a no-op;
    /// otherwise the inbound frame is saved into the current slot and the
    /// frame is rewritten from the next populated slot round-robin.
    pub fn preempt(&mut self, frame: &mut InterruptFrame) {
        if self.len() < 2 {
            return;
        }

        if let Some(slot) = &mut self.slots[self.current] {
            slot.frame = *frame;
        }
        // `len() >= 2` guarantees a populated successor.
        self.current = self.next_populated(self.current).unwrap();

        // For a same-privilege interrupt the two words past `eflags` are
        // the interrupted stack's own memory, not CPU-pushed state; they
        // must not be rewritten.
        let (user_esp, ss) = (frame.user_esp, frame.ss);
        *frame = self.slots[self.current].unwrap().frame;
        frame.user_esp = user_esp;
        frame.ss = ss;
    }

    // First populated slot strictly after `pid`, wrapping around. `pid`
    // itself is only returned if it is the sole populated slot.
    fn next_populated(&self, pid: Pid) -> Option<Pid> {
        (1..=N)
            .map(|step| (pid + step) % N)
            .find(|&i| self.slots[i].is_some())
    }
}

impl<const N: usize> Default for Scheduler<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Gate service 2: builds a non-kernel address space for the calling task.
///
/// Forks the kernel space, takes the first free physical frame for a user
/// stack, maps it at the fixed stack page inside the hole and points the
/// caller's stack registers at the top of that page. Returns the new space,
/// which the kernel parks in its space registry; `None` when the frame pool
/// is exhausted.
pub fn setup_task_paging(
    frame: &mut InterruptFrame,
    kernel_space: &AddressSpace,
    frames: &mut FrameBitmap,
) -> Option<AddressSpace> {
    let stack_frame = frames.find_first_free()? as u32 * crate::config::PAGE_SIZE;

    let mut space = kernel_space.fork();
    space.map(USER_STACK_PAGE, stack_frame, frames);

    frame.esp = USER_STACK_TOP;
    frame.ebp = USER_STACK_TOP;
    frame.user_esp = USER_STACK_TOP;
    Some(space)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_at(eip: u32) -> InterruptFrame {
        InterruptFrame {
            eip,
            cs: 0x08,
            eflags: 0x202,
            cr3: 0x1000,
            ..InterruptFrame::default()
        }
    }

    #[test]
    fn single_task_is_never_preempted() {
        let mut sched: Scheduler<4> = Scheduler::new();
        sched.insert(frame_at(0x100)).unwrap();

        let mut live = frame_at(0x999);
        sched.preempt(&mut live);
        assert_eq!(live.eip, 0x999);
        assert_eq!(sched.current(), 0);
    }

    #[test]
    fn round_robin_visits_every_task_in_insertion_order() {
        let mut sched: Scheduler<8> = Scheduler::new();
        sched.insert(frame_at(0xE0)).unwrap();
        sched.insert(frame_at(0xE1)).unwrap();
        sched.insert(frame_at(0xE2)).unwrap();

        let mut live = frame_at(0xE0);
        let mut restored = Vec::new();
        for _ in 0..6 {
            sched.preempt(&mut live);
            restored.push(live.eip);
        }
        assert_eq!(restored, [0xE1, 0xE2, 0xE0, 0xE1, 0xE2, 0xE0]);
    }

    #[test]
    fn preemption_saves_the_inbound_frame() {
        let mut sched: Scheduler<4> = Scheduler::new();
        sched.insert(frame_at(0xA0)).unwrap();
        sched.insert(frame_at(0xB0)).unwrap();

        // Task 0 has run on and is now at 0xA4 with a changed register.
        let mut live = frame_at(0xA4);
        live.ebx = 0xDEAD;
        sched.preempt(&mut live);
        assert_eq!(live.eip, 0xB0);

        // Coming back around restores task 0 exactly where it left off.
        sched.preempt(&mut live);
        assert_eq!(live.eip, 0xA4);
        assert_eq!(live.ebx, 0xDEAD);
    }

    #[test]
    fn preemption_leaves_the_inline_stack_words_alone() {
        let mut sched: Scheduler<4> = Scheduler::new();
        let mut stored = frame_at(0xA0);
        stored.user_esp = 0x1111;
        stored.ss = 0x2222;
        sched.insert(stored).unwrap();
        sched.insert(frame_at(0xB0)).unwrap();

        let mut live = frame_at(0xA4);
        live.user_esp = 0xAAAA;
        live.ss = 0xBBBB;
        sched.preempt(&mut live);

        assert_eq!(live.eip, 0xB0);
        assert_eq!(live.user_esp, 0xAAAA);
        assert_eq!(live.ss, 0xBBBB);
    }

    #[test]
    fn table_capacity_is_enforced() {
        let mut sched: Scheduler<2> = Scheduler::new();
        sched.insert(frame_at(1)).unwrap();
        sched.insert(frame_at(2)).unwrap();
        assert_eq!(sched.insert(frame_at(3)), Err(SchedError::TaskTableFull));

        let mut live = frame_at(4);
        assert_eq!(
            sched.fork(&mut live, 0x2000, 0x44),
            Err(SchedError::TaskTableFull)
        );
        // A failed fork must not touch the live frame.
        assert_eq!(live, frame_at(4));
    }

    #[test]
    fn insert_current_claims_the_time_slice() {
        let mut sched: Scheduler<4> = Scheduler::new();
        sched.insert(frame_at(0xA0)).unwrap();

        let live = frame_at(0xC0);
        let pid = sched.insert_current(&live, 0x7000).unwrap();
        assert_eq!(pid, 1);
        assert_eq!(sched.current(), 1);
        assert_eq!(sched.task(1).unwrap().frame.cr3, 0x7000);
        assert_eq!(sched.task(1).unwrap().frame.eip, 0xC0);
    }

    #[test]
    fn fork_returns_twice() {
        let mut sched: Scheduler<4> = Scheduler::new();
        let trap_return = 0x4010;

        // The caller is task 0, trapped at the gate.
        let mut live = frame_at(trap_return);
        live.ebx = 1; // space handle, resolved to the cr3 below by the gate
        sched.insert(live).unwrap();

        let child_cr3 = 0x0050_0000;
        let pid = sched.fork(&mut live, child_cr3, trap_return).unwrap();
        assert_eq!(pid, 1);

        // The live continuation is the child: under the new space, eax 0.
        assert_eq!(live.eax, 0);
        assert_eq!(live.cr3, child_cr3);
        assert_eq!(live.eip, trap_return);

        // The snapshot slot is the parent: old space, eax carries the PID.
        let parent = sched.task(pid).unwrap().frame;
        assert_eq!(parent.eax, pid as u32);
        assert_eq!(parent.cr3, 0x1000);
        assert_eq!(parent.eip, trap_return);
    }

    #[test]
    fn kill_vacates_the_slot_and_skips_it() {
        let mut sched: Scheduler<4> = Scheduler::new();
        sched.insert(frame_at(0xE0)).unwrap();
        sched.insert(frame_at(0xE1)).unwrap();
        sched.insert(frame_at(0xE2)).unwrap();

        sched.kill(1).unwrap();
        assert_eq!(sched.len(), 2);
        assert_eq!(sched.kill(1), Err(SchedError::UnknownPid));

        let mut live = frame_at(0xE0);
        let mut restored = Vec::new();
        for _ in 0..4 {
            sched.preempt(&mut live);
            restored.push(live.eip);
        }
        assert_eq!(restored, [0xE2, 0xE0, 0xE2, 0xE0]);
    }

    #[test]
    fn kill_of_the_current_task_advances_current() {
        let mut sched: Scheduler<4> = Scheduler::new();
        sched.insert(frame_at(0xE0)).unwrap();
        sched.insert(frame_at(0xE1)).unwrap();
        sched.kill(0).unwrap();
        assert_eq!(sched.current(), 1);
    }

    mod paging_setup {
        use super::*;

        use crate::config::{PAGE_SIZE, USER_STACK_PAGE, USER_STACK_TOP};
        use crate::paging::AddressSpace;
        use crate::physmem::FrameBitmap;

        #[test]
        fn stack_registers_point_at_the_new_page() {
            let mut frames = FrameBitmap::new_full();
            let kernel = AddressSpace::new_kernel(&mut frames);

            let expected_frame = frames.find_first_free().unwrap() as u32 * PAGE_SIZE;

            let mut live = frame_at(0x4000);
            let space = setup_task_paging(&mut live, &kernel, &mut frames).unwrap();

            assert_eq!(live.esp, USER_STACK_TOP);
            assert_eq!(live.ebp, USER_STACK_TOP);
            assert_eq!(space.pte(USER_STACK_PAGE) & crate::paging::PTE_FRAME_MASK, expected_frame);
            assert!(frames.is_used(expected_frame));
            // The kernel space itself is untouched.
            assert_eq!(kernel.pte(USER_STACK_PAGE), 0);
        }

        #[test]
        fn frame_exhaustion_reports_none() {
            let mut frames = FrameBitmap::new_full();
            let kernel = {
                // Build against a scratch bitmap, then refuse to hand out
                // any frames at all.
                let mut scratch = FrameBitmap::new_full();
                AddressSpace::new_kernel(&mut scratch)
            };

            let mut live = frame_at(0x4000);
            assert!(setup_task_paging(&mut live, &kernel, &mut frames).is_none());
        }
    }
}
