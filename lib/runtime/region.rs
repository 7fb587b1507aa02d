//! Out-of-core memory regions.
//!
//! A region cycles through five states:
//!
//! ```text
//!        unmap            stored            prefetch           loaded
//! Core ─────────▶ Store ─────────▶ Uncore ─────────▶ Prefetch ─────────▶ Core
//!                                    │                   │
//!                                    │ access            │ access
//!                                    ▼                   ▼
//!                                  Load ─────────────────────────────────▶ Core
//!                                                loaded
//! ```
//!
//! [`transition`] is the whole state machine as a pure function; [`Region`]
//! drives it against an [`IoBackend`], joining in-flight I/O only when an
//! access needs the data.

use std::{ fmt, io, sync::Arc };
use serde::{ Serialize, de::DeserializeOwned };
use thiserror::Error;
use crate::runtime::io::{ IoBackend, IoTicket, Slot, SlotAllocator };

#[derive(Debug, Error)]
pub enum RegionError {
    /// Returned when an event is not allowed in the current state.
    #[error("error in region transition: cannot apply {event:?} in state {state:?}")]
    InvalidTransition { state: RegionState, event: RegionEvent },

    /// Returned when the swap backend fails.
    #[error("error in region I/O: {0}")]
    Io(#[from] io::Error),

    /// Returned when swap data cannot be encoded or decoded.
    #[error("error in region codec: {0}")]
    Codec(#[from] bincode::Error),

    /// Returned when a region holds neither data nor pending I/O.
    #[error("error in region access: no data present")]
    Missing,
}
use RegionError::*;
pub type RegionResult<T> = Result<T, RegionError>;

/// Residency state of a region.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegionState {
    /// Data is in memory.
    Core,
    /// Data is in memory and being written out.
    Store,
    /// Data lives only in the swap slot.
    Uncore,
    /// Data is being read back ahead of use.
    Prefetch,
    /// An access is waiting for data to be read back.
    Load,
}

/// Inputs to the region state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegionEvent {
    Unmap,
    Stored,
    Prefetch,
    Access,
    Loaded,
}

/// I/O that a transition asks the driver to start.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IoAction {
    Write,
    Read,
}

/// Apply `event` in `state`, returning the new state and the I/O to start.
pub fn transition(state: RegionState, event: RegionEvent)
    -> RegionResult<(RegionState, Option<IoAction>)>
{
    use RegionEvent as E;
    use RegionState as S;
    match (state, event) {
        (S::Core, E::Unmap) => Ok((S::Store, Some(IoAction::Write))),
        (S::Core, E::Access) => Ok((S::Core, None)),
        (S::Core, E::Prefetch) => Ok((S::Core, None)),
        (S::Store, E::Stored) => Ok((S::Uncore, None)),
        (S::Store, E::Access) => Ok((S::Core, None)),
        (S::Store, E::Unmap) => Ok((S::Store, None)),
        (S::Store, E::Prefetch) => Ok((S::Store, None)),
        (S::Uncore, E::Prefetch) => Ok((S::Prefetch, Some(IoAction::Read))),
        (S::Uncore, E::Access) => Ok((S::Load, Some(IoAction::Read))),
        (S::Uncore, E::Unmap) => Ok((S::Uncore, None)),
        (S::Prefetch, E::Loaded) => Ok((S::Core, None)),
        (S::Prefetch, E::Access) => Ok((S::Load, None)),
        (S::Prefetch, E::Prefetch) => Ok((S::Prefetch, None)),
        (S::Load, E::Loaded) => Ok((S::Core, None)),
        (S::Load, E::Access) => Ok((S::Load, None)),
        (S::Load, E::Prefetch) => Ok((S::Load, None)),
        (state, event) => Err(InvalidTransition { state, event }),
    }
}

/// A value that can be swapped out to a backend slot and back.
pub struct Region<T> {
    state: RegionState,
    slot: Slot,
    data: Option<T>,
    ticket: Option<IoTicket>,
    backend: Arc<dyn IoBackend>,
    slots: Arc<SlotAllocator>,
}

impl<T> Region<T> {
    /// Return the current state.
    pub fn state(&self) -> RegionState { self.state }
}

impl<T> Region<T>
where T: Serialize + DeserializeOwned
{
    /// Wrap resident data, reserving a slot for it.
    pub fn new(data: T, backend: Arc<dyn IoBackend>, slots: Arc<SlotAllocator>)
        -> Self
    {
        let slot = slots.acquire();
        Self { state: RegionState::Core, slot, data: Some(data), ticket: None, backend, slots }
    }

    /// Return the slot backing the region.
    pub fn slot(&self) -> Slot { self.slot }

    /// Return `true` if the data is currently held in memory.
    pub fn is_resident(&self) -> bool { self.data.is_some() }

    fn apply(&mut self, event: RegionEvent) -> RegionResult<Option<IoAction>> {
        let (state, action) = transition(self.state, event)?;
        self.state = state;
        Ok(action)
    }

    /// Begin writing the data out.
    ///
    /// Memory is freed once the write has completed, either in
    /// [`poll`][Self::poll] or [`flush`][Self::flush].
    pub fn unmap(&mut self) -> RegionResult<()> {
        if let Some(IoAction::Write) = self.apply(RegionEvent::Unmap)? {
            let bytes = bincode::serialize(self.data.as_ref().ok_or(Missing)?)?;
            self.ticket = Some(self.backend.write(self.slot, bytes));
        }
        Ok(())
    }

    /// Begin reading the data back without waiting for it.
    pub fn prefetch(&mut self) -> RegionResult<()> {
        if let Some(IoAction::Read) = self.apply(RegionEvent::Prefetch)? {
            self.ticket = Some(self.backend.read(self.slot));
        }
        Ok(())
    }

    /// Finish any I/O that has already completed, without blocking.
    pub fn poll(&mut self) -> RegionResult<()> {
        if !self.ticket.as_ref().is_some_and(|t| t.is_finished()) { return Ok(()); }
        match self.state {
            RegionState::Store => self.finish_store(),
            RegionState::Prefetch | RegionState::Load => {
                let ticket = self.ticket.take().ok_or(Missing)?;
                self.finish_load(ticket)
            },
            _ => Ok(()),
        }
    }

    /// Block until a pending write completes and free the memory.
    pub fn flush(&mut self) -> RegionResult<()> {
        if self.state == RegionState::Store { self.finish_store()?; }
        Ok(())
    }

    fn finish_store(&mut self) -> RegionResult<()> {
        if let Some(ticket) = self.ticket.take() { ticket.wait()?; }
        self.apply(RegionEvent::Stored)?;
        self.data = None;
        Ok(())
    }

    fn finish_load(&mut self, ticket: IoTicket) -> RegionResult<()> {
        let bytes = ticket.wait()?;
        self.data = Some(bincode::deserialize(&bytes)?);
        self.apply(RegionEvent::Loaded)?;
        Ok(())
    }

    /// Return the data, blocking on whatever I/O stands in the way.
    pub fn access(&mut self) -> RegionResult<&mut T> {
        if let Some(IoAction::Read) = self.apply(RegionEvent::Access)? {
            self.ticket = Some(self.backend.read(self.slot));
        }
        match self.state {
            RegionState::Load => {
                let ticket = self.ticket.take().ok_or(Missing)?;
                self.finish_load(ticket)?;
            },
            // an interrupted store still has the data in memory
            RegionState::Core => {
                if let Some(ticket) = self.ticket.take() { ticket.wait()?; }
            },
            _ => { },
        }
        self.data.as_mut().ok_or(Missing)
    }

    /// Consume the region, returning its data.
    pub fn into_inner(mut self) -> RegionResult<T> {
        self.access()?;
        self.data.take().ok_or(Missing)
    }
}

impl<T> Drop for Region<T> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() { ticket.wait().ok(); }
        self.backend.discard(self.slot);
        self.slots.release(self.slot);
    }
}

impl<T> fmt::Debug for Region<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("state", &self.state)
            .field("slot", &self.slot)
            .field("resident", &self.data.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::io::MemoryBackend;

    fn region(data: Vec<f64>) -> (Region<Vec<f64>>, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let slots = Arc::new(SlotAllocator::new(0));
        (Region::new(data, backend.clone(), slots), backend)
    }

    #[test]
    fn full_cycle_through_all_states() {
        use RegionState::*;
        let mut s = Core;
        let steps = [
            (RegionEvent::Unmap, Store, Some(IoAction::Write)),
            (RegionEvent::Stored, Uncore, None),
            (RegionEvent::Prefetch, Prefetch, Some(IoAction::Read)),
            (RegionEvent::Loaded, Core, None),
        ];
        for (event, next, action) in steps {
            let (t, a) = transition(s, event).unwrap();
            assert_eq!((t, a), (next, action));
            s = t;
        }
        assert_eq!(
            transition(Uncore, RegionEvent::Access).unwrap(),
            (Load, Some(IoAction::Read)),
        );
    }

    #[test]
    fn invalid_events_are_rejected() {
        assert!(transition(RegionState::Core, RegionEvent::Loaded).is_err());
        assert!(transition(RegionState::Uncore, RegionEvent::Stored).is_err());
        assert!(transition(RegionState::Prefetch, RegionEvent::Unmap).is_err());
    }

    #[test]
    fn unmap_then_access_restores_data() {
        let (mut r, backend) = region(vec![1.0, 2.0, 3.0]);
        r.unmap().unwrap();
        assert_eq!(r.state(), RegionState::Store);
        r.poll().unwrap();
        assert_eq!(r.state(), RegionState::Uncore);
        assert!(!r.is_resident());
        assert_eq!(r.access().unwrap(), &vec![1.0, 2.0, 3.0]);
        assert_eq!(r.state(), RegionState::Core);
        assert_eq!((backend.writes(), backend.reads()), (1, 1));
    }

    #[test]
    fn prefetch_then_access() {
        let (mut r, backend) = region(vec![4.0]);
        r.unmap().unwrap();
        r.flush().unwrap();
        r.prefetch().unwrap();
        assert_eq!(r.state(), RegionState::Prefetch);
        r.access().unwrap()[0] += 1.0;
        assert_eq!(r.into_inner().unwrap(), vec![5.0]);
        assert_eq!(backend.reads(), 1);
    }

    #[test]
    fn access_during_store_keeps_memory_copy() {
        let (mut r, backend) = region(vec![7.0]);
        r.unmap().unwrap();
        assert_eq!(r.access().unwrap(), &vec![7.0]);
        assert_eq!(r.state(), RegionState::Core);
        assert_eq!(backend.reads(), 0);
    }

    #[test]
    fn dropping_frees_the_slot() {
        let backend = Arc::new(MemoryBackend::new());
        let slots = Arc::new(SlotAllocator::new(0));
        let mut r = Region::new(vec![1.0_f64], backend.clone(), slots.clone());
        let slot = r.slot();
        r.unmap().unwrap();
        r.flush().unwrap();
        assert!(backend.contains(slot));
        drop(r);
        assert!(!backend.contains(slot));
        assert_eq!(slots.acquire(), slot);
    }
}
