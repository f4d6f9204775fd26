use super::{EventPayload, EventSubtype, EventType, Transition};
use crate::association::state::AssociationState;
use crate::association::Association;
use crate::endpoint::Endpoint;

use fxhash::FxHashMap;
use std::fmt;

/// A transition function. Decides only; every mutation it wants goes into
/// the returned command sequence.
pub type TransitionFn =
    fn(&Endpoint, Option<&Association>, EventSubtype, EventPayload) -> Transition;

/// StateTable maps `(event type, state, subtype)` to a transition function.
///
/// The table is total: a key without an entry resolves to the default of
/// its event type. It is built once and shared read-only afterwards.
#[derive(Clone)]
pub struct StateTable {
    entries: FxHashMap<(EventType, AssociationState, EventSubtype), TransitionFn>,
    chunk_default: TransitionFn,
    timeout_default: TransitionFn,
    other_default: TransitionFn,
    primitive_default: TransitionFn,
}

impl Default for StateTable {
    fn default() -> Self {
        super::transitions::default_table()
    }
}

impl fmt::Debug for StateTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl StateTable {
    /// An empty table that resolves every key to the given defaults
    pub fn new(
        chunk_default: TransitionFn,
        timeout_default: TransitionFn,
        other_default: TransitionFn,
        primitive_default: TransitionFn,
    ) -> Self {
        StateTable {
            entries: FxHashMap::default(),
            chunk_default,
            timeout_default,
            other_default,
            primitive_default,
        }
    }

    pub fn set(
        &mut self,
        state: AssociationState,
        subtype: EventSubtype,
        f: TransitionFn,
    ) -> &mut Self {
        self.entries
            .insert((subtype.event_type(), state, subtype), f);
        self
    }

    pub fn set_states(
        &mut self,
        states: &[AssociationState],
        subtype: EventSubtype,
        f: TransitionFn,
    ) -> &mut Self {
        for state in states {
            self.set(*state, subtype, f);
        }
        self
    }

    pub fn set_all_states(&mut self, subtype: EventSubtype, f: TransitionFn) -> &mut Self {
        self.set_states(&AssociationState::VALUES, subtype, f)
    }

    pub fn lookup(
        &self,
        event_type: EventType,
        state: AssociationState,
        subtype: EventSubtype,
    ) -> TransitionFn {
        if let Some(f) = self.entries.get(&(event_type, state, subtype)) {
            return *f;
        }
        match event_type {
            EventType::Chunk => self.chunk_default,
            EventType::Timeout => self.timeout_default,
            EventType::Other => self.other_default,
            EventType::Primitive => self.primitive_default,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
