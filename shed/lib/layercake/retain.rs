use std::{
    collections::HashSet,
    sync::{PoisonError, RwLock},
};

use super::LayerId;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Pins layers so that garbage collection never removes them.
pub trait Retainer: Send + Sync {
    /// Pins `id` for the life of the process.
    fn retain(&self, id: &LayerId);
}

/// Answers whether a layer is pinned.
pub trait Checker: Send + Sync {
    /// Returns true if `id` must not be removed.
    fn check(&self, id: &LayerId) -> bool;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The set of retained graph keys. There is no way to un-retain.
#[derive(Debug, Default)]
pub struct RetainSet {
    retained: RwLock<HashSet<String>>,
}

/// Adapts a closure into a [`Checker`].
pub struct CheckFunc<F>(pub F);

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RetainSet {
    /// Creates an empty retain set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of retained graph keys.
    pub fn len(&self) -> usize {
        self.retained
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Retainer for RetainSet {
    fn retain(&self, id: &LayerId) {
        let graph_id = id.graph_id();
        tracing::debug!(id = %id, graph_id, "retaining layer");
        self.retained
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(graph_id);
    }
}

impl Checker for RetainSet {
    fn check(&self, id: &LayerId) -> bool {
        self.retained
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id.graph_id())
    }
}

impl<F> Checker for CheckFunc<F>
where
    F: Fn(&LayerId) -> bool + Send + Sync,
{
    fn check(&self, id: &LayerId) -> bool {
        (self.0)(id)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
