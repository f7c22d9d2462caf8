//! Ownership arbitration for pools of interchangeable hardware units.
//!
//! Each slot of a [`Pool`] is either free or owned by one named client. [`Pool::acquire`] hands
//! out the lowest-index free slot as a [`Lease`]; when the last handle on that lease goes away the
//! unit is put back into its safe default state and the slot becomes free again. Acquisition
//! never blocks: a full pool reports [`Error::Exhausted`] and the caller decides whether to wait,
//! retry or give up.
//!
//! An owner asking again while it still holds a lease gets another handle on the same slot, so
//! nested scopes of one logical owner don't compete with each other.

use crate::module;
use kstring::KString;
use std::{
    fmt,
    mem,
    ops::Deref,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};
use thiserror::Error;
use tracing::{
    debug,
    warn,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("All {size} units of `{pool}` are in use")]
    Exhausted { pool: KString, size: usize },
    #[error("Unit {index} of `{pool}` is owned by `{owner}`")]
    Owned {
        pool: KString,
        index: usize,
        owner: KString,
    },
    #[error("`{owner}` already holds unit {index} of `{pool}`")]
    AlreadyHolding {
        pool: KString,
        index: usize,
        owner: KString,
    },
    #[error("`{pool}` has no unit {index}, it only has {size}")]
    NoSuchUnit {
        pool: KString,
        index: usize,
        size: usize,
    },
    #[error("Failed to reset unit {index} of `{pool}` on release")]
    Reset {
        pool: KString,
        index: usize,
        source: module::Error,
    },
}

/// Units that can be put back into a safe default state when their owner lets go of them, so
/// nothing the previous owner configured carries over to the next one
pub trait Reset {
    /// # Errors
    /// Returns an error if the unit couldn't be reached
    fn reset(&self) -> Result<(), module::Error>;
}

#[derive(Debug, Default)]
struct Slot {
    owner: Option<KString>,
    /// Bumped on every grant, so a handle of an earlier grant can't free a later owner's slot
    generation: u64,
    /// Live handles of the current grant
    holders: usize,
}

struct Shared<M> {
    name: KString,
    units: Vec<M>,
    slots: Mutex<Vec<Slot>>,
}

impl<M> Shared<M> {
    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        // Slot updates are single assignments, so a poisoned lock still guards consistent state
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retire one handle of grant `generation` on slot `index`. The last handle resets the unit,
    /// clears the owner and frees the slot, in that order, without leaving the pool lock, so an
    /// owned slot always has a live handle to rejoin.
    fn give_back(
        &self,
        index: usize,
        generation: u64,
        reset: fn(&M) -> Result<(), module::Error>,
    ) -> Result<(), Error> {
        let mut slots = self.lock();
        let slot = &mut slots[index];
        if slot.owner.is_none() || slot.generation != generation || slot.holders == 0 {
            return Ok(());
        }
        slot.holders -= 1;
        if slot.holders > 0 {
            return Ok(());
        }
        let reset = reset(&self.units[index]);
        let owner = slot.owner.take();
        debug!(pool = %self.name, index, owner = ?owner, "released");
        reset.map_err(|source| Error::Reset {
            pool: self.name.clone(),
            index,
            source,
        })
    }
}

/// A fixed set of interchangeable units, leased out by owner name
pub struct Pool<M> {
    shared: Arc<Shared<M>>,
}

impl<M> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.shared.name)
            .field("owners", &self.owners())
            .finish()
    }
}

impl<M> Pool<M> {
    #[must_use]
    pub fn new(name: &str, units: Vec<M>) -> Self {
        let slots = units.iter().map(|_| Slot::default()).collect();
        Self {
            shared: Arc::new(Shared {
                name: KString::from_ref(name),
                units,
                slots: Mutex::new(slots),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Number of units, fixed at construction
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.units.len()
    }

    /// Current owner of every slot, in slot order
    #[must_use]
    pub fn owners(&self) -> Vec<Option<KString>> {
        self.shared.lock().iter().map(|s| s.owner.clone()).collect()
    }

    #[must_use]
    pub fn owner(&self, index: usize) -> Option<KString> {
        self.shared.lock().get(index).and_then(|s| s.owner.clone())
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.shared.lock().iter().filter(|s| s.owner.is_none()).count()
    }
}

impl<M> Pool<M>
where
    M: Reset,
{
    /// A new handle on the current grant of `slot`
    fn handle(&self, slot: &mut Slot, index: usize, owner: &str) -> Lease<M> {
        slot.holders += 1;
        Lease {
            shared: Arc::clone(&self.shared),
            index,
            generation: slot.generation,
            owner: KString::from_ref(owner),
            reset: M::reset,
            held: true,
        }
    }

    fn grant(&self, slot: &mut Slot, index: usize, owner: &str) -> Lease<M> {
        slot.generation += 1;
        slot.owner = Some(KString::from_ref(owner));
        debug!(pool = %self.shared.name, index, owner, "granted");
        self.handle(slot, index, owner)
    }

    /// Lease the lowest-index free unit to `owner`, or hand back the lease `owner` already holds
    /// # Errors
    /// Returns [`Error::Exhausted`] if every unit is owned
    pub fn acquire(&self, owner: &str) -> Result<Lease<M>, Error> {
        let mut slots = self.shared.lock();
        if let Some(index) = slots.iter().position(|s| s.owner.as_deref() == Some(owner)) {
            return Ok(self.handle(&mut slots[index], index, owner));
        }
        let index = slots
            .iter()
            .position(|s| s.owner.is_none())
            .ok_or_else(|| Error::Exhausted {
                pool: self.shared.name.clone(),
                size: slots.len(),
            })?;
        Ok(self.grant(&mut slots[index], index, owner))
    }

    /// Lease unit `index` specifically. A unit owned by someone else is never waited for or
    /// swapped for another free unit.
    /// # Errors
    /// Returns an error if the unit doesn't exist, is owned by another owner, or `owner` already
    /// holds a different unit of this pool
    pub fn acquire_unit(&self, owner: &str, index: usize) -> Result<Lease<M>, Error> {
        let mut slots = self.shared.lock();
        let size = slots.len();
        if index >= size {
            return Err(Error::NoSuchUnit {
                pool: self.shared.name.clone(),
                index,
                size,
            });
        }
        match slots[index].owner.clone() {
            Some(current) if current.as_str() == owner => {
                return Ok(self.handle(&mut slots[index], index, owner));
            }
            Some(current) => {
                return Err(Error::Owned {
                    pool: self.shared.name.clone(),
                    index,
                    owner: current,
                });
            }
            None => {}
        }
        if let Some(held) = slots.iter().position(|s| s.owner.as_deref() == Some(owner)) {
            return Err(Error::AlreadyHolding {
                pool: self.shared.name.clone(),
                index: held,
                owner: KString::from_ref(owner),
            });
        }
        Ok(self.grant(&mut slots[index], index, owner))
    }
}

/// A scoped, exclusive right for one owner to use one unit of a pool.
///
/// Dereferences to the unit. The slot is released when the last handle of this owner's lease is
/// dropped, on every exit path; use [`Lease::release`] to release early and see reset failures.
pub struct Lease<M> {
    shared: Arc<Shared<M>>,
    index: usize,
    generation: u64,
    owner: KString,
    /// Resolved at grant time, where the unit is known to be resettable
    reset: fn(&M) -> Result<(), module::Error>,
    held: bool,
}

impl<M> Lease<M> {
    /// Slot index of the leased unit
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn pool(&self) -> &str {
        &self.shared.name
    }

    fn give_back(&mut self) -> Result<(), Error> {
        if !mem::take(&mut self.held) {
            return Ok(());
        }
        self.shared.give_back(self.index, self.generation, self.reset)
    }

    /// Give this handle back. If it was the last handle of the lease the unit is reset and the
    /// slot freed; otherwise an outer scope of the same owner keeps the lease alive.
    /// # Errors
    /// Returns an error if resetting the unit failed. The slot is freed regardless.
    pub fn release(mut self) -> Result<(), Error> {
        self.give_back()
    }
}

impl<M> Drop for Lease<M> {
    fn drop(&mut self) {
        if let Err(e) = self.give_back() {
            warn!(pool = %self.shared.name, index = self.index, error = %e, "reset on release failed");
        }
    }
}

impl<M> Deref for Lease<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.shared.units[self.index]
    }
}

impl<M> fmt::Debug for Lease<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("pool", &self.shared.name)
            .field("index", &self.index)
            .field("owner", &self.owner)
            .finish()
    }
}
