//! Active object map
//!
//! Binds object ids to entries and servants to the ids they are active
//! under. The map lock is always taken before any entry lock; upcalls never
//! run with either held.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::entry::{Entry, EntryState, Teardown};
use crate::servant::{servant_key, ServantRef};
use crate::types::{IdUniquenessPolicy, ObjectId, PoaError, Result};

/// Outcome of looking up an id for an invocation
pub(crate) enum Lookup {
    /// No entry, and none was created
    Missing,
    /// Entry is valid; the caller now holds it
    Active(Arc<Entry>, ServantRef),
    /// Entry was created or reset; the caller holds it and must incarnate
    Incarnate(Arc<Entry>),
    /// Entry is settling; wait on it and look up again
    Busy(Arc<Entry>),
}

#[derive(Default)]
struct MapInner {
    entries: HashMap<ObjectId, Arc<Entry>>,
    servants: HashMap<usize, Vec<ObjectId>>,
}

impl MapInner {
    fn is_bound(&self, key: usize) -> bool {
        self.servants.get(&key).map_or(false, |ids| !ids.is_empty())
    }

    fn remove_entry(&mut self, entry: &Arc<Entry>) {
        if let Some(current) = self.entries.get(entry.id()) {
            if Arc::ptr_eq(current, entry) {
                self.entries.remove(entry.id());
            }
        }
    }
}

/// Id to servant table of a RETAIN adapter
pub struct ActiveObjectMap {
    uniqueness: IdUniquenessPolicy,
    poll: Duration,
    inner: Mutex<MapInner>,
}

impl ActiveObjectMap {
    pub fn new(uniqueness: IdUniquenessPolicy, poll: Duration) -> Self {
        Self {
            uniqueness,
            poll,
            inner: Mutex::new(MapInner::default()),
        }
    }

    fn unique(&self) -> bool {
        self.uniqueness == IdUniquenessPolicy::Unique
    }

    /// Take a hold on the entry for `id`, creating it when `create` is set
    pub(crate) fn enter(&self, id: &ObjectId, create: bool) -> Result<Lookup> {
        let mut inner = self.inner.lock();
        let entry = match inner.entries.get(id) {
            Some(entry) => {
                if !create && entry.state() == EntryState::Invalid {
                    return Ok(Lookup::Missing);
                }
                entry.clone()
            }
            None if create => {
                let entry = Arc::new(Entry::new(id.clone(), self.poll));
                inner.entries.insert(id.clone(), entry.clone());
                entry
            }
            None => return Ok(Lookup::Missing),
        };

        Ok(match entry.try_enter()? {
            Some(Some(servant)) => Lookup::Active(entry, servant),
            Some(None) => Lookup::Incarnate(entry),
            None => Lookup::Busy(entry),
        })
    }

    /// Explicit activation
    ///
    /// Waits while a previous binding of `id` is being etherealized. The map
    /// is unchanged when activation fails.
    pub(crate) fn activate(&self, id: &ObjectId, servant: ServantRef) -> Result<()> {
        let key = servant_key(&servant);
        loop {
            let mut inner = self.inner.lock();
            let existing = inner.entries.get(id).cloned();
            if let Some(entry) = &existing {
                match entry.state() {
                    EntryState::Valid | EntryState::Incarnating => {
                        return Err(PoaError::ObjectAlreadyActive(id.clone()));
                    }
                    state if state.is_busy() => {
                        drop(inner);
                        entry.wait_while_busy();
                        continue;
                    }
                    _ => {}
                }
            }
            if self.unique() && inner.is_bound(key) {
                return Err(PoaError::ServantAlreadyActive);
            }

            let entry = match existing {
                Some(entry) => entry,
                None => {
                    let entry = Arc::new(Entry::new(id.clone(), self.poll));
                    inner.entries.insert(id.clone(), entry.clone());
                    entry
                }
            };
            entry.activate(servant)?;
            inner.servants.entry(key).or_default().push(id.clone());
            debug!("AOM: activated {}", id);
            return Ok(());
        }
    }

    /// Bind the servant produced by an incarnation
    pub(crate) fn complete_incarnation(&self, entry: &Arc<Entry>, servant: ServantRef) -> Result<()> {
        let key = servant_key(&servant);
        let mut inner = self.inner.lock();
        if self.unique() && inner.is_bound(key) {
            entry.incarnation_failed()?;
            inner.remove_entry(entry);
            return Err(PoaError::ObjAdapter(format!(
                "servant incarnated for {} is already active under another id",
                entry.id()
            )));
        }
        entry.incarnated(servant)?;
        inner.servants.entry(key).or_default().push(entry.id().clone());
        Ok(())
    }

    /// Roll back a failed incarnation
    pub(crate) fn abort_incarnation(&self, entry: &Arc<Entry>) -> Result<()> {
        let mut inner = self.inner.lock();
        entry.incarnation_failed()?;
        inner.remove_entry(entry);
        Ok(())
    }

    /// Start deactivating `id`
    ///
    /// Returns the servant when it must be etherealized right away, `None`
    /// when the last invocation holding the entry will do it.
    pub(crate) fn deactivate(
        &self,
        id: &ObjectId,
        teardown: Teardown,
    ) -> Result<Option<(Arc<Entry>, ServantRef, Teardown)>> {
        loop {
            let inner = self.inner.lock();
            let entry = inner
                .entries
                .get(id)
                .cloned()
                .ok_or_else(|| PoaError::ObjectNotActive(id.clone()))?;
            match entry.begin_etherealize(teardown)? {
                Some(Some((servant, teardown))) => return Ok(Some((entry, servant, teardown))),
                Some(None) => return Ok(None),
                None => {
                    drop(inner);
                    entry.wait_while_busy();
                }
            }
        }
    }

    /// Drop the servant-to-id binding of an etherealizing entry
    ///
    /// Returns whether the servant remains active under other ids.
    pub(crate) fn unbind(&self, entry: &Entry, servant: &ServantRef) -> bool {
        let key = servant_key(servant);
        let mut inner = self.inner.lock();
        let remaining = match inner.servants.get_mut(&key) {
            Some(ids) => {
                ids.retain(|id| id != entry.id());
                ids.len()
            }
            None => 0,
        };
        if remaining == 0 {
            inner.servants.remove(&key);
        }
        remaining > 0
    }

    /// Remove an etherealized entry and wake everyone waiting on it
    pub(crate) fn finish(&self, entry: &Arc<Entry>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.remove_entry(entry);
        entry.etherealized()
    }

    /// Servant currently bound to `id`
    pub fn id_to_servant(&self, id: &ObjectId) -> Option<ServantRef> {
        self.inner.lock().entries.get(id).and_then(|entry| entry.servant())
    }

    /// Ids the servant is currently active under
    pub fn servant_to_ids(&self, servant: &ServantRef) -> Vec<ObjectId> {
        let inner = self.inner.lock();
        inner
            .servants
            .get(&servant_key(servant))
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        inner
                            .entries
                            .get(*id)
                            .map_or(false, |entry| entry.state() == EntryState::Valid)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids of all valid entries
    pub fn active_ids(&self) -> Vec<ObjectId> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.state() == EntryState::Valid)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of entries, whatever their state
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
