//! Request-scoped unit of work with change tracking
//!
//! Repositories never talk to the store directly for writes. They stage
//! [`Mutation`]s here, and tracked query results register a snapshot so that
//! in-place modifications are detected when the unit of work is saved. One
//! `save` flushes everything in a single store commit.

use super::store::{EntityStore, Mutation, StorageResult};
use crate::core::clock::{Clock, SystemClock};
use crate::core::entity::Entity;
use crate::core::error::StorageError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle on an entity returned by a repository query
///
/// A tracked entry shares its value with the change tracker of the unit of
/// work that loaded it: changes made through [`EntityEntry::modify`] are
/// persisted by the next save. An untracked entry is a private copy.
pub struct EntityEntry<T> {
    cell: Arc<Mutex<T>>,
    tracked: bool,
}

impl<T: Clone> EntityEntry<T> {
    fn detached(value: T) -> Self {
        Self {
            cell: Arc::new(Mutex::new(value)),
            tracked: false,
        }
    }

    fn tracked(cell: Arc<Mutex<T>>) -> Self {
        Self {
            cell,
            tracked: true,
        }
    }

    /// Clone of the current value
    pub fn get(&self) -> T {
        lock(&self.cell).clone()
    }

    /// Borrow the current value
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&lock(&self.cell))
    }

    /// Mutate the value in place
    pub fn modify<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut lock(&self.cell))
    }

    /// Whether the entry was loaded by a tracked query
    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    /// Take the value out of the entry
    pub fn into_inner(self) -> T {
        match Arc::try_unwrap(self.cell) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(PoisonError::into_inner),
            Err(shared) => lock(&shared).clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for EntityEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityEntry")
            .field("value", &*lock(&self.cell))
            .field("tracked", &self.tracked)
            .finish()
    }
}

/// Type-erased change tracker entry
trait TrackedEntry: Send + Sync {
    fn table(&self) -> &'static str;

    fn id(&self) -> Uuid;

    /// Stage an update, touched at `now`, if the value drifted from its snapshot
    fn detect_change(&mut self, now: DateTime<Utc>) -> StorageResult<Option<Mutation>>;

    /// Promote the pending row to the new snapshot after a commit
    fn accept(&mut self);
}

struct TrackedCell<T> {
    id: Uuid,
    cell: Arc<Mutex<T>>,
    snapshot: Value,
    pending: Option<Value>,
}

impl<T: Entity> TrackedEntry for TrackedCell<T> {
    fn table(&self) -> &'static str {
        T::resource_name()
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn detect_change(&mut self, now: DateTime<Utc>) -> StorageResult<Option<Mutation>> {
        let mut entity = lock(&self.cell);
        let current = serde_json::to_value(&*entity).map_err(|e| StorageError::Corruption {
            message: e.to_string(),
        })?;
        if current == self.snapshot {
            return Ok(None);
        }

        entity.validate().map_err(|e| StorageError::Constraint {
            message: format!(
                "tracked {} {} is invalid: {}",
                T::resource_name_singular(),
                self.id,
                e
            ),
        })?;

        entity.touch(now);
        let row = serde_json::to_value(&*entity).map_err(|e| StorageError::Corruption {
            message: e.to_string(),
        })?;
        self.pending = Some(row.clone());

        Ok(Some(Mutation::Update {
            table: T::resource_name(),
            id: self.id,
            row,
        }))
    }

    fn accept(&mut self) {
        if let Some(row) = self.pending.take() {
            self.snapshot = row;
        }
    }
}

#[derive(Default)]
struct WorkState {
    staged: Vec<Mutation>,
    tracked: Vec<Box<dyn TrackedEntry>>,
}

/// Batch of staged mutations committed atomically to the store
///
/// Created once per request. All repositories of a request share the same
/// unit of work, so a single [`UnitOfWork::save`] persists all of them.
pub struct UnitOfWork {
    store: Arc<dyn EntityStore>,
    deadline: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<WorkState>,
}

impl UnitOfWork {
    /// Create a unit of work whose store calls must finish within `deadline`
    pub fn new(store: Arc<dyn EntityStore>, deadline: Duration) -> Self {
        Self {
            store,
            deadline,
            clock: Arc::new(SystemClock::new()),
            state: Mutex::new(WorkState::default()),
        }
    }

    /// Stamp modifications with `clock` instead of the system time
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Current time of the unit of work's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Number of explicitly staged mutations waiting for `save`
    pub fn pending(&self) -> usize {
        lock(&self.state).staged.len()
    }

    /// Number of entries currently under change tracking
    pub fn tracked(&self) -> usize {
        lock(&self.state).tracked.len()
    }

    /// Load every `T` accepted by `predicate`
    pub async fn query<T, P>(&self, predicate: P, track: bool) -> StorageResult<Vec<EntityEntry<T>>>
    where
        T: Entity,
        P: Fn(&T) -> bool + Send + Sync,
    {
        // Undecodable rows pass the filter so that decoding reports them
        let row_filter = |row: &Value| T::deserialize(row).map(|e| predicate(&e)).unwrap_or(true);
        let rows = self
            .with_deadline("query", self.store.query(T::resource_name(), &row_filter))
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        let mut tracked: Vec<Box<dyn TrackedEntry>> = Vec::new();

        for row in rows {
            let entity = T::deserialize(&row).map_err(|e| StorageError::Corruption {
                message: format!("{} row: {}", T::resource_name_singular(), e),
            })?;

            if track {
                let cell = Arc::new(Mutex::new(entity));
                tracked.push(Box::new(TrackedCell {
                    id: lock(&cell).id(),
                    cell: cell.clone(),
                    snapshot: row,
                    pending: None,
                }));
                entries.push(EntityEntry::tracked(cell));
            } else {
                entries.push(EntityEntry::detached(entity));
            }
        }

        if !tracked.is_empty() {
            lock(&self.state).tracked.extend(tracked);
        }

        Ok(entries)
    }

    /// Stage a mutation for the next save
    ///
    /// An explicit update or delete supersedes change tracking for that row.
    pub fn stage(&self, mutation: Mutation) {
        let mut state = lock(&self.state);
        if !matches!(mutation, Mutation::Insert { .. }) {
            let (table, id) = (mutation.table(), mutation.id());
            state
                .tracked
                .retain(|entry| !(entry.table() == table && entry.id() == id));
        }
        state.staged.push(mutation);
    }

    /// Persist all staged and detected changes in one commit
    ///
    /// Returns the number of mutations written. On failure nothing is
    /// persisted and the unit of work is rolled back: staged mutations are
    /// dropped and tracked entries are detached.
    pub async fn save(&self) -> StorageResult<usize> {
        let now = self.clock.now();
        let batch = {
            let mut state = lock(&self.state);
            let mut batch = std::mem::take(&mut state.staged);
            let mut detected = Vec::new();
            for entry in state.tracked.iter_mut() {
                match entry.detect_change(now) {
                    Ok(Some(mutation)) => detected.push(mutation),
                    Ok(None) => {}
                    Err(e) => {
                        state.tracked.clear();
                        return Err(e);
                    }
                }
            }
            batch.extend(detected);
            batch
        };

        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        match self.with_deadline("commit", self.store.commit(batch)).await {
            Ok(()) => {
                let mut state = lock(&self.state);
                for entry in state.tracked.iter_mut() {
                    entry.accept();
                }
                tracing::debug!(mutations = count, "unit of work committed");
                Ok(count)
            }
            Err(e) => {
                lock(&self.state).tracked.clear();
                tracing::warn!(mutations = count, error = %e, "unit of work rolled back");
                Err(e)
            }
        }
    }

    /// Drop everything staged and stop tracking
    pub fn discard(&self) {
        let mut state = lock(&self.state);
        state.staged.clear();
        state.tracked.clear();
    }

    async fn with_deadline<R>(
        &self,
        operation: &str,
        fut: impl Future<Output = StorageResult<R>>,
    ) -> StorageResult<R> {
        tokio::time::timeout(self.deadline, fut)
            .await
            .map_err(|_| StorageError::Timeout {
                operation: operation.to_string(),
                after: self.deadline,
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryEntityStore;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use validator::Validate;

    #[derive(Clone, Debug, Serialize, Deserialize, Validate)]
    struct Widget {
        id: Uuid,
        #[validate(length(min = 1))]
        label: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl Widget {
        fn new(label: &str) -> Self {
            let now = Utc::now();
            Self {
                id: Uuid::new_v4(),
                label: label.to_string(),
                created_at: now,
                updated_at: now,
            }
        }

        fn insert(&self) -> Mutation {
            Mutation::Insert {
                table: Self::resource_name(),
                id: self.id,
                row: serde_json::to_value(self).unwrap(),
            }
        }
    }

    impl Entity for Widget {
        fn resource_name() -> &'static str {
            "widgets"
        }
        fn resource_name_singular() -> &'static str {
            "widget"
        }
        fn id(&self) -> Uuid {
            self.id
        }
        fn created_at(&self) -> DateTime<Utc> {
            self.created_at
        }
        fn updated_at(&self) -> DateTime<Utc> {
            self.updated_at
        }
        fn touch(&mut self, at: DateTime<Utc>) {
            self.updated_at = at;
        }
    }

    fn unit_of_work(store: &InMemoryEntityStore) -> UnitOfWork {
        UnitOfWork::new(Arc::new(store.clone()), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_nothing_is_written_before_save() {
        let store = InMemoryEntityStore::new();
        let uow = unit_of_work(&store);

        uow.stage(Widget::new("a").insert());
        assert_eq!(uow.pending(), 1);
        assert_eq!(store.row_count("widgets"), 0);

        assert_eq!(uow.save().await.unwrap(), 1);
        assert_eq!(store.row_count("widgets"), 1);
        assert_eq!(uow.pending(), 0);
    }

    #[tokio::test]
    async fn test_tracked_modification_is_saved_once() {
        let store = InMemoryEntityStore::new();
        let seed = unit_of_work(&store);
        seed.stage(Widget::new("before").insert());
        seed.save().await.unwrap();

        let uow = unit_of_work(&store);
        let entries = uow.query::<Widget, _>(|_| true, true).await.unwrap();
        entries[0].modify(|w| w.label = "after".to_string());

        assert_eq!(uow.save().await.unwrap(), 1);
        // Snapshot refreshed: a second save has nothing to do
        assert_eq!(uow.save().await.unwrap(), 0);

        let reread = unit_of_work(&store)
            .query::<Widget, _>(|_| true, false)
            .await
            .unwrap();
        assert_eq!(reread[0].get().label, "after");
    }

    #[tokio::test]
    async fn test_untracked_modification_is_not_saved() {
        let store = InMemoryEntityStore::new();
        let seed = unit_of_work(&store);
        seed.stage(Widget::new("before").insert());
        seed.save().await.unwrap();

        let uow = unit_of_work(&store);
        let entries = uow.query::<Widget, _>(|_| true, false).await.unwrap();
        entries[0].modify(|w| w.label = "after".to_string());

        assert!(!entries[0].is_tracked());
        assert_eq!(uow.tracked(), 0);
        assert_eq!(uow.save().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_tracked_change_fails_save() {
        let store = InMemoryEntityStore::new();
        let seed = unit_of_work(&store);
        seed.stage(Widget::new("ok").insert());
        seed.save().await.unwrap();

        let uow = unit_of_work(&store);
        let entries = uow.query::<Widget, _>(|_| true, true).await.unwrap();
        entries[0].modify(|w| w.label.clear());

        let err = uow.save().await.unwrap_err();
        assert!(matches!(err, StorageError::Constraint { .. }));
        assert_eq!(uow.tracked(), 0);
    }

    #[tokio::test]
    async fn test_explicit_delete_supersedes_tracking() {
        let store = InMemoryEntityStore::new();
        let seed = unit_of_work(&store);
        let widget = Widget::new("doomed");
        seed.stage(widget.insert());
        seed.save().await.unwrap();

        let uow = unit_of_work(&store);
        let entries = uow.query::<Widget, _>(|_| true, true).await.unwrap();
        entries[0].modify(|w| w.label = "edited".to_string());
        uow.stage(Mutation::Delete {
            table: "widgets",
            id: widget.id,
        });

        assert_eq!(uow.save().await.unwrap(), 1);
        assert_eq!(store.row_count("widgets"), 0);
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = InMemoryEntityStore::new().with_latency(Duration::from_millis(200));
        let uow = UnitOfWork::new(Arc::new(store.clone()), Duration::from_millis(20));

        let err = uow.query::<Widget, _>(|_| true, false).await.unwrap_err();
        assert!(err.is_retryable());

        uow.stage(Widget::new("late").insert());
        let err = uow.save().await.unwrap_err();
        assert!(matches!(err, StorageError::Timeout { .. }));
        assert_eq!(uow.pending(), 0);
    }

    #[tokio::test]
    async fn test_into_inner_of_tracked_entry_clones() {
        let store = InMemoryEntityStore::new();
        let seed = unit_of_work(&store);
        seed.stage(Widget::new("shared").insert());
        seed.save().await.unwrap();

        let uow = unit_of_work(&store);
        let mut entries = uow.query::<Widget, _>(|_| true, true).await.unwrap();
        let widget = entries.remove(0).into_inner();
        assert_eq!(widget.label, "shared");
    }
}
