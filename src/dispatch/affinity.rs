use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Rc<Affinity>>> = RefCell::new(None);
}

/// Typed key into an [`Affinity`] slot store.
///
/// Keys are globally unique and can be reserved from any thread, while the
/// value they point at only ever exists on the owning worker thread.
pub struct Slot<T> {
    id: u64,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> Slot<T> {
    /// Reserves a fresh, unoccupied slot key.
    pub fn reserve() -> Self {
        Slot {
            id: NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed),
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<T> {}

impl<T> std::fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Slot").field(&self.id).finish()
    }
}

/// Capability token proving the caller is on a dispatcher's worker thread.
///
/// `Affinity` is `!Send`: it is created by the worker run-loop and handed to
/// jobs by reference, so holding one is proof of thread residency. The slot
/// store keeps session state that is itself `!Send` (open handles, live
/// result sets) alive on the worker between jobs. When the run-loop drains,
/// the `Affinity` drops with every remaining slot, releasing confined
/// resources even if no explicit teardown job ran.
pub struct Affinity {
    dispatcher_id: u64,
    slots: RefCell<HashMap<u64, Box<dyn Any>>>,
    _not_send: PhantomData<*const ()>,
}

impl Affinity {
    pub(crate) fn new(dispatcher_id: u64) -> Self {
        Self {
            dispatcher_id,
            slots: RefCell::new(HashMap::new()),
            _not_send: PhantomData,
        }
    }

    /// Installs `affinity` as the calling thread's current token. Only the
    /// worker run-loop does this, once, before draining jobs.
    pub(crate) fn install(affinity: Rc<Affinity>) {
        CURRENT.with(|current| *current.borrow_mut() = Some(affinity));
    }

    pub(crate) fn uninstall() {
        CURRENT.with(|current| current.borrow_mut().take());
    }

    /// The calling thread's token, if it is the worker of `dispatcher_id`.
    pub(crate) fn current(dispatcher_id: u64) -> Option<Rc<Affinity>> {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .filter(|affinity| affinity.dispatcher_id == dispatcher_id)
                .cloned()
        })
    }

    /// Stores `value` under `slot`, returning the previous occupant if any.
    pub fn insert<T: 'static>(&self, slot: Slot<T>, value: T) -> Option<T> {
        self.slots
            .borrow_mut()
            .insert(slot.id, Box::new(value))
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    pub fn occupied<T: 'static>(&self, slot: Slot<T>) -> bool {
        self.slots.borrow().contains_key(&slot.id)
    }

    /// Runs `f` with mutable access to the slot value. The value is removed
    /// for the duration of the call and reinstated afterwards, so reentrant
    /// access to the same slot observes an empty slot instead of aliasing.
    pub fn with<T: 'static, R>(&self, slot: Slot<T>, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let boxed = self.slots.borrow_mut().remove(&slot.id)?;
        let mut value = match boxed.downcast::<T>() {
            Ok(value) => *value,
            Err(other) => {
                self.slots.borrow_mut().insert(slot.id, other);
                return None;
            }
        };
        let out = f(&mut value);
        self.slots.borrow_mut().insert(slot.id, Box::new(value));
        Some(out)
    }

    /// Removes and returns the slot value. Unoccupied slots yield `None`,
    /// which makes teardown paths naturally idempotent.
    pub fn take<T: 'static>(&self, slot: Slot<T>) -> Option<T> {
        self.slots
            .borrow_mut()
            .remove(&slot.id)
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }
}
