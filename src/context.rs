//! Per-request value table.
//!
//! Middleware hands results to the handlers behind it (the authenticated
//! identity, the active CSRF token, the router's `Allow` list) through the
//! request's [`Context`]. Entries are addressed by a [`ContextKey<T>`], which
//! carries both a name and the value type. Two keys that share a name but not
//! a type are different slots, so a CSRF token can never be read back as a
//! JWT identity by accident.
//!
//! ```rust
//! use bulwark::{Context, ContextKey};
//!
//! #[derive(Debug, PartialEq)]
//! struct TenantId(u64);
//!
//! const TENANT: ContextKey<TenantId> = ContextKey::new("tenant");
//!
//! let mut ctx = Context::default();
//! ctx.insert(TENANT, TenantId(7));
//! assert_eq!(ctx.get(TENANT), Some(&TenantId(7)));
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Typed handle to one slot of a [`Context`].
pub struct ContextKey<T> {
    name: &'static str,
    // fn() -> T keeps the key Send + Sync whatever T is.
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self { name, _marker: PhantomData }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self { *self }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

type Slot = (TypeId, &'static str);

/// Values attached to one request for the rest of its lifetime.
///
/// Owned by the [`Request`](crate::Request); dropped with it.
#[derive(Default)]
pub struct Context {
    values: HashMap<Slot, Box<dyn Any + Send + Sync>>,
}

impl Context {
    /// Stores `value` under `key`, returning the previous value if any.
    pub fn insert<T: Send + Sync + 'static>(&mut self, key: ContextKey<T>, value: T) -> Option<T> {
        self.values
            .insert(slot(key), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: 'static>(&self, key: ContextKey<T>) -> Option<&T> {
        self.values.get(&slot(key)).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: 'static>(&mut self, key: ContextKey<T>) -> Option<&mut T> {
        self.values.get_mut(&slot(key)).and_then(|v| v.downcast_mut::<T>())
    }

    pub fn remove<T: 'static>(&mut self, key: ContextKey<T>) -> Option<T> {
        self.values
            .remove(&slot(key))
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    pub fn contains<T: 'static>(&self, key: ContextKey<T>) -> bool {
        self.values.contains_key(&slot(key))
    }

    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys().map(|(_, name)| name)).finish()
    }
}

fn slot<T: 'static>(key: ContextKey<T>) -> Slot {
    (TypeId::of::<T>(), key.name)
}
