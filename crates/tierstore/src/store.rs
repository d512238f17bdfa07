//! Store capability contract
//!
//! Anything usable as a cache source or edge implements [`Store`]. Calls are
//! async regardless of whether the backend is, so the orchestrator never has
//! to care how a tier answers.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};

/// Key/value store usable as a cache tier
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a value. `Ok(None)` is a miss.
    async fn get(&self, id: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one
    async fn save(&self, id: &str, value: Value) -> Result<()>;

    /// Remove a value
    async fn delete(&self, id: &str) -> Result<()>;

    /// Whether [`Store::forget`] is implemented
    fn can_forget(&self) -> bool {
        false
    }

    /// Evict up to `amount` entries by the store's own policy.
    /// Returns how many entries were evicted.
    async fn forget(&self, _amount: usize) -> Result<usize> {
        Err(Error::Unsupported("forget"))
    }
}

type GetFn = dyn Fn(&str) -> Result<Option<Value>> + Send + Sync;
type SaveFn = dyn Fn(&str, Value) -> Result<()> + Send + Sync;
type DeleteFn = dyn Fn(&str) -> Result<()> + Send + Sync;
type ForgetFn = dyn Fn(usize) -> Result<usize> + Send + Sync;

/// Adapter turning plain synchronous closures into a [`Store`]
///
/// ```
/// use tierstore::FnStore;
///
/// let store = FnStore::new(
///     |_id| Ok(Some(serde_json::json!(123))),
///     |_id, _value| Ok(()),
///     |_id| Ok(()),
/// );
/// # let _ = store;
/// ```
pub struct FnStore {
    get: Box<GetFn>,
    save: Box<SaveFn>,
    delete: Box<DeleteFn>,
    forget: Option<Box<ForgetFn>>,
}

impl FnStore {
    /// Build a store from get/save/delete closures
    pub fn new<G, S, D>(get: G, save: S, delete: D) -> Self
    where
        G: Fn(&str) -> Result<Option<Value>> + Send + Sync + 'static,
        S: Fn(&str, Value) -> Result<()> + Send + Sync + 'static,
        D: Fn(&str) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            get: Box::new(get),
            save: Box::new(save),
            delete: Box::new(delete),
            forget: None,
        }
    }

    /// Add an eviction closure
    pub fn with_forget<F>(mut self, forget: F) -> Self
    where
        F: Fn(usize) -> Result<usize> + Send + Sync + 'static,
    {
        self.forget = Some(Box::new(forget));
        self
    }
}

#[async_trait]
impl Store for FnStore {
    async fn get(&self, id: &str) -> Result<Option<Value>> {
        (self.get)(id)
    }

    async fn save(&self, id: &str, value: Value) -> Result<()> {
        (self.save)(id, value)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        (self.delete)(id)
    }

    fn can_forget(&self) -> bool {
        self.forget.is_some()
    }

    async fn forget(&self, amount: usize) -> Result<usize> {
        match &self.forget {
            Some(forget) => forget(amount),
            None => Err(Error::Unsupported("forget")),
        }
    }
}
