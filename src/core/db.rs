use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use spin_sdk::key_value::Store;

use crate::config::WRITE_ATTEMPTS;
use crate::core::context::AppContext;
use crate::models::models::{ProfileUpdate, RegisterRequest};
use crate::{follow, messages, users};

/// Byte-level key-value storage. Each call is atomic for its own key and
/// nothing more; multi-key consistency is the caller's job.
pub trait KvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// JSON documents on top of any [`KvStore`].
pub trait JsonStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>>;
    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()>;

    /// Read-modify-write of a single document. Returns `None` without writing
    /// when the document does not exist.
    fn update_json<T, R, F>(&self, key: &str, f: F) -> anyhow::Result<Option<R>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> R;
}

impl<S: KvStore + ?Sized> JsonStore for S {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("corrupt document at {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, &bytes)
    }

    fn update_json<T, R, F>(&self, key: &str, f: F) -> anyhow::Result<Option<R>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> R,
    {
        let Some(mut doc) = self.get_json::<T>(key)? else {
            return Ok(None);
        };
        let out = f(&mut doc);
        self.set_json(key, &doc)?;
        Ok(Some(out))
    }
}

/// Runs one write leg of a workflow, retrying up to [`WRITE_ATTEMPTS`] times.
pub fn with_retry<T>(what: &str, mut op: impl FnMut() -> anyhow::Result<T>) -> anyhow::Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < WRITE_ATTEMPTS => {
                tracing::warn!(step = what, attempt, error = %err, "store write failed, retrying");
                attempt += 1;
            }
            Err(err) => return Err(err.context(format!("{} failed after {} attempts", what, attempt))),
        }
    }
}

/// Runs a compensating or cleanup write with the same retry budget. A final
/// failure is logged and swallowed; the caller is already reporting an error.
pub fn best_effort<T>(what: &str, op: impl FnMut() -> anyhow::Result<T>) -> Option<T> {
    match with_retry(what, op) {
        Ok(value) => Some(value),
        Err(err) => {
            let detail = format!("{:#}", err);
            tracing::error!(step = what, error = %detail, "compensation failed, store left inconsistent");
            None
        }
    }
}

// === Spin key-value store ===

pub struct SpinStore {
    inner: Store,
}

impl SpinStore {
    pub fn open_default() -> anyhow::Result<Self> {
        let inner = Store::open_default().context("default key-value store is not available")?;
        Ok(Self { inner })
    }
}

impl KvStore for SpinStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.inner.get(key)?)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        Ok(self.inner.set(key, value)?)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        Ok(self.inner.delete(key)?)
    }
}

// === In-memory store ===

/// Shared in-process store for the native server and tests. Clones share data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let Ok(map) = self.inner.lock() else {
            return Vec::new();
        };
        let mut keys: Vec<String> = map.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        keys.sort();
        keys
    }

    fn map(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.map()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.map()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.map()?.remove(key);
        Ok(())
    }
}

/// Memory store whose writes fail for keys matching a predicate, while the
/// predicate's switch is on.
#[cfg(test)]
pub(crate) struct FaultyStore {
    pub inner: MemoryStore,
    fail_set: Box<dyn Fn(&str) -> bool>,
    fail_delete: Box<dyn Fn(&str) -> bool>,
    pub armed: std::rc::Rc<std::cell::Cell<bool>>,
}

#[cfg(test)]
impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_set: Box::new(|_| false),
            fail_delete: Box::new(|_| false),
            armed: std::rc::Rc::new(std::cell::Cell::new(true)),
        }
    }

    pub fn failing_sets(mut self, pred: impl Fn(&str) -> bool + 'static) -> Self {
        self.fail_set = Box::new(pred);
        self
    }

    pub fn failing_deletes(mut self, pred: impl Fn(&str) -> bool + 'static) -> Self {
        self.fail_delete = Box::new(pred);
        self
    }

    /// A context over this store; media blobs go straight to `inner`.
    pub fn into_context(self) -> AppContext {
        let media = crate::media::KvMediaStore::new(self.inner.clone(), "");
        AppContext::new(Box::new(self), Box::new(media), crate::core::context::test_settings())
    }
}

#[cfg(test)]
impl KvStore for FaultyStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        if self.armed.get() && (self.fail_set)(key) {
            anyhow::bail!("set {} rejected", key);
        }
        self.inner.set(key, value)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        if self.armed.get() && (self.fail_delete)(key) {
            anyhow::bail!("delete {} rejected", key);
        }
        self.inner.delete(key)
    }
}

// === Demo data ===

const DEMO_USERS: [&str; 3] = ["test", "alice", "bob"];

fn demo_email(name: &str) -> String {
    format!("{}@bord.local", name)
}

/// Registers the demo accounts if they are missing. Safe to call repeatedly.
pub fn seed_demo_data(ctx: &AppContext) -> anyhow::Result<()> {
    let mut ids = HashMap::new();

    for name in DEMO_USERS {
        let id = match users::find_user_id_by_email(ctx, &demo_email(name))? {
            Some(id) => id,
            None => {
                let request = RegisterRequest {
                    username: name.to_string(),
                    email: demo_email(name),
                    password: name.to_string(),
                };
                let user = users::register(ctx, request).map_err(|e| anyhow::anyhow!("seeding {}: {}", name, e))?;
                let bio = ProfileUpdate {
                    bio: Some(format!("Hi, I'm {}!", name)),
                    ..ProfileUpdate::default()
                };
                users::edit_profile(ctx, &user.id, bio).map_err(|e| anyhow::anyhow!("seeding {}: {}", name, e))?;
                user.id
            }
        };
        ids.insert(name, id);
    }

    let (test, alice, bob) = (&ids["test"], &ids["alice"], &ids["bob"]);

    let test_user = users::get_profile(ctx, test).map_err(|e| anyhow::anyhow!("seeding: {}", e))?;
    if !test_user.following.contains(bob) {
        follow::follow_or_unfollow(ctx, test, bob).map_err(|e| anyhow::anyhow!("seeding: {}", e))?;
    }

    let history = messages::get_messages(ctx, alice, bob).map_err(|e| anyhow::anyhow!("seeding: {}", e))?;
    if history.is_empty() {
        messages::send_message(ctx, alice, bob, "Welcome to Bord!")
            .map_err(|e| anyhow::anyhow!("seeding: {}", e))?;
    }

    tracing::info!("demo data ready");
    Ok(())
}
