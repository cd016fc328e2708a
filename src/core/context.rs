use crate::config::Settings;
use crate::core::db::{KvStore, MemoryStore, SpinStore};
use crate::media::{KvMediaStore, MediaStore};

/// Everything an operation needs besides its arguments. Built once at
/// startup (or once per request inside the Spin component) and passed down.
pub struct AppContext {
    store: Box<dyn KvStore>,
    media: Box<dyn MediaStore>,
    pub settings: Settings,
}

impl AppContext {
    pub fn new(store: Box<dyn KvStore>, media: Box<dyn MediaStore>, settings: Settings) -> Self {
        Self { store, media, settings }
    }

    /// Context over Spin's default key-value store, media blobs included.
    pub fn spin(settings: Settings) -> anyhow::Result<Self> {
        let store = SpinStore::open_default()?;
        let media = KvMediaStore::new(SpinStore::open_default()?, &settings.public_base_url);
        Ok(Self::new(Box::new(store), Box::new(media), settings))
    }

    /// Context over a shared [`MemoryStore`]; clones of `store` see the same data.
    pub fn in_memory(store: MemoryStore, settings: Settings) -> Self {
        let media = KvMediaStore::new(store.clone(), &settings.public_base_url);
        Self::new(Box::new(store), Box::new(media), settings)
    }

    pub fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    pub fn media(&self) -> &dyn MediaStore {
        self.media.as_ref()
    }
}

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    Settings {
        secret_key: "test-secret".to_string(),
        token_expiration_hours: 24,
        public_base_url: String::new(),
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> (AppContext, MemoryStore) {
    let store = MemoryStore::new();
    (AppContext::in_memory(store.clone(), test_settings()), store)
}
