//! Static extension manifests and the loader that instantiates them.
//!
//! An extension interface (for example `dyn Serializer`) is described by a
//! compiled-in manifest: a slice of [`Extension`] entries naming each
//! implementation, whether it is a singleton, and how to build it.
//!
//! The [`ExtensionLoader`] is an ordinary value, not a global. Whoever owns
//! it decides its scope; normally one per process context. Instances are
//! cached per manifest, so several manifests for one interface coexist;
//! singleton entries are shared by name across all of them.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use rpcwire::codec::{ExtensionLoader, Serializer, SERIALIZER_EXTENSIONS};
//!
//! let loader = ExtensionLoader::new();
//! let first: Vec<Arc<dyn Serializer>> = loader.load(SERIALIZER_EXTENSIONS);
//! let again = loader.load(SERIALIZER_EXTENSIONS);
//! assert!(Arc::ptr_eq(&first[0], &again[0]));
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One entry of an extension manifest.
pub struct Extension<T: ?Sized + 'static> {
    /// Unique name within the interface.
    pub name: &'static str,
    /// Singleton entries keep their instance across [`ExtensionLoader::reload`].
    pub singleton: bool,
    /// Constructor.
    pub create: fn() -> Arc<T>,
}

type AnyBox = Box<dyn Any + Send + Sync>;

/// Interface type plus the manifest's address and length.
type ManifestKey = (TypeId, usize, usize);

fn manifest_key<T: ?Sized + 'static>(manifest: &[Extension<T>]) -> ManifestKey {
    (TypeId::of::<T>(), manifest.as_ptr() as usize, manifest.len())
}

/// Loads extension manifests once and caches the instances.
#[derive(Default)]
pub struct ExtensionLoader {
    /// Manifest -> `Vec<(name, Arc<T>)>`.
    loaded: Mutex<HashMap<ManifestKey, AnyBox>>,
    /// (interface type, name) -> `Arc<T>` for singleton entries.
    singletons: Mutex<HashMap<(TypeId, &'static str), AnyBox>>,
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ExtensionLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate every entry of `manifest`, in manifest order.
    ///
    /// The first call per manifest builds the instances; later calls return
    /// the cached ones.
    pub fn load<T>(&self, manifest: &[Extension<T>]) -> Vec<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.load_named(manifest)
            .into_iter()
            .map(|(_, instance)| instance)
            .collect()
    }

    /// Look up one implementation by name.
    pub fn get<T>(&self, manifest: &[Extension<T>], name: &str) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.load_named(manifest)
            .into_iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, instance)| instance)
    }

    /// Drop the cached instances of a manifest and load it again.
    ///
    /// Non-singleton entries are rebuilt; singleton entries come back as the
    /// very same instance.
    pub fn reload<T>(&self, manifest: &[Extension<T>]) -> Vec<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        lock(&self.loaded).remove(&manifest_key(manifest));
        self.load(manifest)
    }

    fn load_named<T>(&self, manifest: &[Extension<T>]) -> Vec<(&'static str, Arc<T>)>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = manifest_key(manifest);
        let mut loaded = lock(&self.loaded);

        if let Some(cached) = loaded
            .get(&key)
            .and_then(|boxed| boxed.downcast_ref::<Vec<(&'static str, Arc<T>)>>())
        {
            return cached.clone();
        }

        let instances: Vec<(&'static str, Arc<T>)> = manifest
            .iter()
            .map(|entry| (entry.name, self.instantiate(entry)))
            .collect();
        tracing::debug!(
            "Loaded {} extension(s) for {}",
            instances.len(),
            std::any::type_name::<T>()
        );

        loaded.insert(key, Box::new(instances.clone()));
        instances
    }

    fn instantiate<T>(&self, entry: &Extension<T>) -> Arc<T>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if !entry.singleton {
            return (entry.create)();
        }

        let key = (TypeId::of::<T>(), entry.name);
        let mut singletons = lock(&self.singletons);
        if let Some(existing) = singletons
            .get(&key)
            .and_then(|boxed| boxed.downcast_ref::<Arc<T>>())
        {
            return existing.clone();
        }

        let instance = (entry.create)();
        singletons.insert(key, Box::new(instance.clone()));
        instance
    }
}
