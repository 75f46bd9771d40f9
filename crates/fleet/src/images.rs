use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use provisioning::NodeType;

/// A value with the time it was last refreshed.
#[derive(Clone, Debug)]
pub struct CachedValue<T> {
    value: T,
    refreshed_at: Instant,
    ttl: Duration,
}

impl<T> CachedValue<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        CachedValue {
            value,
            refreshed_at: Instant::now(),
            ttl,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn refreshed_at(&self) -> Instant {
        self.refreshed_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.refreshed_at) >= self.ttl
    }

    pub fn refresh(&mut self, value: T, now: Instant) {
        self.value = value;
        self.refreshed_at = now;
    }
}

type ImageMap = Arc<BTreeMap<NodeType, String>>;

/// Container images per node type.
///
/// Stored images are the source of truth. Readers use a cached copy, which is rebuilt
/// by at most one thread at a time once it expires.
pub struct ContainerImages {
    default_image: String,
    stored: RwLock<BTreeMap<NodeType, String>>,
    cache: RwLock<CachedValue<ImageMap>>,
    refresh_lock: Mutex<()>,
}

impl ContainerImages {
    pub fn new(default_image: impl Into<String>, cache_ttl: Duration) -> Self {
        ContainerImages {
            default_image: default_image.into(),
            stored: RwLock::new(BTreeMap::new()),
            cache: RwLock::new(CachedValue::new(Arc::default(), cache_ttl)),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn default_image(&self) -> &str {
        &self.default_image
    }

    /// Image used by nodes of the given type. Hosts use the image of their children.
    pub fn image_for(&self, node_type: NodeType) -> String {
        let images = self.images();
        images
            .get(&node_type.child_type())
            .cloned()
            .unwrap_or_else(|| self.default_image.clone())
    }

    pub fn set_image(&self, node_type: NodeType, image: impl Into<String>) -> crate::Result<()> {
        if node_type.is_host() {
            return Err(provisioning::Error::InvalidRequest(format!(
                "Cannot set container image for host type {node_type}, set it for {} instead",
                node_type.child_type()
            ))
            .into());
        }
        let image = image.into();
        log::info!("Setting container image for {node_type} to {image}");
        self.stored.write().insert(node_type, image);
        self.refresh(Instant::now());
        Ok(())
    }

    pub fn remove_image(&self, node_type: NodeType) {
        if self.stored.write().remove(&node_type).is_some() {
            self.refresh(Instant::now());
        }
    }

    fn images(&self) -> ImageMap {
        let now = Instant::now();
        {
            let cache = self.cache.read();
            if !cache.is_expired(now) {
                return cache.value().clone();
            }
        }
        self.refresh_if_expired(now)
    }

    fn refresh_if_expired(&self, now: Instant) -> ImageMap {
        let _guard = self.refresh_lock.lock();
        {
            let cache = self.cache.read();
            if !cache.is_expired(now) {
                return cache.value().clone();
            }
        }
        self.refresh(now)
    }

    fn refresh(&self, now: Instant) -> ImageMap {
        let images: ImageMap = Arc::new(self.stored.read().clone());
        self.cache.write().refresh(images.clone(), now);
        images
    }
}
