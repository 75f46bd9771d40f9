use fxhash::FxBuildHasher;

/// Hash map used throughout the engine. Iteration order is unspecified, so anything that
/// must be deterministic (candidate order, final node lists) is kept in a `Vec` instead.
pub type Map<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;

pub type Set<T> = hashbrown::HashSet<T, FxBuildHasher>;
