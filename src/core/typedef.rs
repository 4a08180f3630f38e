//! Type definitions for commonly used structures across the library.

/// Hash map for small keys.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// A string optimized for small strings shorter than 23 characters.
///
/// Uniform names and debug labels fit comfortably.
pub type SmlString = smartstring::SmartString<smartstring::LazyCompact>;

/// A vector with fixed capacity.
pub type ArrVec<T, const N: usize> = arrayvec::ArrayVec<T, N>;
