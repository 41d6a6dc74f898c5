//! Lookup results.
//!
//! A cache lookup either hits or misses. There is no third "maybe" state and
//! no implicit fallback: callers must handle both arms.

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheResult<T> {
    /// The entry was present and not expired.
    Hit(T),
    /// Absent, expired, or caching disabled.
    Miss,
}

impl<T> CacheResult<T> {
    /// Returns true on a hit.
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// Returns true on a miss.
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }

    /// Borrow the value on a hit.
    pub fn as_ref(&self) -> CacheResult<&T> {
        match self {
            Self::Hit(v) => CacheResult::Hit(v),
            Self::Miss => CacheResult::Miss,
        }
    }

    /// Convert into an `Option`, dropping the hit/miss distinction.
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Hit(v) => Some(v),
            Self::Miss => None,
        }
    }

    /// Map the hit value.
    pub fn map<U, F>(self, f: F) -> CacheResult<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Hit(v) => CacheResult::Hit(f(v)),
            Self::Miss => CacheResult::Miss,
        }
    }

    /// Return the hit value or compute one.
    pub fn unwrap_or_else<F>(self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        match self {
            Self::Hit(v) => v,
            Self::Miss => f(),
        }
    }
}

impl<T> From<Option<T>> for CacheResult<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::Hit(v),
            None => Self::Miss,
        }
    }
}
