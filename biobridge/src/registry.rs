use crate::error::{Error, Result};

use dashmap::DashMap;

use std::{
    ffi::c_void,
    fmt,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// An opaque handle standing in for an object that foreign code needs to
/// refer back to.
///
/// Tokens are drawn from a counter, never from an address, so a token
/// surviving in foreign memory can at worst fail to resolve. Zero is
/// never issued; it is reserved for "no object" (a null data field).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Token(NonZeroUsize);

impl Token {
    /// The raw integer value of this token.
    pub fn get(self) -> usize {
        self.0.get()
    }

    /// Encodes the token for storage in a foreign `void *` field. The
    /// result is never dereferenced.
    pub(crate) fn into_data(self) -> *mut c_void {
        self.0.get() as *mut c_void
    }

    /// Decodes a foreign data field, `None` for null.
    pub(crate) fn from_data(data: *mut c_void) -> Option<Self> {
        NonZeroUsize::new(data as usize).map(Self)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Thread-safe table mapping [`Token`]s to shared objects.
///
/// Lookups hand out an `Arc`, so a `get` that races a `del` on another
/// thread either sees the object (and keeps it alive for as long as it
/// holds the `Arc`) or sees nothing. Once `del` has returned every later
/// `get` of that token misses. Tokens are never reused.
pub struct Registry<T> {
    entries: DashMap<Token, Arc<T>>,
    next: AtomicUsize,
}

impl<T> Registry<T> {
    /// Creates an empty registry whose first token is 1.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next: AtomicUsize::new(1),
        }
    }

    /// Registers `value` and returns its freshly issued token.
    ///
    /// Fails with [`Error::CreateFailed`] once every token has been
    /// issued; the counter never wraps back onto live tokens.
    pub fn add(&self, value: Arc<T>) -> Result<Token> {
        let raw = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
            .map_err(|_| {
                log::error!("registry token space exhausted");
                Error::CreateFailed
            })?;
        let token = NonZeroUsize::new(raw).map(Token).ok_or(Error::CreateFailed)?;
        self.entries.insert(token, value);
        Ok(token)
    }

    /// Looks up `token`, `None` if it was never issued or has been
    /// removed.
    pub fn get(&self, token: Token) -> Option<Arc<T>> {
        self.entries.get(&token).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes `token`. Removing an absent token is a no-op.
    pub fn del(&self, token: Token) {
        self.entries.remove(&token);
    }

    /// Removes `token` only if it currently maps to `expected`. Returns
    /// whether an entry was removed.
    pub fn del_if(&self, token: Token, expected: &T) -> bool {
        self.entries
            .remove_if(&token, |_, value| std::ptr::eq(Arc::as_ptr(value), expected))
            .is_some()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
impl<T> Registry<T> {
    fn starting_at(next: usize) -> Self {
        Self {
            entries: DashMap::new(),
            next: AtomicUsize::new(next),
        }
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
