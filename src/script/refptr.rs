//! Owning handle for externally reference-counted engine objects.
//!
//! The engine keeps its own reference count for objects it hands out to the
//! host. A raw handle (the `T` inside a [`RefPtr`]) is only an address: copying
//! it does not touch the count. [`RefPtr`] turns that into ownership:
//!
//! - cloning increments the external count,
//! - moving transfers the reference without touching the count,
//! - dropping or reassigning releases the reference if non-null.

use std::fmt;

/// An object whose lifetime is managed by external add-ref/release calls.
///
/// Implementors are cheap, non-owning raw handles (an id plus a way to reach
/// the owner of the count), comparable to a raw pointer.
pub trait RefCounted: Clone {
    /// Increment the external reference count.
    fn add_ref(&self);

    /// Decrement the external reference count.
    fn release(&self);
}

/// Owns exactly one external reference to a `T`, or nothing.
pub struct RefPtr<T: RefCounted> {
    ptr: Option<T>,
}

impl<T: RefCounted> RefPtr<T> {
    /// Create a null handle.
    pub fn null() -> Self {
        Self { ptr: None }
    }

    /// Take a new reference to `raw`.
    pub fn new(raw: T) -> Self {
        raw.add_ref();
        Self { ptr: Some(raw) }
    }

    /// Take ownership of a reference that was already incremented for us.
    pub fn adopt(raw: T) -> Self {
        Self { ptr: Some(raw) }
    }

    /// Borrow the raw handle without transferring ownership.
    ///
    /// The returned handle must not be kept beyond the lifetime of `self`.
    pub fn get(&self) -> Option<&T> {
        self.ptr.as_ref()
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// Replace the held object with a new reference to `raw` (or null).
    ///
    /// The new reference is taken before the old one is released, so setting
    /// a handle to the object it already holds is safe.
    pub fn set(&mut self, raw: Option<T>) {
        if let Some(raw) = &raw {
            raw.add_ref();
        }
        if let Some(old) = std::mem::replace(&mut self.ptr, raw) {
            old.release();
        }
    }

    /// Release the held reference and become null.
    pub fn reset(&mut self) {
        if let Some(old) = self.ptr.take() {
            old.release();
        }
    }

    /// Move the held reference into a new handle, leaving this one null.
    pub fn take(&mut self) -> Self {
        Self {
            ptr: self.ptr.take(),
        }
    }

    /// Give up ownership without releasing; the caller now owns the reference.
    pub fn into_raw(mut self) -> Option<T> {
        self.ptr.take()
    }
}

impl<T: RefCounted> Default for RefPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: RefCounted> Clone for RefPtr<T> {
    fn clone(&self) -> Self {
        match &self.ptr {
            Some(raw) => Self::new(raw.clone()),
            None => Self::null(),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.set(source.ptr.clone());
    }
}

impl<T: RefCounted> Drop for RefPtr<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: RefCounted + PartialEq> PartialEq for RefPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T: RefCounted + fmt::Debug> fmt::Debug for RefPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ptr {
            Some(raw) => f.debug_tuple("RefPtr").field(raw).finish(),
            None => f.write_str("RefPtr(null)"),
        }
    }
}
