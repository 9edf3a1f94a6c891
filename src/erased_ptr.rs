//! A unique pointer with a type-erased deleter.
//!
//! The deleter of an owning pointer is usually part of its type, which makes
//! pointers with different cleanup actions incompatible. `ErasedPtr<T>` keeps
//! the deleter in an [`InplaceFn`] with room for one captured word, so every
//! `ErasedPtr<T>` has the same type and the same size (three words) no matter
//! what the deleter captured. Nothing is allocated.

use crate::inplace_fn::{InplaceFn, WORD};
use core::fmt;
use core::ptr::NonNull;

/// Owning pointer whose cleanup action runs exactly once, on drop or reset.
pub struct ErasedPtr<T: 'static> {
    ptr: Option<NonNull<T>>,
    deleter: InplaceFn<NonNull<T>, WORD>,
}

impl<T: 'static> ErasedPtr<T> {
    /// A pointer that owns nothing.
    pub const fn null() -> Self {
        Self { ptr: None, deleter: InplaceFn::empty() }
    }

    /// Take ownership of `ptr`; `deleter` runs when ownership ends.
    ///
    /// The deleter may capture at most one word of state.
    pub fn new<D>(ptr: NonNull<T>, deleter: D) -> Self
    where
        D: FnOnce(NonNull<T>) + Send + 'static,
    {
        Self { ptr: Some(ptr), deleter: InplaceFn::new(deleter) }
    }

    pub fn get(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// Borrow the pointee.
    ///
    /// # Safety
    ///
    /// The pointee must be valid for shared access for the returned lifetime.
    pub unsafe fn as_ref(&self) -> Option<&T> {
        // Safety: forwarded to the caller.
        self.ptr.map(|ptr| unsafe { ptr.as_ref() })
    }

    /// Run the deleter now and become null.
    pub fn reset(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            self.deleter.call(ptr);
        }
        self.deleter.clear();
    }

    /// Give up ownership without running the deleter.
    pub fn release(&mut self) -> Option<NonNull<T>> {
        self.deleter.clear();
        self.ptr.take()
    }

    /// Move ownership out, leaving this pointer null.
    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }
}

impl<T: 'static> Default for ErasedPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: 'static> Drop for ErasedPtr<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: 'static> fmt::Debug for ErasedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErasedPtr").field(&self.ptr).finish()
    }
}

// Safety: the pointer is owned uniquely; moving it to another task is
// sound when the pointee may be shared across tasks.
unsafe impl<T: Sync + 'static> Send for ErasedPtr<T> {}
unsafe impl<T: Sync + 'static> Sync for ErasedPtr<T> {}

// ensure that ErasedPtr is always the size of 3 pointers
const _: () = assert!(core::mem::size_of::<ErasedPtr<u8>>() == 3 * WORD);
