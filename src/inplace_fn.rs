//! Fixed-capacity, allocation-free storage for a call-once closure.
//!
//! `InplaceFn<A, N>` keeps a `FnOnce(A)` closure of at most `N` bytes inline,
//! next to a single pointer to a `'static` vtable. Every closure type of a
//! given signature and capacity therefore shares one concrete type, which is
//! what lets handles carry differently-captured callbacks without generics
//! leaking into their own type.

use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, MaybeUninit};
use core::ptr;

/// One machine word, the capacity needed to capture a single pointer.
pub const WORD: usize = mem::size_of::<usize>();

#[repr(C)]
struct Storage<const N: usize> {
    _align: [usize; 0],
    bytes: [MaybeUninit<u8>; N],
}

struct VTable<A> {
    call: unsafe fn(*mut u8, A),
    drop: unsafe fn(*mut u8),
}

struct Thunk<F, A>(PhantomData<(F, A)>);

impl<F: FnOnce(A), A> Thunk<F, A> {
    const VTABLE: VTable<A> = VTable { call: Self::call, drop: Self::drop };

    unsafe fn call(storage: *mut u8, arg: A) {
        // Safety: storage holds an initialized `F`; the caller forgets it afterwards.
        let f = unsafe { ptr::read(storage.cast::<F>()) };
        f(arg)
    }

    unsafe fn drop(storage: *mut u8) {
        // Safety: storage holds an initialized `F` that is never used again.
        unsafe { ptr::drop_in_place(storage.cast::<F>()) }
    }
}

struct Fits<F, const N: usize>(PhantomData<F>);

impl<F, const N: usize> Fits<F, N> {
    const OK: () = assert!(
        mem::size_of::<F>() <= N && mem::align_of::<F>() <= mem::align_of::<usize>(),
        "closure does not fit in the inplace storage"
    );
}

/// Inline box for one `FnOnce(A)` closure of at most `N` bytes.
pub struct InplaceFn<A: 'static, const N: usize = WORD> {
    vtable: Option<&'static VTable<A>>,
    storage: Storage<N>,
    // The stored closure is `Send` but may not be `Sync`.
    _marker: PhantomData<fn(A)>,
}

impl<A: 'static, const N: usize> InplaceFn<A, N> {
    /// A box holding nothing.
    pub const fn empty() -> Self {
        Self {
            vtable: None,
            storage: Storage { _align: [], bytes: [MaybeUninit::uninit(); N] },
            _marker: PhantomData,
        }
    }

    /// Box `f`. Fails to compile when `F` is larger than `N` bytes or more
    /// aligned than a word.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(A) + Send + 'static,
    {
        let mut this = Self::empty();
        this.store(f);
        this
    }

    /// Replace the stored closure with `f`, dropping the previous one.
    pub fn set<F>(&mut self, f: F)
    where
        F: FnOnce(A) + Send + 'static,
    {
        self.clear();
        self.store(f);
    }

    fn store<F>(&mut self, f: F)
    where
        F: FnOnce(A) + Send + 'static,
    {
        #[allow(clippy::let_unit_value)]
        let () = Fits::<F, N>::OK;
        debug_assert!(self.vtable.is_none());
        // Safety: size and alignment are checked above; the slot is empty.
        unsafe { ptr::write(self.storage.bytes.as_mut_ptr().cast::<F>(), f) };
        self.vtable = Some(&Thunk::<F, A>::VTABLE);
    }

    pub fn is_empty(&self) -> bool {
        self.vtable.is_none()
    }

    /// Move the closure out and run it. Returns `false` if the box was empty.
    pub fn call(&mut self, arg: A) -> bool {
        match self.vtable.take() {
            Some(vtable) => {
                // Safety: the vtable matches the stored closure, and clearing it
                // first means the closure is read out exactly once.
                unsafe { (vtable.call)(self.storage.bytes.as_mut_ptr().cast(), arg) };
                true
            }
            None => false,
        }
    }

    /// Drop the stored closure without running it.
    pub fn clear(&mut self) {
        if let Some(vtable) = self.vtable.take() {
            // Safety: the vtable matches the stored closure.
            unsafe { (vtable.drop)(self.storage.bytes.as_mut_ptr().cast()) };
        }
    }
}

impl<A: 'static, const N: usize> Default for InplaceFn<A, N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<A: 'static, const N: usize> Drop for InplaceFn<A, N> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<A: 'static, const N: usize> fmt::Debug for InplaceFn<A, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InplaceFn")
            .field("capacity", &N)
            .field("empty", &self.is_empty())
            .finish()
    }
}

// Safety: only `Send` closures are stored, and they are reachable through
// `&mut self` alone, so sharing `&InplaceFn` exposes nothing.
unsafe impl<A: 'static, const N: usize> Send for InplaceFn<A, N> {}
unsafe impl<A: 'static, const N: usize> Sync for InplaceFn<A, N> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_call_runs_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let captured = hits.clone();
        let mut f: InplaceFn<usize> = InplaceFn::new(move |n| {
            captured.fetch_add(n, Ordering::SeqCst);
        });

        assert!(!f.is_empty());
        assert!(f.call(3));
        assert!(f.is_empty());
        assert!(!f.call(3));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        // The closure, and with it the captured Arc, is gone.
        assert_eq!(Arc::strong_count(&hits), 1);
    }

    #[test]
    fn test_drop_without_call_releases_captures() {
        let hits = Arc::new(AtomicUsize::new(0));
        let captured = hits.clone();
        let f: InplaceFn<()> = InplaceFn::new(move |()| {
            captured.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(Arc::strong_count(&hits), 2);
        drop(f);
        assert_eq!(Arc::strong_count(&hits), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_set_replaces_previous() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut f: InplaceFn<(), { 2 * WORD }> = InplaceFn::empty();

        let a = first.clone();
        f.set(move |()| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let b = second.clone();
        f.set(move |()| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(Arc::strong_count(&first), 1);
        assert!(f.call(()));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_capacity_holds_multiple_words() {
        let mut out = [0usize; 1];
        let out_ptr = out.as_mut_ptr() as usize;
        let (x, y, z) = (1usize, 2usize, 3usize);
        let mut f: InplaceFn<(), { 4 * WORD }> = InplaceFn::new(move |()| {
            // Safety: `out` outlives the call below.
            unsafe { *(out_ptr as *mut usize) = x + y + z };
        });
        assert!(f.call(()));
        assert_eq!(out[0], 6);
    }

    #[test]
    fn test_size_is_vtable_plus_capacity() {
        assert_eq!(mem::size_of::<InplaceFn<()>>(), 2 * WORD);
        assert_eq!(mem::size_of::<InplaceFn<(), { 4 * WORD }>>(), 5 * WORD);
    }
}
