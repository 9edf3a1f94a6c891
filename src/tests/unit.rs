//! Unit tests for the thread handle.

#[cfg(test)]
mod handle_tests {
    use crate::errors::ThreadError;
    use crate::os;
    use crate::sim;
    use crate::tests::helpers::{capture_events, count_and_yield, load, logged, sleep_ms, K};
    use crate::thread::{InplaceStorage, Thread, ThreadId};
    use crate::this_thread;
    use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::collections::BTreeSet;

    #[test]
    fn test_construction_registers_task() {
        static STORAGE: InplaceStorage<K, 128> = InplaceStorage::new();
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        sim::run(|| {
            let before = os::number_of_threads::<K>();
            let thread = Thread::new("worker", 3, &STORAGE, count_and_yield(&COUNTER));

            crate::assert_running!(thread, 3);
            assert_ne!(thread.id(), ThreadId::NULL);
            assert!(STORAGE.is_alive());
            assert_eq!(os::number_of_threads::<K>(), before + 1);

            drop(thread);
            assert!(!STORAGE.is_alive());
            assert_eq!(os::number_of_threads::<K>(), before);
        });
    }

    #[test]
    fn test_default_handle_is_empty() {
        sim::run(|| {
            let mut thread = Thread::<K>::default();
            assert!(!thread.joinable());
            assert_eq!(thread.id(), ThreadId::NULL);
            assert_eq!(thread.native_handle(), None);
            assert_eq!(thread.priority(), None);
            assert_eq!(thread.kill(), Err(ThreadError::NoSuchProcess));
            assert_eq!(thread.set_priority(2), Err(ThreadError::NoSuchProcess));
        });
    }

    #[test]
    fn test_kill_twice() {
        static STORAGE: InplaceStorage<K, 128> = InplaceStorage::new();
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        sim::run(|| {
            let mut thread = Thread::new("victim", 3, &STORAGE, count_and_yield(&COUNTER));
            let before = os::number_of_threads::<K>();

            assert_eq!(thread.kill(), Ok(()));
            assert!(!thread.joinable());
            assert_eq!(thread.id(), ThreadId::NULL);
            assert_eq!(os::number_of_threads::<K>(), before - 1);

            assert_eq!(thread.kill(), Err(ThreadError::InvalidArgument));
            assert_eq!(thread.set_priority(4), Err(ThreadError::InvalidArgument));
            assert_eq!(thread.priority(), None);
        });
    }

    #[test]
    fn test_finished_body_stays_joinable() {
        static STORAGE: InplaceStorage<K, 128> = InplaceStorage::new();
        static RAN: AtomicBool = AtomicBool::new(false);

        sim::run(|| {
            let before = os::number_of_threads::<K>();
            let mut thread = Thread::new("oneshot", 3, &STORAGE, || {
                RAN.store(true, Ordering::SeqCst);
            });

            crate::assert_eventually!(RAN.load(Ordering::SeqCst), 1000);
            sleep_ms(5);
            assert!(thread.joinable());
            assert_eq!(os::number_of_threads::<K>(), before + 1);

            assert_eq!(thread.kill(), Ok(()));
            assert!(!thread.joinable());
            assert_eq!(os::number_of_threads::<K>(), before);
        });
    }

    #[test]
    fn test_infinite_loop_body() {
        static STORAGE: InplaceStorage<K, 128> = InplaceStorage::new();
        static SPINS: AtomicUsize = AtomicUsize::new(0);

        sim::run(|| {
            let mut thread = Thread::new("blinky", 3, &STORAGE, || loop {
                SPINS.fetch_add(1, Ordering::SeqCst);
                this_thread::yield_now::<K>();
            });

            crate::assert_eventually!(load(&SPINS) > 10, 1000);
            crate::assert_running!(thread, 3);
            assert_eq!(thread.kill(), Ok(()));
            let frozen = load(&SPINS);
            sleep_ms(10);
            assert_eq!(load(&SPINS), frozen);
        });
    }

    #[test]
    fn test_failed_body_is_reported_and_parked() {
        static STORAGE: InplaceStorage<K, 128> = InplaceStorage::new();
        static RAN: AtomicBool = AtomicBool::new(false);

        capture_events();
        sim::run(|| {
            let mut thread = Thread::new_fallible("rain-gauge", 3, &STORAGE, || {
                RAN.store(true, Ordering::SeqCst);
                Err("gauge offline")
            });

            crate::assert_eventually!(RAN.load(Ordering::SeqCst), 1000);
            crate::assert_eventually!(
                logged(&["ERROR", "thread body failed", "task=rain-gauge", "gauge offline"]),
                1000
            );
            assert!(thread.joinable());
            assert_eq!(thread.kill(), Ok(()));
        });
    }

    #[test]
    fn test_fallible_body_success_is_silent() {
        static STORAGE: InplaceStorage<K, 128> = InplaceStorage::new();
        static RAN: AtomicBool = AtomicBool::new(false);

        capture_events();
        sim::run(|| {
            let thread = Thread::new_fallible("flusher", 3, &STORAGE, || -> Result<(), &'static str> {
                RAN.store(true, Ordering::SeqCst);
                Ok(())
            });

            crate::assert_eventually!(RAN.load(Ordering::SeqCst), 1000);
            sleep_ms(5);
            assert!(thread.joinable());
            assert!(!logged(&["thread body failed", "flusher"]));
        });
    }

    #[test]
    fn test_panicking_body_is_parked() {
        static STORAGE: InplaceStorage<K, 128> = InplaceStorage::new();
        static RAN: AtomicBool = AtomicBool::new(false);

        sim::run(|| {
            let mut thread = Thread::new("faulty", 3, &STORAGE, || {
                RAN.store(true, Ordering::SeqCst);
                panic!("bad sensor reading");
            });

            crate::assert_eventually!(RAN.load(Ordering::SeqCst), 1000);
            sleep_ms(5);
            assert!(thread.joinable());
            assert_eq!(thread.kill(), Ok(()));
        });
    }

    #[test]
    fn test_reassign_kills_previous_thread() {
        static FIRST: InplaceStorage<K, 128> = InplaceStorage::new();
        static SECOND: InplaceStorage<K, 128> = InplaceStorage::new();
        static FIRST_COUNT: AtomicUsize = AtomicUsize::new(0);
        static SECOND_COUNT: AtomicUsize = AtomicUsize::new(0);

        sim::run(|| {
            let mut thread = Thread::new("first", 3, &FIRST, count_and_yield(&FIRST_COUNT));
            crate::assert_eventually!(load(&FIRST_COUNT) > 0, 1000);
            let count = os::number_of_threads::<K>();

            thread = Thread::new("second", 3, &SECOND, count_and_yield(&SECOND_COUNT));
            assert_eq!(os::number_of_threads::<K>(), count);
            assert!(!FIRST.is_alive());
            assert!(SECOND.is_alive());

            let frozen = load(&FIRST_COUNT);
            crate::assert_eventually!(load(&SECOND_COUNT) > 0, 1000);
            sleep_ms(10);
            assert_eq!(load(&FIRST_COUNT), frozen);
            assert!(thread.joinable());
        });
    }

    #[test]
    fn test_move_transfers_registration() {
        static STORAGE: InplaceStorage<K, 128> = InplaceStorage::new();
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        sim::run(|| {
            let mut first = Thread::new("mover", 3, &STORAGE, count_and_yield(&COUNTER));
            let id = first.id();

            let mut second = core::mem::take(&mut first);
            assert!(!first.joinable());
            assert_eq!(first.kill(), Err(ThreadError::NoSuchProcess));
            assert_eq!(second.id(), id);
            assert!(STORAGE.is_alive());

            first.swap(&mut second);
            assert_eq!(first.id(), id);
            assert!(!second.joinable());

            drop(second);
            assert!(STORAGE.is_alive());
            drop(first);
            assert!(!STORAGE.is_alive());
        });
    }

    #[test]
    fn test_stale_handle_cannot_kill_rebound_storage() {
        static STORAGE: InplaceStorage<K, 128> = InplaceStorage::new();
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        sim::run(|| {
            let mut stale = Thread::new("first", 3, &STORAGE, count_and_yield(&COUNTER));
            assert_eq!(stale.kill(), Ok(()));

            let fresh = Thread::new("second", 3, &STORAGE, count_and_yield(&COUNTER));
            assert!(fresh.joinable());
            assert!(!stale.joinable());
            assert_eq!(stale.id(), ThreadId::NULL);
            assert_eq!(stale.kill(), Err(ThreadError::InvalidArgument));

            drop(stale);
            assert!(fresh.joinable());
            assert!(STORAGE.is_alive());
        });
    }

    #[test]
    #[should_panic(expected = "kernel assertion failed")]
    fn test_binding_live_storage_panics() {
        static STORAGE: InplaceStorage<K, 128> = InplaceStorage::new();
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        sim::run(|| {
            let _first = Thread::new("first", 3, &STORAGE, count_and_yield(&COUNTER));
            let _second = Thread::new("second", 3, &STORAGE, count_and_yield(&COUNTER));
        });
    }

    #[test]
    #[should_panic(expected = "kernel assertion failed")]
    fn test_priority_out_of_range_panics() {
        static STORAGE: InplaceStorage<K, 128> = InplaceStorage::new();

        sim::run(|| {
            let _thread = Thread::new("greedy", Thread::<K>::max_priority(), &STORAGE, || {});
        });
    }

    #[test]
    fn test_ids_are_distinct_keys() {
        static FIRST: InplaceStorage<K, 128> = InplaceStorage::new();
        static SECOND: InplaceStorage<K, 128> = InplaceStorage::new();
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        sim::run(|| {
            let a = Thread::new("a", 3, &FIRST, count_and_yield(&COUNTER));
            let b = Thread::new("b", 3, &SECOND, count_and_yield(&COUNTER));
            assert_ne!(a.id(), b.id());
            assert_eq!(a.id().native_handle(), a.native_handle());

            let ids: BTreeSet<ThreadId> = [a.id(), b.id(), ThreadId::NULL, a.id()].into_iter().collect();
            assert_eq!(ids.len(), 3);
            assert_eq!(ids.iter().next(), Some(&ThreadId::NULL));
        });
    }

    #[test]
    fn test_body_sees_its_own_identity() {
        static STORAGE: InplaceStorage<K, 128> = InplaceStorage::new();
        static SEEN_HANDLE: AtomicUsize = AtomicUsize::new(0);
        static SEEN_PRIORITY: AtomicUsize = AtomicUsize::new(0);
        static SEEN_STACK: AtomicUsize = AtomicUsize::new(0);

        sim::run(|| {
            let thread = Thread::new("self-aware", 5, &STORAGE, || {
                SEEN_PRIORITY.store(this_thread::priority::<K>() as usize, Ordering::SeqCst);
                SEEN_STACK.store(this_thread::stack_high_water::<K>(), Ordering::SeqCst);
                let handle = this_thread::native_handle::<K>().map_or(0, |handle| handle.as_ptr() as usize);
                SEEN_HANDLE.store(handle, Ordering::SeqCst);
            });

            crate::assert_eventually!(load(&SEEN_HANDLE) != 0, 1000);
            let expected = thread.native_handle().map(|handle| handle.as_ptr() as usize);
            assert_eq!(Some(load(&SEEN_HANDLE)), expected);
            assert_eq!(load(&SEEN_PRIORITY), 5);
            let high_water = load(&SEEN_STACK);
            assert!(high_water > 0 && high_water <= STORAGE.stack_words());
        });
    }

    #[test]
    fn test_main_task_identity() {
        sim::run(|| {
            assert!(!this_thread::id::<K>().is_null());
            assert_eq!(this_thread::priority::<K>(), Thread::<K>::max_priority() - 1);
            assert!(this_thread::stack_high_water::<K>() > 0);
            assert_eq!(Thread::<K>::hardware_concurrency(), 1);
        });
    }
}
