//! Lock-hierarchy discipline shared by every concurrent subsystem.
//!
//! The server state is split into six lockable resource domains with a
//! fixed total acquisition order ([`Domain`]). A thread may only acquire a
//! lock whose domain comes strictly after every domain it already holds;
//! same-domain nesting is likewise forbidden, which is what keeps e.g. two
//! chunk locks from ever being held together. Violating the order is a
//! programming error, not a runtime condition: debug builds panic at the
//! violating acquisition, release builds compile the bookkeeping out and
//! rely on static adherence.
//!
//! I/O rule: the only blocking I/O permitted while any lock is held is
//! chunk persistence under that chunk's own `Chunk`-domain lock, whose
//! completion never contends on the chunk itself. Everything network-facing
//! is enqueue-only; outbound messages are delivered by per-connection
//! writer tasks that hold no locks.

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::ops::{Deref, DerefMut};

/// Lockable resource domains, in acquisition order.
///
/// `World` must be taken before `User`, `User` before `Spatial`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Domain {
    /// The chunk cache map (which chunks are resident).
    World,
    /// A single player session's mutable state.
    User,
    /// The spatial proximity index.
    Spatial,
    /// The all-players registry maps.
    Registry,
    /// A single resident chunk's state.
    Chunk,
    /// The live monster set.
    Monster,
}

#[cfg(debug_assertions)]
mod check {
    use super::Domain;
    use std::cell::RefCell;

    thread_local! {
        static HELD: RefCell<Vec<Domain>> = const { RefCell::new(Vec::new()) };
    }

    pub fn acquire(domain: Domain) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(&max) = held.iter().max() {
                assert!(
                    domain > max,
                    "lock order violation: acquiring {domain:?} while holding {max:?}"
                );
            }
            held.push(domain);
        });
    }

    pub fn release(domain: Domain) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(idx) = held.iter().rposition(|&d| d == domain) {
                held.remove(idx);
            }
        });
    }

    /// Domains currently held by this thread, for diagnostics.
    pub fn held() -> Vec<Domain> {
        HELD.with(|held| held.borrow().clone())
    }
}

#[cfg(not(debug_assertions))]
mod check {
    use super::Domain;

    #[inline(always)]
    pub fn acquire(_domain: Domain) {}

    #[inline(always)]
    pub fn release(_domain: Domain) {}

    pub fn held() -> Vec<Domain> {
        Vec::new()
    }
}

/// Returns the domains currently held by the calling thread.
///
/// Always empty in release builds.
#[must_use]
pub fn held_domains() -> Vec<Domain> {
    check::held()
}

/// A mutex bound to a lock-hierarchy domain.
#[derive(Debug)]
pub struct OrderedMutex<T> {
    domain: Domain,
    inner: Mutex<T>,
}

impl<T> OrderedMutex<T> {
    /// Creates a new ordered mutex in the given domain.
    pub const fn new(domain: Domain, value: T) -> Self {
        Self {
            domain,
            inner: Mutex::new(value),
        }
    }

    /// Returns the domain this lock belongs to.
    #[must_use]
    pub const fn domain(&self) -> Domain {
        self.domain
    }

    /// Acquires the lock, checking the hierarchy order in debug builds.
    pub fn lock(&self) -> OrderedMutexGuard<'_, T> {
        check::acquire(self.domain);
        OrderedMutexGuard {
            domain: self.domain,
            guard: self.inner.lock(),
        }
    }
}

/// Guard for [`OrderedMutex`].
pub struct OrderedMutexGuard<'a, T> {
    domain: Domain,
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for OrderedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for OrderedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for OrderedMutexGuard<'_, T> {
    fn drop(&mut self) {
        check::release(self.domain);
    }
}

/// A reader-writer lock bound to a lock-hierarchy domain.
///
/// Readers and writers count the same for ordering purposes; a read lock
/// held on a domain forbids acquiring that domain (or an earlier one) again.
#[derive(Debug)]
pub struct OrderedRwLock<T> {
    domain: Domain,
    inner: RwLock<T>,
}

impl<T> OrderedRwLock<T> {
    /// Creates a new ordered rwlock in the given domain.
    pub const fn new(domain: Domain, value: T) -> Self {
        Self {
            domain,
            inner: RwLock::new(value),
        }
    }

    /// Returns the domain this lock belongs to.
    #[must_use]
    pub const fn domain(&self) -> Domain {
        self.domain
    }

    /// Acquires a shared read lock.
    pub fn read(&self) -> OrderedReadGuard<'_, T> {
        check::acquire(self.domain);
        OrderedReadGuard {
            domain: self.domain,
            guard: self.inner.read(),
        }
    }

    /// Acquires an exclusive write lock.
    pub fn write(&self) -> OrderedWriteGuard<'_, T> {
        check::acquire(self.domain);
        OrderedWriteGuard {
            domain: self.domain,
            guard: self.inner.write(),
        }
    }
}

/// Shared guard for [`OrderedRwLock`].
pub struct OrderedReadGuard<'a, T> {
    domain: Domain,
    guard: RwLockReadGuard<'a, T>,
}

impl<T> Deref for OrderedReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> Drop for OrderedReadGuard<'_, T> {
    fn drop(&mut self) {
        check::release(self.domain);
    }
}

/// Exclusive guard for [`OrderedRwLock`].
pub struct OrderedWriteGuard<'a, T> {
    domain: Domain,
    guard: RwLockWriteGuard<'a, T>,
}

impl<T> Deref for OrderedWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for OrderedWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for OrderedWriteGuard<'_, T> {
    fn drop(&mut self) {
        check::release(self.domain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_order() {
        assert!(Domain::World < Domain::User);
        assert!(Domain::User < Domain::Spatial);
        assert!(Domain::Spatial < Domain::Registry);
        assert!(Domain::Registry < Domain::Chunk);
        assert!(Domain::Chunk < Domain::Monster);
    }

    #[test]
    fn test_ordered_acquisition_succeeds() {
        let world = OrderedMutex::new(Domain::World, 1);
        let chunk = OrderedMutex::new(Domain::Chunk, 2);
        let w = world.lock();
        let c = chunk.lock();
        assert_eq!(*w + *c, 3);
        drop(c);
        drop(w);
        assert!(held_domains().is_empty());
    }

    #[test]
    fn test_reacquire_after_release() {
        let chunk_a = OrderedMutex::new(Domain::Chunk, 'a');
        let chunk_b = OrderedMutex::new(Domain::Chunk, 'b');
        // Sequential same-domain locking is fine; only nesting is forbidden.
        assert_eq!(*chunk_a.lock(), 'a');
        assert_eq!(*chunk_b.lock(), 'b');
    }

    #[test]
    fn test_out_of_order_drop() {
        let world = OrderedMutex::new(Domain::World, ());
        let chunk = OrderedMutex::new(Domain::Chunk, ());
        let w = world.lock();
        let c = chunk.lock();
        drop(w);
        // Chunk is still held; acquiring Monster (later domain) is legal.
        let monster = OrderedMutex::new(Domain::Monster, ());
        let m = monster.lock();
        drop(m);
        drop(c);
        assert!(held_domains().is_empty());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "lock order violation")]
    fn test_violation_panics() {
        let registry = OrderedRwLock::new(Domain::Registry, ());
        let user = OrderedMutex::new(Domain::User, ());
        let _r = registry.read();
        let _u = user.lock(); // User precedes Registry: programmer error
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "lock order violation")]
    fn test_same_domain_nesting_panics() {
        let chunk_a = OrderedMutex::new(Domain::Chunk, ());
        let chunk_b = OrderedMutex::new(Domain::Chunk, ());
        let _a = chunk_a.lock();
        let _b = chunk_b.lock();
    }

    #[test]
    fn test_tracking_is_per_thread() {
        let registry = OrderedRwLock::new(Domain::Registry, ());
        let _r = registry.read();
        std::thread::spawn(|| {
            // This thread holds nothing, so an early domain is fine here.
            let world = OrderedMutex::new(Domain::World, ());
            let _w = world.lock();
        })
        .join()
        .expect("thread panicked");
    }
}
