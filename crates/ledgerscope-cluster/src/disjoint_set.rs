//! Concurrent disjoint-set forest.
//!
//! Parent links are atomics and always point at a smaller or equal index, so
//! the root of every set is its smallest member. `find` halves paths without
//! locking; it only ever rewrites links of non-root slots, and a non-root
//! never becomes a root again. Root links change only inside `unite`, which
//! holds the lock stripes of both candidate roots.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;

const STRIPES: usize = 1024;

pub struct DisjointSet {
    parent: Vec<AtomicU32>,
    stripes: Box<[Mutex<()>]>,
}

impl DisjointSet {
    /// `size` singleton sets.
    pub fn new(size: u32) -> Self {
        Self {
            parent: (0..size).map(AtomicU32::new).collect(),
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn len(&self) -> u32 {
        self.parent.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    fn parent_of(&self, x: u32) -> u32 {
        self.parent[x as usize].load(Ordering::Acquire)
    }

    fn stripe(&self, x: u32) -> usize {
        x as usize % STRIPES
    }

    /// Representative of `x`'s set. Panics if `x >= len()`.
    pub fn find(&self, mut x: u32) -> u32 {
        loop {
            let p = self.parent_of(x);
            if p == x {
                return x;
            }
            let gp = self.parent_of(p);
            if gp != p {
                // Losing the race leaves a valid, merely longer, path.
                let _ = self.parent[x as usize].compare_exchange_weak(p, gp, Ordering::Release, Ordering::Relaxed);
            }
            x = gp;
        }
    }

    /// Merge the sets of `a` and `b`. Returns `false` if they were already one.
    pub fn unite(&self, a: u32, b: u32) -> bool {
        loop {
            let (ra, rb) = (self.find(a), self.find(b));
            if ra == rb {
                return false;
            }
            let (lo, hi) = (ra.min(rb), ra.max(rb));
            let (s1, s2) = (self.stripe(lo), self.stripe(hi));
            let _first = self.stripes[s1.min(s2)].lock();
            let _second = (s1 != s2).then(|| self.stripes[s1.max(s2)].lock());

            if self.parent_of(lo) == lo && self.parent_of(hi) == hi {
                self.parent[hi as usize].store(lo, Ordering::Release);
                return true;
            }
        }
    }

    /// Flatten every path and return each slot's root.
    pub fn resolve(&self) -> Vec<u32> {
        (0..self.len()).into_par_iter().map(|x| self.find(x)).collect()
    }
}

impl std::fmt::Debug for DisjointSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisjointSet").field("len", &self.len()).finish()
    }
}
