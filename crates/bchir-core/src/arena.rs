//! Value arena
//!
//! Bump allocator backing every aggregate the interpreter creates. Values
//! live in fixed-capacity buckets; a new bucket is pushed on overflow and
//! existing buckets are never reallocated, so slot addresses stay stable
//! for the arena's whole lifetime. Collection is deferred to interpreter
//! teardown, which also breaks any reference cycles between exception
//! objects.

use crate::value::{IVal, ValueRef};

const BUCKET_SIZE: usize = 2048;
const INITIAL_BUCKETS: usize = 16;

/// Bump/bucket allocator for interpreter values
pub struct Arena {
    // Each bucket's buffer is reserved up-front and never grown past its
    // capacity, so pushing into it cannot move earlier elements.
    buckets: Vec<Vec<IVal>>,
    /// Slots whose objects have a finaliser, in allocation order
    pub finalizing_objects: Vec<ValueRef>,
}

impl Arena {
    /// Create an arena with one empty bucket
    pub fn new() -> Self {
        let mut buckets = Vec::with_capacity(INITIAL_BUCKETS);
        buckets.push(Vec::with_capacity(BUCKET_SIZE));
        Self { buckets, finalizing_objects: Vec::with_capacity(BUCKET_SIZE) }
    }

    /// Move `value` into the arena and return a stable reference to it
    pub fn allocate(&mut self, value: IVal) -> ValueRef {
        if self.buckets.last().map_or(true, |b| b.len() == BUCKET_SIZE) {
            self.buckets.push(Vec::with_capacity(BUCKET_SIZE));
        }
        let bucket = self.buckets.last_mut().expect("arena always has a bucket");
        bucket.push(value);
        let slot = bucket.last_mut().expect("just pushed");
        ValueRef::new(slot)
    }

    /// Total bytes currently held by arena slots
    pub fn allocated_size(&self) -> i64 {
        let slots = (self.buckets.len() - 1) * BUCKET_SIZE
            + self.buckets.last().map_or(0, |b| b.len());
        (slots * std::mem::size_of::<IVal>()) as i64
    }

    /// Number of buckets in use
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_read_back() {
        let mut arena = Arena::new();
        let p = arena.allocate(IVal::Int64(42));
        assert_eq!(unsafe { p.get() }, &IVal::Int64(42));
    }

    #[test]
    fn test_addresses_stable_across_bucket_overflow() {
        let mut arena = Arena::new();
        let first = arena.allocate(IVal::Int64(0));
        let mut refs = Vec::new();
        for i in 0..(BUCKET_SIZE * 3) {
            refs.push(arena.allocate(IVal::Int64(i as i64)));
        }
        assert!(arena.bucket_count() > 1);
        assert_eq!(unsafe { first.get() }, &IVal::Int64(0));
        for (i, r) in refs.iter().enumerate() {
            assert_eq!(unsafe { r.get() }, &IVal::Int64(i as i64));
        }
    }

    #[test]
    fn test_allocated_size_grows() {
        let mut arena = Arena::new();
        let before = arena.allocated_size();
        arena.allocate(IVal::Unit);
        arena.allocate(IVal::Unit);
        let after = arena.allocated_size();
        assert_eq!(after - before, 2 * std::mem::size_of::<IVal>() as i64);
    }

    #[test]
    fn test_mutation_through_ref() {
        let mut arena = Arena::new();
        let p = arena.allocate(IVal::Tuple(vec![IVal::Bool(false)]));
        unsafe {
            if let IVal::Tuple(fields) = p.get_mut() {
                fields[0] = IVal::Bool(true);
            }
        }
        assert_eq!(unsafe { p.get() }, &IVal::Tuple(vec![IVal::Bool(true)]));
    }
}
