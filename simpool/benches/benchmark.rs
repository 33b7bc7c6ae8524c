use std::{cell::RefCell, collections::VecDeque, ptr::NonNull};

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use simpool::{Configuration, SystemBacking, SystemPool};

thread_local! {
    static POOL: RefCell<SystemPool> = RefCell::new(
        SystemPool::with_configuration(SystemBacking::new(), Configuration::new().with_min_initial_bytes(1 << 20))
            .expect("Valid configuration")
    );
}

//  Single-Allocation Round-Trip.
//
//  This benchmark repeatedly allocates and deallocates a block of memory.
//
//  The freed Block coalesces back into the region it was carved from, so this measures the lower-bound of the pool
//  latency.
fn single_allocation_round_trip(c: &mut Criterion) {
    for &size in &[32usize, 256, 4096] {
        c.bench_function(&format!("SA Round-trip {} - sys", size), |b| b.iter(|| {
            let _ = black_box(SysVec::with_capacity(size));
        }));
        c.bench_function(&format!("SA Round-trip {} - pool", size), |b| b.iter(|| {
            let _ = black_box(PoolVec::with_capacity(size));
        }));
    }
}

criterion_group!(
    single_allocation,
    single_allocation_round_trip
);

//  Batch-Allocation Allocation.
//
//  This benchmark repeatedly allocates a block of memory, keeping all blocks alive.
fn batch_allocation_allocation(c: &mut Criterion) {
    fn bencher<T: Vector>(name: &'static str, c: &mut Criterion, number_iterations: usize) {
        c.bench_function(name, |b| b.iter_batched_ref(
            || Vec::<T>::with_capacity(number_iterations),
            |v| v.push(black_box(T::with_capacity(32))),
            BatchSize::NumIterations(number_iterations as u64)
        ));
    }

    const NUMBER_ITERATIONS: usize = 1024;

    bencher::<SysVec>("BA Allocation - sys", c, NUMBER_ITERATIONS);

    bencher::<PoolVec>("BA Allocation - pool", c, NUMBER_ITERATIONS);
}

//  Batch-Allocation Round-Trip.
//
//  This benchmark keeps a window of live blocks, allocating at one end and deallocating at the other.
//
//  Unlike the single round-trip, the used list is long and the free list fragmented.
fn batch_allocation_round_trip(c: &mut Criterion) {
    fn bencher<T: Vector>(name: &'static str, c: &mut Criterion, number_iterations: usize) {
        c.bench_function(name, |b| b.iter_batched_ref(
            || {
                let mut v = VecDeque::<T>::with_capacity(number_iterations);
                v.resize_with(number_iterations - 1, || black_box(T::with_capacity(32)));
                v
            },
            |v| {
                v.push_back(black_box(T::with_capacity(32)));
                v.pop_front()
            },
            BatchSize::NumIterations(number_iterations as u64)
        ));
    }

    const NUMBER_ITERATIONS: usize = 1024;

    bencher::<SysVec>("BA Round-trip - sys", c, NUMBER_ITERATIONS);

    bencher::<PoolVec>("BA Round-trip - pool", c, NUMBER_ITERATIONS);
}

criterion_group!(
    batch_allocation,
    batch_allocation_allocation,
    batch_allocation_round_trip
);

criterion_main!(
    single_allocation,
    batch_allocation
);

//
//  Implementation Details
//

trait Vector: Sized {
    fn with_capacity(capacity: usize) -> Self;
}

type SysVec = Vec<u8>;

impl Vector for SysVec {
    fn with_capacity(capacity: usize) -> SysVec { SysVec::with_capacity(capacity) }
}

//  Similar layout to Vec, for fairness.
struct PoolVec {
    pointer: NonNull<u8>,
    #[allow(dead_code)]
    len: usize,
    #[allow(dead_code)]
    cap: usize,
}

impl Vector for PoolVec {
    fn with_capacity(capacity: usize) -> PoolVec {
        let pointer = POOL.with(|pool| pool.borrow_mut().allocate(capacity)).expect("Allocated");
        PoolVec { pointer, len: 0, cap: capacity }
    }
}

impl Drop for PoolVec {
    fn drop(&mut self) {
        let pointer = self.pointer;
        POOL.with(|pool| pool.borrow_mut().deallocate(pointer));
    }
}
