//! Host implementation of the workgroup reduction kernels
//!
//! Each kernel reduces one workgroup of `L` work-items to a single value:
//!
//! 1. every work-item loads (and maps) one input element into local memory
//! 2. barrier
//! 3. for stride `L/2, L/4, .., 1`, work-items below the stride combine their
//!    slot with the slot `stride` above it, followed by a barrier
//! 4. work-item 0 writes the result at the workgroup's global offset
//!
//! Work-items of one phase touch disjoint slots, so a phase is executed as a
//! single sweep over the active lanes and [`LocalMemory::barrier`] marks the
//! end of the phase. Workgroups run concurrently on the rayon pool, each with
//! its own local memory.

use crate::op::{combine_add, combine_max, combine_min, map_squared_deviation};
use rayon::prelude::*;

/// Host kernel entry point: reduces the workgroup it is handed
pub type HostKernel = fn(&mut WorkGroup<'_>, i64);

/// Entry points of the host program, in declaration order
pub const ENTRY_POINTS: [(&str, HostKernel); 4] = [
    ("minimum", minimum),
    ("maximum", maximum),
    ("reduce_add_4", reduce_add_4),
    ("standardDeviation", standard_deviation),
];

/// Resolve a kernel by entry-point name
pub fn lookup(entry_point: &str) -> Option<HostKernel> {
    ENTRY_POINTS
        .iter()
        .find(|(name, _)| *name == entry_point)
        .map(|&(_, kernel)| kernel)
}

/// Workgroup-local scratch memory
///
/// Writes made during a phase become readable only after [`barrier`](Self::barrier).
pub struct LocalMemory<'a> {
    slots: &'a mut [i64],
    unsynchronized: bool,
    barriers: usize,
}

impl<'a> LocalMemory<'a> {
    pub fn new(slots: &'a mut [i64]) -> Self {
        Self {
            slots,
            unsynchronized: false,
            barriers: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn store(&mut self, local_id: usize, value: i64) {
        self.slots[local_id] = value;
        self.unsynchronized = true;
    }

    fn load(&self, local_id: usize) -> i64 {
        debug_assert!(!self.unsynchronized, "local memory read before barrier");
        self.slots[local_id]
    }

    /// Work-items `0..stride` each combine slot `i` with slot `i + stride`
    fn combine_stride(&mut self, stride: usize, combine: fn(i64, i64) -> i64) {
        debug_assert!(!self.unsynchronized, "local memory read before barrier");
        let (low, high) = self.slots.split_at_mut(stride);
        for (mine, theirs) in low.iter_mut().zip(&high[..stride]) {
            *mine = combine(*mine, *theirs);
        }
        self.unsynchronized = true;
    }

    /// Workgroup barrier: all writes of the finished phase are now visible
    pub fn barrier(&mut self) {
        self.unsynchronized = false;
        self.barriers += 1;
    }

    /// Number of barriers executed so far
    pub fn barriers(&self) -> usize {
        self.barriers
    }
}

/// One workgroup's view of the kernel arguments
pub struct WorkGroup<'a> {
    group_id: usize,
    input: &'a [i32],
    output: &'a mut [i64],
    local: LocalMemory<'a>,
}

impl<'a> WorkGroup<'a> {
    /// `input` and `output` are this workgroup's `L`-element windows of the
    /// global buffers; `local` must also hold `L` slots
    pub fn new(
        group_id: usize,
        input: &'a [i32],
        output: &'a mut [i64],
        local: &'a mut [i64],
    ) -> Self {
        debug_assert_eq!(input.len(), local.len());
        debug_assert_eq!(output.len(), local.len());
        Self {
            group_id,
            input,
            output,
            local: LocalMemory::new(local),
        }
    }

    pub fn group_id(&self) -> usize {
        self.group_id
    }

    pub fn local_size(&self) -> usize {
        self.local.len()
    }

    pub fn local(&self) -> &LocalMemory<'a> {
        &self.local
    }

    /// Step 1: each work-item loads its element through `map`
    fn load_all(&mut self, map: impl Fn(i32) -> i64) {
        for local_id in 0..self.input.len() {
            let value = map(self.input[local_id]);
            self.local.store(local_id, value);
        }
    }

    /// Step 3: strided tree combine, one barrier per stride
    fn tree(&mut self, combine: fn(i64, i64) -> i64) {
        let mut stride = self.local_size() / 2;
        while stride > 0 {
            self.local.combine_stride(stride, combine);
            self.local.barrier();
            stride /= 2;
        }
    }

    /// Step 4: work-item 0 publishes the workgroup result
    fn write_result(&mut self) {
        if !self.output.is_empty() {
            self.output[0] = self.local.load(0);
        }
    }
}

fn tree_reduce(group: &mut WorkGroup<'_>, map: impl Fn(i32) -> i64, combine: fn(i64, i64) -> i64) {
    group.load_all(map);
    group.local.barrier();
    group.tree(combine);
    group.write_result();
}

pub fn minimum(group: &mut WorkGroup<'_>, _mean: i64) {
    tree_reduce(group, |v| v as i64, combine_min);
}

pub fn maximum(group: &mut WorkGroup<'_>, _mean: i64) {
    tree_reduce(group, |v| v as i64, combine_max);
}

pub fn reduce_add_4(group: &mut WorkGroup<'_>, _mean: i64) {
    tree_reduce(group, |v| v as i64, combine_add);
}

/// Sum of `(value - mean)^2`, with `mean` in the same fixed-point scale
pub fn standard_deviation(group: &mut WorkGroup<'_>, mean: i64) {
    tree_reduce(group, |v| map_squared_deviation(v, mean), combine_add);
}

/// Run `kernel` over every workgroup of `input`
///
/// `input.len()` and `output.len()` must both be whole multiples of
/// `local_size`. Workgroups execute in parallel; after return the reduced
/// value of workgroup `g` is at `output[g * local_size]`.
pub fn execute(kernel: HostKernel, input: &[i32], output: &mut [i64], local_size: usize, mean: i64) {
    output
        .par_chunks_mut(local_size)
        .zip(input.par_chunks(local_size))
        .enumerate()
        .for_each_init(
            || vec![0i64; local_size],
            |local, (group_id, (out, inp))| {
                let mut group = WorkGroup::new(group_id, inp, out, local);
                kernel(&mut group, mean);
            },
        );
}
