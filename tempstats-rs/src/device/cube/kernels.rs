//! CubeCL reduction kernels
//!
//! Same algorithm as the host kernels: load into shared memory, barrier, then
//! a strided tree with a `sync_cube()` after every stride. Unit 0 of each cube
//! writes its result at the cube's global offset.

use cubecl::prelude::*;

pub const COMBINE_MIN: u32 = 0;
pub const COMBINE_MAX: u32 = 1;
pub const COMBINE_ADD: u32 = 2;

#[cube]
fn tree_reduce(scratch: &mut SharedMemory<i64>, output: &mut Array<i64>, #[comptime] combine: u32) {
    let lid = usize::cast_from(UNIT_POS);
    let mut stride = usize::cast_from(CUBE_DIM) / 2;

    while stride > 0 {
        if lid < stride {
            let mine = scratch[lid];
            let theirs = scratch[lid + stride];
            if comptime!(combine == COMBINE_MIN) {
                if theirs < mine {
                    scratch[lid] = theirs;
                }
            } else if comptime!(combine == COMBINE_MAX) {
                if theirs > mine {
                    scratch[lid] = theirs;
                }
            } else {
                scratch[lid] = mine + theirs;
            }
        }
        sync_cube();
        stride /= 2;
    }

    if lid == 0 {
        output[usize::cast_from(CUBE_POS) * usize::cast_from(CUBE_DIM)] = scratch[0];
    }
}

#[cube(launch_unchecked)]
pub fn minimum(input: &Array<i32>, output: &mut Array<i64>, #[comptime] local_size: u32) {
    let mut scratch = SharedMemory::<i64>::new(local_size);
    scratch[usize::cast_from(UNIT_POS)] = i64::cast_from(input[ABSOLUTE_POS]);
    sync_cube();
    tree_reduce(&mut scratch, output, COMBINE_MIN);
}

#[cube(launch_unchecked)]
pub fn maximum(input: &Array<i32>, output: &mut Array<i64>, #[comptime] local_size: u32) {
    let mut scratch = SharedMemory::<i64>::new(local_size);
    scratch[usize::cast_from(UNIT_POS)] = i64::cast_from(input[ABSOLUTE_POS]);
    sync_cube();
    tree_reduce(&mut scratch, output, COMBINE_MAX);
}

#[cube(launch_unchecked)]
pub fn reduce_add_4(input: &Array<i32>, output: &mut Array<i64>, #[comptime] local_size: u32) {
    let mut scratch = SharedMemory::<i64>::new(local_size);
    scratch[usize::cast_from(UNIT_POS)] = i64::cast_from(input[ABSOLUTE_POS]);
    sync_cube();
    tree_reduce(&mut scratch, output, COMBINE_ADD);
}

#[cube(launch_unchecked)]
pub fn standard_deviation(
    input: &Array<i32>,
    output: &mut Array<i64>,
    mean: i64,
    #[comptime] local_size: u32,
) {
    let mut scratch = SharedMemory::<i64>::new(local_size);
    let deviation = i64::cast_from(input[ABSOLUTE_POS]) - mean;
    scratch[usize::cast_from(UNIT_POS)] = deviation * deviation;
    sync_cube();
    tree_reduce(&mut scratch, output, COMBINE_ADD);
}
