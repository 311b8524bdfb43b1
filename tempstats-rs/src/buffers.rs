//! Per-reduction device buffers
//!
//! [`ReductionBuffers`] owns the input and output buffers of exactly one
//! reduction. They are released when it goes out of scope, on success and on
//! every early return.

use crate::device::{ComputeDevice, KernelLaunch, Program};
use crate::error::Result;
use crate::padding::PaddedSeries;
use std::time::Duration;
use tracing::trace;

pub struct ReductionBuffers<'d, D: ComputeDevice> {
    device: &'d D,
    input: D::InputBuffer,
    output: D::OutputBuffer,
    len: usize,
}

impl<'d, D: ComputeDevice> ReductionBuffers<'d, D> {
    /// Allocate a read-only input holding `padded` and a zeroed read-write
    /// output with one slot per work-item
    ///
    /// The input transfer has completed when this returns.
    pub fn allocate(device: &'d D, padded: &PaddedSeries) -> Result<Self> {
        let input = device.create_input(padded.values())?;
        let output = device.create_output(padded.len())?;
        trace!(len = padded.len(), "allocated reduction buffers");
        Ok(Self {
            device,
            input,
            output,
            len: padded.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Run `launch` against these buffers and wait for it to finish
    pub fn run(&mut self, program: &Program, launch: &KernelLaunch) -> Result<Duration> {
        self.device
            .launch(program, launch, &self.input, &mut self.output)
    }

    /// Blocking copy of the full output buffer
    pub fn read_back(&self) -> Result<Vec<i64>> {
        self.device.read_output(&self.output)
    }
}

impl<D: ComputeDevice> Drop for ReductionBuffers<'_, D> {
    fn drop(&mut self) {
        trace!(len = self.len, "released reduction buffers");
    }
}
