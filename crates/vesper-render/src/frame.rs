// SPDX-License-Identifier: CEPL-1.0

/// Where the scheduler currently is in its per-tick sequence.
/// Between ticks it rests in `Idle` or `Rebuilding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    WaitSlot,
    Acquire,
    RecordAndSubmit,
    Present,
    Rebuilding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32, slot: usize },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The swapchain no longer matched the surface; it was rebuilt (or is
    /// waiting for a usable extent).
    OutOfDate,
    /// The surface has zero extent; no GPU work was issued.
    Minimized,
}
