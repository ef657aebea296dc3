//! Per-frame acquire, submit and present.
//!
//! [`FrameLoop`] owns the frame-in-flight bookkeeping and delegates the
//! device work to a [`Swapchain`]. A stale swapchain is not an error: the
//! frame is skipped and nothing is mutated. Recreation only happens through
//! [`FrameLoop::resize`], which idles the device and rebuilds everything
//! that depends on the surface size.

use log::debug;

use super::context::GpuError;

/// Drawable size in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimised window has nothing to draw into.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Outcome of acquiring the next presentable image.
#[derive(Debug)]
pub enum Acquire<I> {
    Ready(I),
    /// The swapchain no longer matches the surface.
    OutOfDate,
    /// Usable but mismatched; the image was released unpresented.
    Suboptimal,
    Timeout,
}

/// Why a frame was not presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    OutOfDate,
    Suboptimal,
    Timeout,
    Minimized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    Skipped(SkipReason),
}

/// Device operations the frame loop sequences.
pub trait Swapchain {
    type Image;

    /// Frames that may be recorded before the oldest must have finished.
    fn frames_in_flight(&self) -> usize;

    fn acquire(&mut self) -> Result<Acquire<Self::Image>, GpuError>;

    /// Record and submit the draw into `image` using per-frame slot `slot`.
    fn submit(&mut self, image: &Self::Image, slot: usize) -> Result<(), GpuError>;

    fn present(&mut self, image: Self::Image);

    /// Recreate the swapchain and every size-dependent resource.
    fn rebuild(&mut self, extent: Extent) -> Result<(), GpuError>;

    /// Block until the device has finished all submitted work.
    fn wait_idle(&mut self) -> Result<(), GpuError>;

    /// `Err(DeviceLost)` once the device is gone.
    fn check_device(&self) -> Result<(), GpuError> {
        Ok(())
    }
}

/// Drives one [`Swapchain`] frame by frame.
pub struct FrameLoop<S: Swapchain> {
    swapchain: S,
    extent: Extent,
    slot: usize,
    presented: u64,
    skipped: u64,
    rebuilds: u64,
}

impl<S: Swapchain> FrameLoop<S> {
    pub fn new(swapchain: S, extent: Extent) -> Self {
        Self {
            swapchain,
            extent,
            slot: 0,
            presented: 0,
            skipped: 0,
            rebuilds: 0,
        }
    }

    pub fn swapchain(&self) -> &S {
        &self.swapchain
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Per-frame slot the next draw will use.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Acquire, submit and present one frame.
    pub fn draw(&mut self) -> Result<FrameStatus, GpuError> {
        self.swapchain.check_device()?;
        if self.extent.is_empty() {
            return Ok(self.skip(SkipReason::Minimized));
        }

        let image = match self.swapchain.acquire()? {
            Acquire::Ready(image) => image,
            Acquire::OutOfDate => return Ok(self.skip(SkipReason::OutOfDate)),
            Acquire::Suboptimal => return Ok(self.skip(SkipReason::Suboptimal)),
            Acquire::Timeout => return Ok(self.skip(SkipReason::Timeout)),
        };

        self.swapchain.submit(&image, self.slot)?;
        self.swapchain.present(image);

        self.slot = (self.slot + 1) % self.swapchain.frames_in_flight().max(1);
        self.presented += 1;
        Ok(FrameStatus::Presented)
    }

    /// Handle a new drawable size.
    ///
    /// A zero size only records the extent; the rebuild happens once the
    /// window is restored.
    pub fn resize(&mut self, extent: Extent) -> Result<(), GpuError> {
        self.extent = extent;
        if extent.is_empty() {
            return Ok(());
        }

        self.swapchain.wait_idle()?;
        self.swapchain.rebuild(extent)?;
        self.slot = 0;
        self.rebuilds += 1;
        debug!("swapchain rebuilt at {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Idle the device ahead of teardown.
    pub fn finish(&mut self) -> Result<(), GpuError> {
        self.swapchain.wait_idle()
    }

    fn skip(&mut self, reason: SkipReason) -> FrameStatus {
        self.skipped += 1;
        FrameStatus::Skipped(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Scripted {
        acquires: VecDeque<Acquire<u32>>,
        submitted: Vec<(u32, usize)>,
        presented: Vec<u32>,
        rebuilt: Vec<Extent>,
        idles: usize,
    }

    impl Swapchain for Scripted {
        type Image = u32;

        fn frames_in_flight(&self) -> usize {
            2
        }

        fn acquire(&mut self) -> Result<Acquire<u32>, GpuError> {
            Ok(self.acquires.pop_front().unwrap_or(Acquire::Ready(0)))
        }

        fn submit(&mut self, image: &u32, slot: usize) -> Result<(), GpuError> {
            self.submitted.push((*image, slot));
            Ok(())
        }

        fn present(&mut self, image: u32) {
            self.presented.push(image);
        }

        fn rebuild(&mut self, extent: Extent) -> Result<(), GpuError> {
            self.rebuilt.push(extent);
            Ok(())
        }

        fn wait_idle(&mut self) -> Result<(), GpuError> {
            self.idles += 1;
            Ok(())
        }
    }

    #[test]
    fn test_slots_cycle() {
        let mut frames = FrameLoop::new(Scripted::default(), Extent::new(64, 64));
        for _ in 0..3 {
            assert_eq!(frames.draw().unwrap(), FrameStatus::Presented);
        }
        let slots: Vec<usize> = frames.swapchain().submitted.iter().map(|s| s.1).collect();
        assert_eq!(slots, vec![0, 1, 0]);
    }

    #[test]
    fn test_out_of_date_skips_without_state_change() {
        let mut chain = Scripted::default();
        chain.acquires.push_back(Acquire::Ready(7));
        chain.acquires.push_back(Acquire::OutOfDate);
        let mut frames = FrameLoop::new(chain, Extent::new(64, 64));

        frames.draw().unwrap();
        let slot = frames.slot();
        assert_eq!(
            frames.draw().unwrap(),
            FrameStatus::Skipped(SkipReason::OutOfDate)
        );

        assert_eq!(frames.slot(), slot);
        assert_eq!(frames.swapchain().submitted.len(), 1);
        assert_eq!(frames.swapchain().presented, vec![7]);
        assert!(frames.swapchain().rebuilt.is_empty());
    }

    #[test]
    fn test_resize_idles_then_rebuilds() {
        let mut frames = FrameLoop::new(Scripted::default(), Extent::new(64, 64));
        frames.draw().unwrap();

        frames.resize(Extent::new(128, 32)).unwrap();
        assert_eq!(frames.swapchain().idles, 1);
        assert_eq!(frames.swapchain().rebuilt, vec![Extent::new(128, 32)]);
        assert_eq!(frames.slot(), 0);
        assert_eq!(frames.rebuilds(), 1);
    }

    #[test]
    fn test_minimized_window_draws_nothing() {
        let mut frames = FrameLoop::new(Scripted::default(), Extent::new(64, 64));
        frames.resize(Extent::new(0, 0)).unwrap();
        assert!(frames.swapchain().rebuilt.is_empty());
        assert_eq!(
            frames.draw().unwrap(),
            FrameStatus::Skipped(SkipReason::Minimized)
        );
        assert!(frames.swapchain().submitted.is_empty());
    }
}
