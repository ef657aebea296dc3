//! Fence-gated row uploads into the circular texture.
//!
//! One host-visible staging area is shared by every upload. Before the host
//! overwrites it, the previous transfer must have finished, so each upload
//! runs Wait -> Stage -> Transfer -> Advance:
//!
//! ```text
//!          wait          reset         stage + submit
//! Pending ------> Complete ------> Idle --------------> Pending
//! ```
//!
//! The fence starts signaled (or tracking the initial clear), so the first
//! wait never blocks for long.

use std::time::Duration;

use super::context::GpuError;
use crate::visual::{RowCursor, RowFeed};

/// Where the draw shader starts reading the circular texture.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RowUniform {
    /// Oldest row; drawing proceeds from here and wraps.
    pub offset: u32,
    pub rows: u32,
    pub columns: u32,
    pub _padding: u32,
}

/// Ownership of the staging memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingState {
    /// Fence reset; the host may write staging memory.
    Idle,
    /// A transfer reading staging memory has been submitted.
    TransferPending,
    /// The fence has been observed signaled.
    TransferComplete,
}

/// The device side of a row upload.
pub trait TransferBackend {
    /// Block until the last submitted transfer has finished. `None` waits
    /// without limit.
    fn wait_transfer(&mut self, timeout: Option<Duration>) -> Result<(), GpuError>;

    /// Return the fence to the unsignaled state ahead of the next submit.
    fn reset_transfer(&mut self);

    /// Write one row of samples and the view uniform into staging memory.
    ///
    /// Staging is already free here, so any wait is bounded by `timeout`.
    fn stage(
        &mut self,
        row: u32,
        samples: &[f32],
        uniform: &RowUniform,
        timeout: Option<Duration>,
    ) -> Result<(), GpuError>;

    /// Record and submit copies of the staged row and uniform, signaling the
    /// fence on completion.
    fn submit_transfer(&mut self, row: u32) -> Result<(), GpuError>;

    /// `Err(DeviceLost)` once the device is gone.
    fn check_device(&self) -> Result<(), GpuError> {
        Ok(())
    }
}

/// Drives row uploads through a [`TransferBackend`].
pub struct TransferPipeline<B: TransferBackend> {
    backend: B,
    cursor: RowCursor,
    columns: u32,
    state: StagingState,
    fence_timeout: Option<Duration>,
    uploads: u64,
}

impl<B: TransferBackend> TransferPipeline<B> {
    pub fn new(backend: B, columns: u32, rows: u32, fence_timeout: Option<Duration>) -> Self {
        Self {
            backend,
            cursor: RowCursor::new(rows),
            columns,
            state: StagingState::TransferPending,
            fence_timeout,
            uploads: 0,
        }
    }

    pub fn state(&self) -> StagingState {
        self.state
    }

    pub fn cursor(&self) -> &RowCursor {
        &self.cursor
    }

    /// Rows uploaded so far.
    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Per-frame hook: upload the next row from `feed` unless paused.
    ///
    /// Returns the texture row written, if any.
    pub fn on_frame<F: RowFeed + ?Sized>(
        &mut self,
        paused: bool,
        feed: &mut F,
    ) -> Result<Option<u32>, GpuError> {
        if paused {
            return Ok(None);
        }
        match feed.next_row() {
            Some(row) => self.upload_row(row).map(Some),
            None => Ok(None),
        }
    }

    /// Upload one row at the cursor and advance it.
    pub fn upload_row(&mut self, samples: &[f32]) -> Result<u32, GpuError> {
        self.backend.check_device()?;
        self.wait_idle()?;
        self.backend.reset_transfer();
        self.state = StagingState::Idle;

        let row = self.cursor.current();
        let uniform = RowUniform {
            offset: self.cursor.following(),
            rows: self.cursor.rows(),
            columns: self.columns,
            _padding: 0,
        };
        self.backend.stage(row, samples, &uniform, self.fence_timeout)?;
        self.backend.submit_transfer(row)?;
        self.state = StagingState::TransferPending;

        self.cursor.advance();
        self.uploads += 1;
        Ok(row)
    }

    /// Wait for any in-flight transfer. Call before tearing down resources.
    pub fn wait_idle(&mut self) -> Result<(), GpuError> {
        if self.state == StagingState::Idle {
            return Ok(());
        }
        self.backend.wait_transfer(self.fence_timeout)?;
        self.state = StagingState::TransferComplete;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        waits: usize,
        resets: usize,
        submits: usize,
        staged_rows: Vec<u32>,
        uniforms: Vec<RowUniform>,
        in_flight: bool,
        fail_stage: bool,
        lost: bool,
        stage_timeouts: Vec<Option<Duration>>,
    }

    impl TransferBackend for Recorder {
        fn wait_transfer(&mut self, _timeout: Option<Duration>) -> Result<(), GpuError> {
            self.waits += 1;
            self.in_flight = false;
            Ok(())
        }

        fn reset_transfer(&mut self) {
            self.resets += 1;
        }

        fn stage(
            &mut self,
            row: u32,
            _samples: &[f32],
            uniform: &RowUniform,
            timeout: Option<Duration>,
        ) -> Result<(), GpuError> {
            assert!(!self.in_flight, "staging written while a transfer is in flight");
            if self.fail_stage {
                return Err(GpuError::DeviceLost);
            }
            self.staged_rows.push(row);
            self.uniforms.push(*uniform);
            self.stage_timeouts.push(timeout);
            Ok(())
        }

        fn submit_transfer(&mut self, _row: u32) -> Result<(), GpuError> {
            self.submits += 1;
            self.in_flight = true;
            Ok(())
        }

        fn check_device(&self) -> Result<(), GpuError> {
            if self.lost {
                return Err(GpuError::DeviceLost);
            }
            Ok(())
        }
    }

    struct Rows(Vec<Vec<f32>>);

    impl RowFeed for Rows {
        fn next_row(&mut self) -> Option<&[f32]> {
            if self.0.len() > 1 {
                self.0.remove(0);
            }
            self.0.first().map(Vec::as_slice)
        }
    }

    #[test]
    fn test_fence_accounting() {
        let mut pipeline = TransferPipeline::new(Recorder::default(), 8, 4, None);
        for _ in 0..6 {
            pipeline.upload_row(&[0.0; 8]).unwrap();
        }

        let rec = pipeline.backend();
        assert_eq!(rec.submits, 6);
        assert_eq!(rec.waits, 6);
        assert_eq!(rec.resets, 6);
        assert_eq!(pipeline.state(), StagingState::TransferPending);
    }

    #[test]
    fn test_rows_wrap_and_uniform_points_at_oldest() {
        let mut pipeline = TransferPipeline::new(Recorder::default(), 8, 3, None);
        for _ in 0..5 {
            pipeline.upload_row(&[1.0; 8]).unwrap();
        }

        let rec = pipeline.backend();
        assert_eq!(rec.staged_rows, vec![0, 1, 2, 0, 1]);
        let offsets: Vec<u32> = rec.uniforms.iter().map(|u| u.offset).collect();
        assert_eq!(offsets, vec![1, 2, 0, 1, 2]);
        assert!(rec.uniforms.iter().all(|u| u.rows == 3 && u.columns == 8));
    }

    #[test]
    fn test_paused_frame_touches_nothing() {
        let mut pipeline = TransferPipeline::new(Recorder::default(), 2, 4, None);
        let mut feed = Rows(vec![vec![0.5; 2], vec![0.25; 2]]);

        assert_eq!(pipeline.on_frame(true, &mut feed).unwrap(), None);
        assert_eq!(pipeline.backend().waits, 0);
        assert_eq!(pipeline.uploads(), 0);

        assert_eq!(pipeline.on_frame(false, &mut feed).unwrap(), Some(0));
        assert_eq!(pipeline.cursor().current(), 1);
    }

    #[test]
    fn test_stage_failure_leaves_staging_idle() {
        let backend = Recorder {
            fail_stage: true,
            ..Default::default()
        };
        let mut pipeline = TransferPipeline::new(backend, 2, 4, None);

        assert!(pipeline.upload_row(&[0.0; 2]).is_err());
        assert_eq!(pipeline.state(), StagingState::Idle);
        assert_eq!(pipeline.cursor().current(), 0);

        // Nothing was submitted, so there is nothing to wait for
        pipeline.wait_idle().unwrap();
        assert_eq!(pipeline.backend().waits, 1);
    }

    #[test]
    fn test_staging_wait_uses_fence_timeout() {
        let timeout = Some(Duration::from_millis(250));
        let mut pipeline = TransferPipeline::new(Recorder::default(), 2, 4, timeout);
        pipeline.upload_row(&[0.0; 2]).unwrap();
        pipeline.upload_row(&[0.0; 2]).unwrap();

        assert_eq!(pipeline.backend().stage_timeouts, vec![timeout, timeout]);
    }

    #[test]
    fn test_lost_device_stops_uploads() {
        let mut pipeline = TransferPipeline::new(Recorder::default(), 2, 4, None);
        pipeline.upload_row(&[0.0; 2]).unwrap();
        pipeline.backend.lost = true;

        assert!(matches!(pipeline.upload_row(&[0.0; 2]), Err(GpuError::DeviceLost)));
        let rec = pipeline.backend();
        assert_eq!(rec.waits, 1);
        assert_eq!(rec.submits, 1);
        assert_eq!(pipeline.cursor().current(), 1);
    }
}
