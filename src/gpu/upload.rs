//! wgpu implementation of the row transfer backend.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use wgpu::{Buffer, Device, Queue, SubmissionIndex};

use super::context::{DeviceLostFlag, GpuContext, GpuError};
use super::surface::RowBindings;
use super::textures::{map_write, RowTexture, StagingRows};
use super::transfer::{RowUniform, TransferBackend};

const UNIFORM_SIZE: u64 = std::mem::size_of::<RowUniform>() as u64;

/// Uploads rows through a mapped staging buffer into a [`RowTexture`].
///
/// The "fence" is the submission index of the last transfer; `None` means
/// signaled with nothing to wait for.
pub struct WgpuTransfer {
    device: Arc<Device>,
    queue: Arc<Queue>,
    texture: RowTexture,
    staging: StagingRows,
    uniform_staging: Buffer,
    uniform: Buffer,
    fence: Option<SubmissionIndex>,
    /// Last transfer submitted; unlike `fence` it survives a reset.
    last_submit: Option<SubmissionIndex>,
    lost: DeviceLostFlag,
}

impl WgpuTransfer {
    /// Create the texture and staging memory, and submit a transfer that
    /// clears every row.
    pub fn new(ctx: &GpuContext, columns: u32, rows: u32) -> Result<Self, GpuError> {
        let device = Arc::clone(&ctx.device);
        let queue = Arc::clone(&ctx.queue);
        let texture = RowTexture::new(&device, columns, rows)?;
        let staging = StagingRows::new(&device, columns, rows);

        let initial = RowUniform {
            offset: 1 % rows,
            rows,
            columns,
            _padding: 0,
        };
        let uniform_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("row_uniform_staging"),
            size: UNIFORM_SIZE,
            usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: true,
        });
        uniform_staging
            .slice(..)
            .get_mapped_range_mut()
            .copy_from_slice(bytemuck::bytes_of(&initial));
        uniform_staging.unmap();

        let uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("row_uniform"),
            size: UNIFORM_SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("row_clear"),
        });
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: staging.buffer(),
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(staging.padded_row_bytes()),
                    rows_per_image: Some(rows),
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture: texture.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: columns,
                height: rows,
                depth_or_array_layers: 1,
            },
        );
        encoder.copy_buffer_to_buffer(&uniform_staging, 0, &uniform, 0, UNIFORM_SIZE);
        let fence = queue.submit(std::iter::once(encoder.finish()));

        debug!("row texture {columns}x{rows} created, clear submitted");

        Ok(Self {
            device,
            queue,
            texture,
            staging,
            uniform_staging,
            uniform,
            fence: Some(fence.clone()),
            last_submit: Some(fence),
            lost: ctx.lost.clone(),
        })
    }

    /// Handles for binding the texture and uniform in a draw pass.
    pub fn bindings(&self) -> RowBindings {
        RowBindings {
            view: self.texture.view().clone(),
            uniform: self.uniform.clone(),
        }
    }
}

impl TransferBackend for WgpuTransfer {
    fn wait_transfer(&mut self, timeout: Option<Duration>) -> Result<(), GpuError> {
        let Some(index) = self.fence.clone() else {
            return Ok(());
        };
        match self.device.poll(wgpu::PollType::Wait {
            submission_index: Some(index),
            timeout,
        }) {
            Ok(_) => Ok(()),
            Err(wgpu::PollError::Timeout) => {
                Err(GpuError::FenceTimeout(timeout.unwrap_or_default()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reset_transfer(&mut self) {
        self.fence = None;
    }

    fn stage(
        &mut self,
        row: u32,
        samples: &[f32],
        uniform: &RowUniform,
        timeout: Option<Duration>,
    ) -> Result<(), GpuError> {
        let staging = &self.staging;
        map_write(
            &self.device,
            [
                (staging.buffer(), staging.row_range(row)),
                (&self.uniform_staging, 0..UNIFORM_SIZE),
            ],
            self.last_submit.clone(),
            timeout,
            |[row_data, uniform_data]| {
                staging.fill_row(row_data, samples);
                uniform_data.copy_from_slice(bytemuck::bytes_of(uniform));
            },
        )
    }

    fn submit_transfer(&mut self, row: u32) -> Result<(), GpuError> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("row_transfer"),
            });

        // Layout transitions around the copy are tracked by wgpu.
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: self.staging.buffer(),
                layout: wgpu::TexelCopyBufferLayout {
                    offset: self.staging.row_offset(row),
                    bytes_per_row: Some(self.staging.padded_row_bytes()),
                    rows_per_image: Some(1),
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture: self.texture.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: row, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: self.texture.columns(),
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        encoder.copy_buffer_to_buffer(&self.uniform_staging, 0, &self.uniform, 0, UNIFORM_SIZE);

        let index = self.queue.submit(std::iter::once(encoder.finish()));
        self.fence = Some(index.clone());
        self.last_submit = Some(index);
        Ok(())
    }

    fn check_device(&self) -> Result<(), GpuError> {
        self.lost.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::transfer::TransferPipeline;
    use crate::gpu::GpuContext;

    #[tokio::test]
    async fn test_upload_rows_on_device() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return, // Skip if no GPU
        };

        let backend = WgpuTransfer::new(&ctx, 64, 4).unwrap();
        let mut pipeline = TransferPipeline::new(backend, 64, 4, Some(Duration::from_secs(5)));

        for i in 0..6 {
            let row = pipeline.upload_row(&vec![i as f32 / 6.0; 64]).unwrap();
            assert_eq!(row, i % 4);
        }
        pipeline.wait_idle().unwrap();
    }
}
