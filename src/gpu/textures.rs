//! Row texture and host-visible staging memory.

use std::ops::Range;
use std::sync::mpsc;
use std::time::Duration;

use wgpu::{
    Buffer, BufferAddress, Device, SubmissionIndex, Texture, TextureFormat, TextureUsages,
    TextureView,
};

use super::context::GpuError;

/// Texel format of the row texture: one f32 per column.
pub const ROW_FORMAT: TextureFormat = TextureFormat::R32Float;

const BYTES_PER_TEXEL: u32 = 4;

/// Device-local circular texture holding one row per upload.
///
/// The texture must outlive its view, so we keep them together.
pub struct RowTexture {
    texture: Texture,
    view: TextureView,
    columns: u32,
}

impl RowTexture {
    pub fn new(device: &Device, columns: u32, rows: u32) -> Result<Self, GpuError> {
        let limit = device.limits().max_texture_dimension_2d;
        if columns == 0 || rows == 0 || columns > limit || rows > limit {
            return Err(GpuError::TextureTooLarge {
                columns,
                rows,
                limit,
            });
        }

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("row_texture"),
            size: wgpu::Extent3d {
                width: columns,
                height: rows,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: ROW_FORMAT,
            usage: TextureUsages::COPY_DST | TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            texture,
            view,
            columns,
        })
    }

    /// Get the texture view for sampling.
    pub fn view(&self) -> &TextureView {
        &self.view
    }

    /// Get the underlying texture (for copy operations).
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }
}

/// Host-writable staging buffer laid out as padded texture rows.
///
/// Created zero-filled, so copying every row once clears the texture.
pub struct StagingRows {
    buffer: Buffer,
    padded_row_bytes: u32,
    unpadded_row_bytes: u32,
}

impl StagingRows {
    pub fn new(device: &Device, columns: u32, rows: u32) -> Self {
        let unpadded_row_bytes = columns * BYTES_PER_TEXEL;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row_bytes = unpadded_row_bytes.div_ceil(align) * align;

        // Mapped at creation so the contents start zeroed.
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("row_staging"),
            size: padded_row_bytes as u64 * rows as u64,
            usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: true,
        });
        buffer.unmap();

        Self {
            buffer,
            padded_row_bytes,
            unpadded_row_bytes,
        }
    }

    /// Get the underlying buffer.
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Get the padded bytes per row (for texture copy).
    pub fn padded_row_bytes(&self) -> u32 {
        self.padded_row_bytes
    }

    /// Byte offset of `row` inside the buffer.
    pub fn row_offset(&self, row: u32) -> BufferAddress {
        row as BufferAddress * self.padded_row_bytes as BufferAddress
    }

    /// Buffer range holding `row`.
    pub fn row_range(&self, row: u32) -> Range<BufferAddress> {
        let start = self.row_offset(row);
        start..start + self.padded_row_bytes as BufferAddress
    }

    /// Fill one mapped row with `samples`, zero-padding a short row.
    pub fn fill_row(&self, data: &mut [u8], samples: &[f32]) {
        let bytes: &[u8] = bytemuck::cast_slice(samples);
        let n = bytes.len().min(self.unpadded_row_bytes as usize).min(data.len());
        data[..n].copy_from_slice(&bytes[..n]);
        data[n..].fill(0);
    }
}

/// Map several MAP_WRITE ranges, let `write` fill them, then unmap.
///
/// All ranges resolve under one poll that waits at most `timeout` for
/// `after`, the last submission that used these buffers. With `after` done
/// already the poll only collects the map callbacks. `None` means the most
/// recent submission.
pub fn map_write<const N: usize>(
    device: &Device,
    ranges: [(&Buffer, Range<BufferAddress>); N],
    after: Option<SubmissionIndex>,
    timeout: Option<Duration>,
    write: impl FnOnce([&mut [u8]; N]),
) -> Result<(), GpuError> {
    let (sender, receiver) = mpsc::channel();
    for (buffer, range) in &ranges {
        let sender = sender.clone();
        buffer
            .slice(range.clone())
            .map_async(wgpu::MapMode::Write, move |result| {
                let _ = sender.send(result);
            });
    }
    drop(sender);

    let wait = wgpu::PollType::Wait {
        submission_index: after,
        timeout,
    };
    match device.poll(wait) {
        Ok(_) => {}
        Err(wgpu::PollError::Timeout) => {
            return Err(GpuError::FenceTimeout(timeout.unwrap_or_default()))
        }
        Err(e) => return Err(e.into()),
    }
    for _ in 0..N {
        match receiver.try_recv() {
            Ok(result) => result?,
            Err(mpsc::TryRecvError::Empty) => {
                return Err(GpuError::FenceTimeout(timeout.unwrap_or_default()))
            }
            Err(mpsc::TryRecvError::Disconnected) => return Err(GpuError::DeviceLost),
        }
    }

    {
        let mut views = ranges.each_ref().map(|(buffer, range)| {
            buffer.slice(range.clone()).get_mapped_range_mut()
        });
        write(views.each_mut().map(|view| &mut view[..]));
    }
    for (buffer, _) in &ranges {
        buffer.unmap();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuContext;

    #[tokio::test]
    async fn test_row_texture_creation() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };

        let texture = RowTexture::new(&ctx.device, 256, 16).unwrap();
        assert_eq!(texture.columns(), 256);
        assert!(RowTexture::new(&ctx.device, 0, 16).is_err());
    }

    #[tokio::test]
    async fn test_staging_rows_padding() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };

        let staging = StagingRows::new(&ctx.device, 100, 8);
        assert_eq!(staging.padded_row_bytes(), 512);
        assert_eq!(staging.row_offset(3), 1536);
        assert_eq!(staging.row_range(3), 1536..2048);

        map_write(
            &ctx.device,
            [(staging.buffer(), staging.row_range(3))],
            None,
            Some(std::time::Duration::from_secs(5)),
            |[data]| {
                staging.fill_row(data, &[1.0; 100]);
                assert_eq!(&data[..4], &1.0f32.to_ne_bytes());
                assert!(data[400..].iter().all(|&b| b == 0));
            },
        )
        .unwrap();
    }
}
