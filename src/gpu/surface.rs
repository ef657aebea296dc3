//! Window surface presentation of the row texture.

use std::sync::Arc;

use log::{debug, warn};
use wgpu::{
    Adapter, BindGroup, BindGroupLayout, Buffer, Device, Queue, RenderPipeline, SubmissionIndex,
    Surface, SurfaceConfiguration, SurfaceTexture, TextureFormat, TextureView,
};

use super::context::{DeviceLostFlag, GpuContext, GpuError};
use super::frame::{Acquire, Extent, Swapchain};
use super::layouts::create_rows_layout;

const FRAMES_IN_FLIGHT: usize = 2;

/// Resources the draw pass reads, owned by the uploader.
#[derive(Clone)]
pub struct RowBindings {
    pub view: TextureView,
    pub uniform: Buffer,
}

/// Draws the row texture into a window surface.
pub struct SurfaceRenderer {
    adapter: Arc<Adapter>,
    device: Arc<Device>,
    queue: Arc<Queue>,
    surface: Surface<'static>,
    config: SurfaceConfiguration,
    bindings: RowBindings,
    layout: BindGroupLayout,
    pipeline: RenderPipeline,
    bind_group: BindGroup,
    in_flight: Vec<Option<SubmissionIndex>>,
    lost: DeviceLostFlag,
}

impl SurfaceRenderer {
    pub fn new(
        ctx: &GpuContext,
        surface: Surface<'static>,
        extent: Extent,
        bindings: RowBindings,
    ) -> Result<Self, GpuError> {
        let caps = surface.get_capabilities(&ctx.adapter);
        let Some(&fallback) = caps.formats.first() else {
            return Err(GpuError::SurfaceUnsupported);
        };
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(fallback);
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let max_dim = ctx.device.limits().max_texture_dimension_2d;
        let config = SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: extent.width.clamp(1, max_dim),
            height: extent.height.clamp(1, max_dim),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: FRAMES_IN_FLIGHT as u32,
        };
        surface.configure(&ctx.device, &config);

        let layout = create_rows_layout(&ctx.device);
        let pipeline = create_pipeline(&ctx.device, &layout, format);
        let bind_group = create_bind_group(&ctx.device, &layout, &bindings);

        debug!(
            "surface configured: {}x{} {:?}",
            config.width, config.height, format
        );

        Ok(Self {
            adapter: ctx.adapter.clone(),
            device: ctx.device.clone(),
            queue: ctx.queue.clone(),
            surface,
            config,
            bindings,
            layout,
            pipeline,
            bind_group,
            in_flight: vec![None; FRAMES_IN_FLIGHT],
            lost: ctx.lost.clone(),
        })
    }

    pub fn format(&self) -> TextureFormat {
        self.config.format
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.config.width, self.config.height)
    }

    fn wait_slot(&mut self, slot: usize) -> Result<(), GpuError> {
        if let Some(index) = self.in_flight[slot].take() {
            self.device.poll(wgpu::PollType::Wait {
                submission_index: Some(index),
                timeout: None,
            })?;
        }
        Ok(())
    }
}

impl Swapchain for SurfaceRenderer {
    type Image = SurfaceTexture;

    fn frames_in_flight(&self) -> usize {
        FRAMES_IN_FLIGHT
    }

    fn acquire(&mut self) -> Result<Acquire<SurfaceTexture>, GpuError> {
        match self.surface.get_current_texture() {
            Ok(frame) if frame.suboptimal => {
                // Dropping releases the image without presenting it.
                drop(frame);
                Ok(Acquire::Suboptimal)
            }
            Ok(frame) => Ok(Acquire::Ready(frame)),
            Err(wgpu::SurfaceError::Lost) if self.lost.is_lost() => Err(GpuError::DeviceLost),
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => Ok(Acquire::OutOfDate),
            Err(wgpu::SurfaceError::Timeout) => Ok(Acquire::Timeout),
            Err(wgpu::SurfaceError::OutOfMemory) => Err(GpuError::OutOfMemory),
            Err(e) => {
                warn!("surface acquire failed: {e}");
                Err(GpuError::DeviceLost)
            }
        }
    }

    fn submit(&mut self, image: &SurfaceTexture, slot: usize) -> Result<(), GpuError> {
        self.wait_slot(slot)?;

        let target = image
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("rows_draw"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("rows_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        self.in_flight[slot] = Some(self.queue.submit(std::iter::once(encoder.finish())));
        Ok(())
    }

    fn present(&mut self, image: SurfaceTexture) {
        image.present();
    }

    fn rebuild(&mut self, extent: Extent) -> Result<(), GpuError> {
        let caps = self.surface.get_capabilities(&self.adapter);
        if caps.formats.is_empty() {
            return Err(GpuError::SurfaceUnsupported);
        }
        if !caps.formats.contains(&self.config.format) {
            self.config.format = caps.formats[0];
        }

        let max_dim = self.device.limits().max_texture_dimension_2d;
        self.config.width = extent.width.clamp(1, max_dim);
        self.config.height = extent.height.clamp(1, max_dim);
        self.surface.configure(&self.device, &self.config);

        self.pipeline = create_pipeline(&self.device, &self.layout, self.config.format);
        self.bind_group = create_bind_group(&self.device, &self.layout, &self.bindings);
        self.in_flight.iter_mut().for_each(|slot| *slot = None);
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), GpuError> {
        self.device.poll(wgpu::PollType::wait_indefinitely())?;
        self.in_flight.iter_mut().for_each(|slot| *slot = None);
        Ok(())
    }

    fn check_device(&self) -> Result<(), GpuError> {
        self.lost.check()
    }
}

fn create_bind_group(
    device: &Device,
    layout: &BindGroupLayout,
    bindings: &RowBindings,
) -> BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("rows_bind_group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&bindings.view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: bindings.uniform.as_entire_binding(),
            },
        ],
    })
}

fn create_pipeline(
    device: &Device,
    layout: &BindGroupLayout,
    format: TextureFormat,
) -> RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("rows_shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("shaders/rows.wgsl").into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("rows_pipeline_layout"),
        bind_group_layouts: &[layout],
        immediate_size: 0,
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("rows_pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::WgpuTransfer;

    #[tokio::test]
    async fn test_rows_pipeline_compiles() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return, // Skip if no GPU
        };

        let transfer = WgpuTransfer::new(&ctx, 32, 8).unwrap();
        let layout = create_rows_layout(&ctx.device);
        let _pipeline = create_pipeline(&ctx.device, &layout, TextureFormat::Rgba8UnormSrgb);
        let _bind_group = create_bind_group(&ctx.device, &layout, &transfer.bindings());
    }
}
