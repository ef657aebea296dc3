//! GPU context initialization and management.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use wgpu::{Adapter, Device, Instance, Queue, Surface};
use winit::window::Window;

/// Errors that can occur during GPU operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,
    #[error("Failed to request device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
    #[error("Failed to create window surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error("Surface is not supported by the selected adapter")]
    SurfaceUnsupported,
    #[error("GPU transfer did not complete within {0:?}")]
    FenceTimeout(Duration),
    #[error("Failed to wait for the GPU: {0}")]
    Poll(#[from] wgpu::PollError),
    #[error("Failed to map staging memory: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),
    #[error("GPU device lost")]
    DeviceLost,
    #[error("Out of GPU memory")]
    OutOfMemory,
    #[error("Row texture of {columns}x{rows} exceeds the device limit of {limit}")]
    TextureTooLarge { columns: u32, rows: u32, limit: u32 },
}

/// Set once by the device-lost callback, checked by the render thread.
#[derive(Debug, Clone, Default)]
pub struct DeviceLostFlag(Arc<AtomicBool>);

impl DeviceLostFlag {
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_lost(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(DeviceLost)` once the device is gone.
    pub fn check(&self) -> Result<(), GpuError> {
        if self.is_lost() {
            return Err(GpuError::DeviceLost);
        }
        Ok(())
    }
}

/// GPU context holding device and queue.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Arc<Adapter>,
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
    pub lost: DeviceLostFlag,
}

impl GpuContext {
    /// Create a context without a presentation surface.
    pub async fn new() -> Result<Self, GpuError> {
        Self::request(Self::instance(), None).await
    }

    /// Create a context able to present to `window`, along with its surface.
    pub async fn for_window(window: Arc<Window>) -> Result<(Self, Surface<'static>), GpuError> {
        let instance = Self::instance();
        let surface = instance.create_surface(window)?;
        let ctx = Self::request(instance, Some(&surface)).await?;
        Ok((ctx, surface))
    }

    fn instance() -> Instance {
        Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::METAL | wgpu::Backends::VULKAN | wgpu::Backends::GL,
            ..Default::default()
        })
    }

    async fn request(instance: Instance, surface: Option<&Surface<'_>>) -> Result<Self, GpuError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: surface,
            })
            .await
            .map_err(|_| GpuError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("phobz-live"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await?;

        let lost = DeviceLostFlag::default();
        let flag = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            error!("GPU device lost ({reason:?}): {message}");
            flag.set();
        });

        let info = adapter.get_info();
        info!("GPU: {} ({:?})", info.name, info.backend);

        Ok(Self {
            instance,
            adapter: Arc::new(adapter),
            device: Arc::new(device),
            queue: Arc::new(queue),
            lost,
        })
    }
}
