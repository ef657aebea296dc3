//! Window and event loop driving a [`Session`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, trace};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use crate::gpu::{
    Extent, FrameLoop, FrameStatus, GpuContext, SkipReason, SurfaceRenderer, TransferPipeline,
    WgpuTransfer,
};
use crate::pipeline::{PipelineError, Session, VisualizerConfig};

/// Everything alive while the window is open.
///
/// Drop order is the reverse of creation: audio stops first, then the GPU
/// objects, and the window outlives the surface that draws into it.
struct Running {
    session: Session,
    transfer: TransferPipeline<WgpuTransfer>,
    frames: FrameLoop<SurfaceRenderer>,
    _ctx: GpuContext,
    window: Arc<Window>,
}

impl Running {
    fn new(
        event_loop: &ActiveEventLoop,
        path: &Path,
        config: &VisualizerConfig,
    ) -> Result<Self, PipelineError> {
        let attrs = Window::default_attributes()
            .with_title(format!("phobz-live - {}", path.display()))
            .with_inner_size(PhysicalSize::new(config.window_width, config.window_height));
        let window = Arc::new(event_loop.create_window(attrs)?);

        let (ctx, surface) = pollster::block_on(GpuContext::for_window(window.clone()))?;

        let backend = WgpuTransfer::new(&ctx, config.chunk_size, config.rows)?;
        let bindings = backend.bindings();

        let size = window.inner_size();
        let extent = Extent::new(size.width, size.height);
        let renderer = SurfaceRenderer::new(&ctx, surface, extent, bindings)?;
        info!("Surface format {:?}", renderer.format());

        let frames = FrameLoop::new(renderer, extent);
        let transfer = TransferPipeline::new(
            backend,
            config.chunk_size,
            config.rows,
            config.fence_timeout(),
        );

        // Audio starts last so nothing plays before there is a window.
        let session = Session::start(path, config)?;

        Ok(Self {
            session,
            transfer,
            frames,
            _ctx: ctx,
            window,
        })
    }

    fn redraw(&mut self) -> Result<(), PipelineError> {
        let start = Instant::now();

        let paused = self.session.is_paused();
        self.transfer.on_frame(paused, self.session.feeder_mut())?;

        match self.frames.draw()? {
            FrameStatus::Presented => {}
            FrameStatus::Skipped(SkipReason::OutOfDate | SkipReason::Suboptimal) => {
                let size = self.window.inner_size();
                self.frames.resize(Extent::new(size.width, size.height))?;
            }
            FrameStatus::Skipped(reason) => trace!("frame skipped: {reason:?}"),
        }

        trace!("frame {} us", start.elapsed().as_micros());
        Ok(())
    }

    fn finish(mut self) -> Result<(), PipelineError> {
        let stopped = self.session.shutdown();
        self.transfer.wait_idle()?;
        self.frames.finish()?;
        debug!(
            "{} frames presented, {} skipped, {} rebuilds, {} rows uploaded",
            self.frames.presented(),
            self.frames.skipped(),
            self.frames.rebuilds(),
            self.transfer.uploads()
        );
        stopped
    }
}

/// winit application: one window visualising one file.
pub struct App {
    path: PathBuf,
    config: VisualizerConfig,
    running: Option<Running>,
    error: Option<PipelineError>,
}

impl App {
    pub fn new(path: PathBuf, config: VisualizerConfig) -> Self {
        Self {
            path,
            config,
            running: None,
            error: None,
        }
    }

    /// Error that ended the event loop, if any.
    pub fn take_error(&mut self) -> Option<PipelineError> {
        self.error.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: PipelineError) {
        error!("{err}");
        if self.error.is_none() {
            self.error = Some(err);
        }
        self.stop(event_loop);
    }

    fn stop(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(running) = self.running.take() {
            if let Err(e) = running.finish() {
                error!("{e}");
                self.error.get_or_insert(e);
            }
        }
        event_loop.exit();
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, event: KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        match event.logical_key {
            Key::Named(NamedKey::Space) => {
                if let Some(running) = self.running.as_mut() {
                    if let Err(e) = running.session.toggle_pause() {
                        self.fail(event_loop, e);
                    }
                }
            }
            Key::Named(NamedKey::Escape) => self.stop(event_loop),
            Key::Character(c) if c.eq_ignore_ascii_case("q") => self.stop(event_loop),
            _ => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.running.is_some() {
            return;
        }
        match Running::new(event_loop, &self.path, &self.config) {
            Ok(running) => {
                running.window.request_redraw();
                self.running = Some(running);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        if running.window.id() != id {
            return;
        }

        match event {
            WindowEvent::CloseRequested => self.stop(event_loop),
            WindowEvent::KeyboardInput { event, .. } => self.handle_key(event_loop, event),
            WindowEvent::Resized(size) => {
                if let Err(e) = running.frames.resize(Extent::new(size.width, size.height)) {
                    self.fail(event_loop, e.into());
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = running.redraw() {
                    self.fail(event_loop, e);
                } else if running.session.is_finished() {
                    info!("Playback finished");
                    self.stop(event_loop);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(running) = &self.running {
            running.window.request_redraw();
        }
    }
}

/// Open a window for `path` and run until playback ends or the user quits.
pub fn run(path: PathBuf, config: VisualizerConfig) -> Result<(), PipelineError> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(path, config);
    event_loop.run_app(&mut app)?;

    match app.take_error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
