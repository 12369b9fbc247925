use std::collections::HashMap;
use std::sync::mpsc;

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, warn};
use wgpu::util::DeviceExt;

use super::context::{GpuContext, OFFSCREEN_FORMAT};
use super::pipeline::{create_pipeline, PipelineLayouts};
use super::uniforms::EffectParams;
use crate::backend::{GpuBackend, ProgramId, Quad, TextureId, Uniforms};
use crate::compile::compile_fragment_shader;
use crate::error::{BackendError, ShaderError};
use crate::types::{Color, ShaderCompiler, Size};

struct OffscreenBuffer {
    label: String,
    size: Size,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct Program {
    label: String,
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
}

/// The screen of the current frame.
enum Frame {
    Surface {
        texture: wgpu::SurfaceTexture,
        view: wgpu::TextureView,
        size: [u32; 2],
    },
    Offscreen(TextureId),
}

/// Renders through wgpu.
///
/// Every draw is encoded and submitted on its own, so each pass sees the
/// finished output of the pass before it. Off-screen buffers are
/// `Rgba8Unorm`; programs carry one pipeline per destination format.
pub struct WgpuBackend {
    context: GpuContext,
    layouts: PipelineLayouts,
    compiler: ShaderCompiler,
    _white_texture: wgpu::Texture,
    white_view: wgpu::TextureView,
    buffers: HashMap<TextureId, OffscreenBuffer>,
    programs: HashMap<ProgramId, Program>,
    bindings: Vec<TextureId>,
    headless_screen: Option<TextureId>,
    frame: Option<Frame>,
    next_handle: u64,
}

impl WgpuBackend {
    /// A backend whose screen is an off-screen buffer of `screen_size`.
    pub fn headless(screen_size: Size, compiler: ShaderCompiler) -> Result<Self> {
        let context = GpuContext::headless()?;
        let mut backend = Self::from_context(context, compiler)?;
        let screen = backend.create_buffer("screen", screen_size)?;
        backend.headless_screen = Some(screen);
        Ok(backend)
    }

    /// A backend presenting to a window surface.
    ///
    /// # Safety
    ///
    /// `target` must outlive the backend.
    pub unsafe fn with_window<T>(target: &T, size: Size, compiler: ShaderCompiler) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let context = unsafe { GpuContext::with_window(target, size)? };
        Self::from_context(context, compiler)
    }

    fn from_context(context: GpuContext, compiler: ShaderCompiler) -> Result<Self> {
        let layouts = PipelineLayouts::new(&context.device, compiler)?;
        let white_texture = context.device.create_texture_with_data(
            &context.queue,
            &wgpu::TextureDescriptor {
                label: Some("white"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: OFFSCREEN_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[255, 255, 255, 255],
        );
        let white_view = white_texture.create_view(&wgpu::TextureViewDescriptor::default());
        debug!(%compiler, "initialised wgpu backend");

        Ok(Self {
            context,
            layouts,
            compiler,
            _white_texture: white_texture,
            white_view,
            buffers: HashMap::new(),
            programs: HashMap::new(),
            bindings: Vec::new(),
            headless_screen: None,
            frame: None,
            next_handle: 1,
        })
    }

    /// Reconfigures the window surface, or reallocates the headless screen.
    pub fn resize_screen(&mut self, size: Size) -> Result<(), BackendError> {
        match self.headless_screen {
            Some(screen) => self.resize_buffer(screen, size),
            None => {
                self.context.resize_surface(size);
                Ok(())
            }
        }
    }

    /// Acquires the screen for this frame and clears it to `clear`.
    pub fn begin_frame(&mut self, clear: Color) -> Result<(), BackendError> {
        if self.frame.is_some() {
            warn!("frame already active; presenting it first");
            self.finish_frame();
        }
        let frame = match (self.headless_screen, self.context.surface.as_ref()) {
            (Some(screen), _) => Frame::Offscreen(screen),
            (None, Some(state)) => {
                let texture = state.surface.get_current_texture().map_err(|err| {
                    BackendError::Allocation {
                        label: "surface frame".into(),
                        reason: err.to_string(),
                    }
                })?;
                let view = texture
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                let size = [state.config.width, state.config.height];
                Frame::Surface {
                    texture,
                    view,
                    size,
                }
            }
            (None, None) => return Err(BackendError::NoFrame),
        };
        self.frame = Some(frame);
        let (view, _, _) = self.destination()?;
        self.clear_view(view, clear);
        Ok(())
    }

    /// Presents the frame started by [`WgpuBackend::begin_frame`].
    pub fn finish_frame(&mut self) {
        if let Some(Frame::Surface { texture, .. }) = self.frame.take() {
            texture.present();
        }
    }

    /// The headless screen buffer, if this backend has one.
    pub fn screen(&self) -> Option<TextureId> {
        self.headless_screen
    }

    pub fn compiler(&self) -> ShaderCompiler {
        self.compiler
    }

    /// Copies a color buffer back into CPU memory.
    pub fn read_buffer(&self, buffer: TextureId) -> Result<image::RgbaImage, BackendError> {
        let entry = self.buffer(buffer)?;
        let device = &self.context.device;
        let (width, height) = (entry.size.width(), entry.size.height());
        let unpadded = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size: u64::from(padded) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue.submit(Some(encoder.finish()));

        let readback_error = |reason: String| BackendError::Readback {
            label: entry.label.clone(),
            reason,
        };
        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| readback_error(err.to_string()))?;
        receiver
            .recv()
            .map_err(|err| readback_error(err.to_string()))?
            .map_err(|err| readback_error(err.to_string()))?;

        let mut pixels = Vec::with_capacity((unpadded * height) as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        staging.unmap();

        image::RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| readback_error("pixel data does not match buffer size".into()))
    }

    fn allocate_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn buffer(&self, buffer: TextureId) -> Result<&OffscreenBuffer, BackendError> {
        self.buffers.get(&buffer).ok_or(BackendError::UnknownHandle {
            kind: "buffer",
            id: buffer.raw(),
        })
    }

    fn create_texture(&self, label: &str, size: Size) -> Result<(wgpu::Texture, wgpu::TextureView), BackendError> {
        let max = self.context.max_dimension;
        if size.width() > max || size.height() > max {
            return Err(BackendError::Allocation {
                label: label.to_string(),
                reason: format!("{size} exceeds the device limit of {max}"),
            });
        }
        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.width(),
                height: size.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok((texture, view))
    }

    /// View, format and pixel size of where the next draw lands.
    fn destination(&self) -> Result<(&wgpu::TextureView, wgpu::TextureFormat, [u32; 2]), BackendError> {
        let offscreen = |id: TextureId| {
            self.buffer(id).map(|entry| {
                (
                    &entry.view,
                    OFFSCREEN_FORMAT,
                    [entry.size.width(), entry.size.height()],
                )
            })
        };
        if let Some(&bound) = self.bindings.last() {
            return offscreen(bound);
        }
        match self.frame.as_ref() {
            Some(Frame::Surface { view, size, .. }) => {
                Ok((view, self.context.screen_format(), *size))
            }
            Some(Frame::Offscreen(screen)) => offscreen(*screen),
            None => Err(BackendError::NoFrame),
        }
    }

    fn clear_view(&self, view: &wgpu::TextureView, color: Color) {
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: f64::from(color[0]),
                            g: f64::from(color[1]),
                            b: f64::from(color[2]),
                            a: f64::from(color[3]),
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
        }
        self.context.queue.submit(Some(encoder.finish()));
    }

    fn destination_formats(&self) -> Vec<wgpu::TextureFormat> {
        let mut formats = vec![OFFSCREEN_FORMAT];
        let screen = self.context.screen_format();
        if screen != OFFSCREEN_FORMAT {
            formats.push(screen);
        }
        formats
    }
}

impl GpuBackend for WgpuBackend {
    fn create_buffer(&mut self, label: &str, size: Size) -> Result<TextureId, BackendError> {
        let (texture, view) = self.create_texture(label, size)?;
        let id = TextureId::from_raw(self.allocate_handle());
        self.buffers.insert(
            id,
            OffscreenBuffer {
                label: label.to_string(),
                size,
                texture,
                view,
            },
        );
        debug!(label, %size, buffer = %id, "created off-screen buffer");
        Ok(id)
    }

    fn resize_buffer(&mut self, buffer: TextureId, size: Size) -> Result<(), BackendError> {
        let label = self.buffer(buffer)?.label.clone();
        let (texture, view) = self.create_texture(&label, size)?;
        if let Some(entry) = self.buffers.get_mut(&buffer) {
            entry.size = size;
            entry.texture = texture;
            entry.view = view;
        }
        Ok(())
    }

    fn release_buffer(&mut self, buffer: TextureId) {
        if self.buffers.remove(&buffer).is_none() {
            warn!(%buffer, "released an unknown buffer");
        }
    }

    fn compile_program(&mut self, label: &str, source: &str) -> Result<ProgramId, ShaderError> {
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let built = compile_fragment_shader(device, label, source, self.compiler).map(|module| {
            self.destination_formats()
                .into_iter()
                .map(|format| {
                    let pipeline = create_pipeline(device, &self.layouts, label, &module, format);
                    (format, pipeline)
                })
                .collect::<HashMap<_, _>>()
        });
        let scope_error = pollster::block_on(device.pop_error_scope());

        let pipelines = built?;
        if let Some(err) = scope_error {
            return Err(ShaderError::new(label, err.to_string()));
        }
        let id = ProgramId::from_raw(self.allocate_handle());
        self.programs.insert(
            id,
            Program {
                label: label.to_string(),
                pipelines,
            },
        );
        Ok(id)
    }

    fn release_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_none() {
            warn!(%program, "released an unknown program");
        }
    }

    fn begin_capture(&mut self, buffer: TextureId, clear: Option<Color>) -> Result<(), BackendError> {
        let view = &self.buffer(buffer)?.view;
        if let Some(color) = clear {
            self.clear_view(view, color);
        }
        self.bindings.push(buffer);
        Ok(())
    }

    fn end_capture(&mut self) -> Result<(), BackendError> {
        self.bindings.pop().map(|_| ()).ok_or(BackendError::NoCapture)
    }

    fn draw_quad(
        &mut self,
        program: ProgramId,
        quad: &Quad,
        uniforms: &Uniforms,
    ) -> Result<(), BackendError> {
        let (view, format, size) = self.destination()?;
        let unknown_program = BackendError::UnknownHandle {
            kind: "program",
            id: program.raw(),
        };
        let entry = self.programs.get(&program).ok_or(unknown_program.clone())?;
        let pipeline = entry.pipelines.get(&format).ok_or(unknown_program)?;
        let input = match quad.texture {
            Some(texture) => &self.buffer(texture)?.view,
            None => &self.white_view,
        };

        let device = &self.context.device;
        let params = EffectParams::for_draw(size, quad, uniforms);
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("effect params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("effect params bind group"),
            layout: &self.layouts.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        let input_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pass input bind group"),
            layout: &self.layouts.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(input),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.layouts.sampler),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(entry.label.as_str()),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(entry.label.as_str()),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &uniform_bind_group, &[]);
            pass.set_bind_group(1, &input_bind_group, &[]);
            pass.draw(0..6, 0..1);
        }
        self.context.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}
