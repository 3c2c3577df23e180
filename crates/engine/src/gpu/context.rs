use std::borrow::Cow;
use std::cell::RefCell;
use std::num::NonZeroU64;
use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::error::EngineError;

use super::backend::{
    BindGroupEntry, BindingKind, BindingSlot, BufferDesc, BufferRole, ComputePipelineDesc,
    FrameCommands, GpuBackend, RenderPipelineDesc, ShaderStages,
};

const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// A device buffer together with the label it was created under.
#[derive(Debug)]
pub struct WgpuBuffer {
    raw: wgpu::Buffer,
    label: String,
}

impl WgpuBuffer {
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Adapter details logged at startup and reported by the headless runner.
#[derive(Debug, Clone)]
pub struct AdapterSummary {
    pub name: String,
    pub backend: String,
    pub device_type: String,
}

impl AdapterSummary {
    fn from_info(info: &wgpu::AdapterInfo) -> Self {
        Self {
            name: info.name.clone(),
            backend: format!("{:?}", info.backend),
            device_type: format!("{:?}", info.device_type),
        }
    }
}

enum DrawTarget {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    Offscreen {
        _texture: wgpu::Texture,
        view: wgpu::TextureView,
    },
}

/// Owns the wgpu device and queue plus whatever the frames are drawn into:
/// a window surface or an offscreen texture.
pub struct WgpuBackend {
    _instance: wgpu::Instance,
    device: wgpu::Device,
    queue: wgpu::Queue,
    target: RefCell<DrawTarget>,
    format: wgpu::TextureFormat,
    limits: wgpu::Limits,
    adapter: AdapterSummary,
    size: PhysicalSize<u32>,
}

impl WgpuBackend {
    pub fn for_window(window: Arc<Window>) -> Result<Self> {
        let instance = new_instance();
        let size = window.inner_size();
        let surface = instance
            .create_surface(window)
            .context("failed to create rendering surface")?;
        let (adapter, device, queue) = acquire_device(&instance, Some(&surface))?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|format| format.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .context("surface reports no supported formats")?;
        let present_mode = caps
            .present_modes
            .iter()
            .copied()
            .find(|mode| *mode == wgpu::PresentMode::Fifo)
            .unwrap_or(wgpu::PresentMode::AutoVsync);
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);
        tracing::debug!(?format, ?present_mode, "configuring surface");

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self {
            _instance: instance,
            limits: device.limits(),
            adapter: AdapterSummary::from_info(&adapter.get_info()),
            device,
            queue,
            target: RefCell::new(DrawTarget::Surface { surface, config }),
            format,
            size,
        })
    }

    /// Renders into an offscreen texture of the given size.
    pub fn headless(size: PhysicalSize<u32>) -> Result<Self> {
        let instance = new_instance();
        let (adapter, device, queue) = acquire_device(&instance, None)?;
        let (texture, view) = offscreen_target(&device, size);
        Ok(Self {
            _instance: instance,
            limits: device.limits(),
            adapter: AdapterSummary::from_info(&adapter.get_info()),
            device,
            queue,
            target: RefCell::new(DrawTarget::Offscreen {
                _texture: texture,
                view,
            }),
            format: OFFSCREEN_FORMAT,
            size,
        })
    }

    pub fn adapter(&self) -> &AdapterSummary {
        &self.adapter
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.size = new_size;
        let target = self.target.get_mut();
        match target {
            DrawTarget::Surface { surface, config } => {
                config.width = new_size.width;
                config.height = new_size.height;
                surface.configure(&self.device, config);
            }
            DrawTarget::Offscreen { .. } => {
                let (texture, view) = offscreen_target(&self.device, new_size);
                *target = DrawTarget::Offscreen {
                    _texture: texture,
                    view,
                };
            }
        }
    }

    fn scoped<T>(
        &self,
        filter: wgpu::ErrorFilter,
        build: impl FnOnce() -> T,
    ) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(filter);
        let value = build();
        let error = pollster::block_on(self.device.pop_error_scope());
        (value, error)
    }

    fn validated<T>(&self, build: impl FnOnce() -> T) -> Result<T, String> {
        match self.scoped(wgpu::ErrorFilter::Validation, build) {
            (value, None) => Ok(value),
            (_, Some(error)) => Err(error.to_string()),
        }
    }

    fn encode_render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        frame: &FrameCommands<'_, Self>,
    ) {
        let render = &frame.render;
        let [r, g, b, a] = render.clear_color;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Cell render pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(render.pipeline);
        pass.set_vertex_buffer(0, render.vertex_buffer.raw.slice(..));
        pass.set_bind_group(0, render.bind_group, &[]);
        pass.draw(0..render.vertex_count, 0..render.instance_count);
    }
}

fn new_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    })
}

fn acquire_device(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'static>>,
) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue)> {
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::default(),
        compatible_surface: surface,
        force_fallback_adapter: false,
    }))
    .context("failed to find a suitable GPU adapter")?;

    let info = adapter.get_info();
    tracing::debug!(
        name = %info.name,
        backend = ?info.backend,
        device_type = ?info.device_type,
        "selected GPU adapter"
    );

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("lifegrid device"),
        required_features: wgpu::Features::empty(),
        required_limits: adapter.limits(),
        memory_hints: wgpu::MemoryHints::MemoryUsage,
        trace: wgpu::Trace::default(),
    }))
    .context("failed to create GPU device")?;
    Ok((adapter, device, queue))
}

fn offscreen_target(
    device: &wgpu::Device,
    size: PhysicalSize<u32>,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Offscreen target"),
        size: wgpu::Extent3d {
            width: size.width.max(1),
            height: size.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OFFSCREEN_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

fn buffer_usage(role: BufferRole) -> wgpu::BufferUsages {
    match role {
        BufferRole::Vertex => wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        BufferRole::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        BufferRole::State => {
            wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC
        }
    }
}

fn check_readback(
    label: &str,
    usage: wgpu::BufferUsages,
    buffer_size: u64,
    size: u64,
) -> Result<(), EngineError> {
    if !usage.contains(wgpu::BufferUsages::COPY_SRC) {
        return Err(EngineError::readback(label, "buffer was not created copy-src"));
    }
    if size > buffer_size || size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
        return Err(EngineError::readback(
            label,
            format!("cannot copy {size} bytes from a {buffer_size} byte buffer"),
        ));
    }
    Ok(())
}

fn shader_stages(stages: ShaderStages) -> wgpu::ShaderStages {
    let mut out = wgpu::ShaderStages::NONE;
    if stages.vertex {
        out |= wgpu::ShaderStages::VERTEX;
    }
    if stages.fragment {
        out |= wgpu::ShaderStages::FRAGMENT;
    }
    if stages.compute {
        out |= wgpu::ShaderStages::COMPUTE;
    }
    out
}

fn layout_entry(slot: &BindingSlot) -> wgpu::BindGroupLayoutEntry {
    let ty = match slot.kind {
        BindingKind::Uniform => wgpu::BufferBindingType::Uniform,
        BindingKind::ReadOnlyStorage => wgpu::BufferBindingType::Storage { read_only: true },
        BindingKind::Storage => wgpu::BufferBindingType::Storage { read_only: false },
    };
    wgpu::BindGroupLayoutEntry {
        binding: slot.binding,
        visibility: shader_stages(slot.visibility),
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(slot.min_size),
        },
        count: None,
    }
}

impl GpuBackend for WgpuBackend {
    type Buffer = WgpuBuffer;
    type BindingLayout = wgpu::BindGroupLayout;
    type PipelineLayout = wgpu::PipelineLayout;
    type BindGroup = wgpu::BindGroup;
    type Program = wgpu::ShaderModule;
    type RenderPipeline = wgpu::RenderPipeline;
    type ComputePipeline = wgpu::ComputePipeline;
    type ColorFormat = wgpu::TextureFormat;

    fn name(&self) -> &str {
        "wgpu"
    }

    fn color_format(&self) -> Self::ColorFormat {
        self.format
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<Self::Buffer, EngineError> {
        let mut limit = self.limits.max_buffer_size;
        if desc.role == BufferRole::State {
            limit = limit.min(u64::from(self.limits.max_storage_buffer_binding_size));
        }
        if desc.size > limit {
            return Err(EngineError::allocation(
                desc.label,
                desc.size,
                format!("device limit is {limit} bytes"),
            ));
        }

        let (buffer, oom) = self.scoped(wgpu::ErrorFilter::OutOfMemory, || {
            self.validated(|| {
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(desc.label),
                    size: desc.size,
                    usage: buffer_usage(desc.role),
                    mapped_at_creation: false,
                })
            })
        });
        if let Some(error) = oom {
            return Err(EngineError::allocation(desc.label, desc.size, error.to_string()));
        }
        let raw =
            buffer.map_err(|reason| EngineError::allocation(desc.label, desc.size, reason))?;
        Ok(WgpuBuffer {
            raw,
            label: desc.label.to_string(),
        })
    }

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(&buffer.raw, offset, data);
    }

    fn read_buffer(&self, buffer: &Self::Buffer, size: u64) -> Result<Vec<u8>, EngineError> {
        let label = buffer.label();
        check_readback(label, buffer.raw.usage(), buffer.raw.size(), size)?;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback encoder"),
            });
        encoder.copy_buffer_to_buffer(&buffer.raw, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| EngineError::readback(label, err.to_string()))?;
        rx.recv()
            .map_err(|err| EngineError::readback(label, err.to_string()))?
            .map_err(|err| EngineError::readback(label, err.to_string()))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }

    fn compile_program(&self, label: &str, source: &str) -> Result<Self::Program, EngineError> {
        self.validated(|| {
            self.device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(Cow::Owned(source.to_string())),
                })
        })
        .map_err(|reason| EngineError::program_load(label, reason))
    }

    fn create_binding_layout(&self, label: &str, slots: &[BindingSlot]) -> Self::BindingLayout {
        let entries: Vec<_> = slots.iter().map(layout_entry).collect();
        self.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &entries,
            })
    }

    fn create_pipeline_layout(
        &self,
        label: &str,
        layout: &Self::BindingLayout,
    ) -> Self::PipelineLayout {
        self.device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            })
    }

    fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDesc<'_, Self>,
    ) -> Result<Self::RenderPipeline, EngineError> {
        let attributes = [wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x2,
            offset: 0,
            shader_location: desc.vertex_layout.shader_location,
        }];
        self.validated(|| {
            self.device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(desc.label),
                    layout: Some(desc.layout),
                    vertex: wgpu::VertexState {
                        module: desc.program,
                        entry_point: Some(desc.vertex_entry),
                        buffers: &[wgpu::VertexBufferLayout {
                            array_stride: desc.vertex_layout.array_stride,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &attributes,
                        }],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    fragment: Some(wgpu::FragmentState {
                        module: desc.program,
                        entry_point: Some(desc.fragment_entry),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: desc.color_format,
                            blend: Some(wgpu::BlendState::REPLACE),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    multiview: None,
                    cache: None,
                })
        })
        .map_err(|reason| EngineError::program_load(desc.label, reason))
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc<'_, Self>,
    ) -> Result<Self::ComputePipeline, EngineError> {
        self.validated(|| {
            self.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(desc.label),
                    layout: Some(desc.layout),
                    module: desc.program,
                    entry_point: Some(desc.entry),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
        })
        .map_err(|reason| EngineError::program_load(desc.label, reason))
    }

    fn create_bind_group(
        &self,
        label: &str,
        layout: &Self::BindingLayout,
        entries: &[BindGroupEntry<'_, Self>],
    ) -> Result<Self::BindGroup, EngineError> {
        let entries: Vec<_> = entries
            .iter()
            .map(|entry| wgpu::BindGroupEntry {
                binding: entry.binding,
                resource: entry.buffer.raw.as_entire_binding(),
            })
            .collect();
        self.validated(|| {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout,
                entries: &entries,
            })
        })
        .map_err(|reason| EngineError::binding(label, reason))
    }

    fn submit(&self, frame: &FrameCommands<'_, Self>) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame encoder"),
            });

        if let Some(compute) = &frame.compute {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Simulation compute pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(compute.pipeline);
            pass.set_bind_group(0, compute.bind_group, &[]);
            let [x, y, z] = compute.workgroups;
            pass.dispatch_workgroups(x, y, z);
        }

        let target = self.target.borrow();
        let surface_texture = match &*target {
            DrawTarget::Surface { surface, config } => match surface.get_current_texture() {
                Ok(texture) => Some(texture),
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    tracing::warn!("surface lost; reconfiguring and skipping presentation");
                    surface.configure(&self.device, config);
                    None
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to acquire frame; skipping presentation");
                    None
                }
            },
            DrawTarget::Offscreen { .. } => None,
        };

        match (&*target, &surface_texture) {
            (_, Some(texture)) => {
                let view = texture
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                self.encode_render(&mut encoder, &view, frame);
            }
            (DrawTarget::Offscreen { view, .. }, None) => {
                self.encode_render(&mut encoder, view, frame);
            }
            (DrawTarget::Surface { .. }, None) => {}
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(texture) = surface_texture {
            texture.present();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readback_errors_name_the_buffer() {
        let usage = buffer_usage(BufferRole::Uniform);
        match check_readback("Grid uniforms", usage, 8, 8) {
            Err(EngineError::Readback { label, reason }) => {
                assert_eq!(label, "Grid uniforms");
                assert!(reason.contains("copy-src"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn readback_range_is_checked() {
        let usage = buffer_usage(BufferRole::State);
        assert!(check_readback("Cell state B", usage, 64, 64).is_ok());
        match check_readback("Cell state B", usage, 64, 128) {
            Err(EngineError::Readback { label, reason }) => {
                assert_eq!(label, "Cell state B");
                assert!(reason.contains("128 bytes from a 64 byte buffer"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(check_readback("Cell state B", usage, 64, 6).is_err());
    }
}
