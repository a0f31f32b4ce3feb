//! wgpu implementation of [`GraphicsBackend`].
//!
//! Resources are created immediately on the device. Submitted command lists
//! are planned into passes (see [`replay`]) and encoded into a single
//! command buffer per submit, so everything recorded for a frame reaches the
//! queue in recording order.

mod convert;
mod encode;
mod replay;

use std::collections::HashMap;
use std::sync::Arc;

use wgpu::util::DeviceExt;
use winit::window::Window;

use super::{
    BackendCapabilities, BufferDescriptor, BufferUsage, CommandList, DepthAttachment,
    GraphicsBackend, IndexFormat, PixelFormat, ProgramDescriptor, ProgramKind, TargetStatus,
    TextureDescriptor, TextureDimension, TextureRegion, TextureUsage, VertexArrayDescriptor,
    VertexAttribute,
};
use crate::renderer::error::RenderError;
use crate::renderer::handles::{
    BufferHandle, HandleAllocator, ProgramHandle, RenderTargetHandle, TextureHandle,
    VertexArrayHandle,
};
use crate::renderer::reflection::{ResourceKind, ShaderReflection, Stage, PARAMS_BLOCK};
use crate::settings::RenderSettings;

use encode::{BindGroupKey, Fallbacks, ParameterBuffer, PipelineKey};

pub(crate) const SCREEN_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

struct GpuBuffer {
    buffer: wgpu::Buffer,
    index_format: Option<wgpu::IndexFormat>,
}

struct GpuTexture {
    texture: wgpu::Texture,
    source: PixelFormat,
    layers: u32,
    mip_levels: u32,
    width: u32,
    height: u32,
}

struct GpuProgram {
    name: String,
    kind: ProgramKind,
    module: wgpu::ShaderModule,
    reflection: Arc<ShaderReflection>,
    group_layouts: Vec<wgpu::BindGroupLayout>,
    layout: wgpu::PipelineLayout,
    compute: Option<wgpu::ComputePipeline>,
}

struct Samplers {
    linear: wgpu::Sampler,
    comparison: wgpu::Sampler,
}

pub struct WgpuBackend {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    depth_view: wgpu::TextureView,
    ids: HandleAllocator,
    buffers: HashMap<BufferHandle, GpuBuffer>,
    textures: HashMap<TextureHandle, GpuTexture>,
    vertex_arrays: HashMap<VertexArrayHandle, Vec<VertexAttribute>>,
    render_targets: HashMap<RenderTargetHandle, DepthAttachment>,
    programs: HashMap<ProgramHandle, GpuProgram>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    bind_groups: HashMap<BindGroupKey, wgpu::BindGroup>,
    samplers: Samplers,
    fallbacks: Fallbacks,
    parameters: ParameterBuffer,
}

impl WgpuBackend {
    pub async fn new(window: Arc<Window>, settings: &RenderSettings) -> Result<Self, RenderError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .map_err(|err| RenderError::Surface(err.to_string()))?;
        log::info!("Surface created successfully!");

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| RenderError::Surface(format!("no suitable adapter: {err}")))?;

        log::info!("Using adapter: {:?}", adapter.get_info());
        log::info!("Using backend: {:?}", adapter.get_info().backend);

        let mut required_limits = wgpu::Limits::default();
        required_limits.max_bind_groups = required_limits.max_bind_groups.max(4);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Device"),
                required_features: wgpu::Features::empty(),
                required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|err| RenderError::Surface(format!("device request failed: {err}")))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| RenderError::Surface("surface reports no formats".to_string()))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: settings.present_mode(&surface_caps.present_modes),
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: settings.frames_in_flight.clamp(1, 4) as u32,
        };
        surface.configure(&device, &config);

        let depth_view = create_depth_view(&device, config.width, config.height);
        let samplers = Samplers::new(&device);
        let fallbacks = Fallbacks::new(&device);
        let parameters = ParameterBuffer::new(&device, 64 * 1024);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            depth_view,
            ids: HandleAllocator::default(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            vertex_arrays: HashMap::new(),
            render_targets: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            bind_groups: HashMap::new(),
            samplers,
            fallbacks,
            parameters,
        })
    }

    pub fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn reconfigure(&mut self) {
        self.surface.configure(&self.device, &self.config);
        self.depth_view = create_depth_view(&self.device, self.config.width, self.config.height);
    }

    fn bind_group_layouts(
        device: &wgpu::Device,
        name: &str,
        kind: ProgramKind,
        reflection: &ShaderReflection,
    ) -> Vec<wgpu::BindGroupLayout> {
        let visibility = match kind {
            ProgramKind::Graphics => wgpu::ShaderStages::VERTEX_FRAGMENT,
            ProgramKind::Compute => wgpu::ShaderStages::COMPUTE,
        };

        (0..reflection.group_count())
            .map(|group| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = reflection
                    .resources()
                    .iter()
                    .filter(|resource| resource.group == group)
                    .map(|resource| wgpu::BindGroupLayoutEntry {
                        binding: resource.binding,
                        visibility,
                        ty: match resource.kind {
                            ResourceKind::UniformBuffer { size } => wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: resource.name == PARAMS_BLOCK,
                                min_binding_size: wgpu::BufferSize::new(size as u64),
                            },
                            ResourceKind::Texture { view, sample } => wgpu::BindingType::Texture {
                                sample_type: convert::sample_type(sample, None),
                                view_dimension: convert::view_dimension(view),
                                multisampled: false,
                            },
                            ResourceKind::StorageTexture { view, format } => {
                                wgpu::BindingType::StorageTexture {
                                    access: wgpu::StorageTextureAccess::WriteOnly,
                                    format: convert::texture_format(
                                        format.unwrap_or(PixelFormat::Rgba16Float),
                                    ),
                                    view_dimension: convert::view_dimension(view),
                                }
                            }
                            ResourceKind::Sampler { comparison } => {
                                wgpu::BindingType::Sampler(if comparison {
                                    wgpu::SamplerBindingType::Comparison
                                } else {
                                    wgpu::SamplerBindingType::Filtering
                                })
                            }
                        },
                        count: None,
                    })
                    .collect();

                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{name} Group {group}")),
                    entries: &entries,
                })
            })
            .collect()
    }

    /// Drops cached bind groups that may reference released objects.
    fn invalidate_bind_groups(&mut self) {
        self.bind_groups.clear();
    }
}

impl Samplers {
    fn new(device: &wgpu::Device) -> Self {
        let linear = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("LinearSampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let comparison = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("ShadowSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });
        Self { linear, comparison }
    }
}

fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SCREEN_DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn texture_usages(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut usages = wgpu::TextureUsages::empty();
    if usage.contains(TextureUsage::SAMPLED) {
        usages |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::STORAGE) {
        usages |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if usage.contains(TextureUsage::RENDER_TARGET) {
        usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        usages |= wgpu::TextureUsages::COPY_DST;
    }
    usages
}

impl GraphicsBackend for WgpuBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            triangle_fans: false,
            double_vertex_attributes: false,
            max_texture_layers: self.device.limits().max_texture_array_layers,
        }
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle, RenderError> {
        if desc.contents.is_empty() {
            return Err(RenderError::allocation("buffer", "zero-sized buffer"));
        }

        let (usage, index_format, contents) = match desc.usage {
            BufferUsage::Vertex => (wgpu::BufferUsages::VERTEX, None, desc.contents.to_vec()),
            BufferUsage::Index(IndexFormat::U8) => (
                wgpu::BufferUsages::INDEX,
                Some(wgpu::IndexFormat::Uint16),
                convert::widen_u8_indices(desc.contents),
            ),
            BufferUsage::Index(IndexFormat::U16) => (
                wgpu::BufferUsages::INDEX,
                Some(wgpu::IndexFormat::Uint16),
                desc.contents.to_vec(),
            ),
            BufferUsage::Index(IndexFormat::U32) => (
                wgpu::BufferUsages::INDEX,
                Some(wgpu::IndexFormat::Uint32),
                desc.contents.to_vec(),
            ),
            BufferUsage::Uniform => (wgpu::BufferUsages::UNIFORM, None, desc.contents.to_vec()),
        };

        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: desc.label,
                contents: &contents,
                usage: usage | wgpu::BufferUsages::COPY_DST,
            });

        let handle = BufferHandle::from_raw(self.ids.next());
        self.buffers.insert(
            handle,
            GpuBuffer {
                buffer,
                index_format,
            },
        );
        Ok(handle)
    }

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor<'_>,
    ) -> Result<TextureHandle, RenderError> {
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 || desc.mip_levels == 0 {
            return Err(RenderError::allocation("texture", "zero-sized texture"));
        }
        let limits = self.device.limits();
        if desc.layers > limits.max_texture_array_layers {
            return Err(RenderError::allocation(
                "texture",
                format!("{} layers exceed the limit", desc.layers),
            ));
        }
        if matches!(desc.dimension, TextureDimension::Cube | TextureDimension::CubeArray)
            && (desc.layers % 6 != 0 || desc.width != desc.height)
        {
            return Err(RenderError::allocation(
                "texture",
                "cube textures need square faces and six layers per cube",
            ));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label,
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.layers,
            },
            mip_level_count: desc.mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: convert::texture_format(desc.format),
            usage: texture_usages(desc.usage),
            view_formats: &[],
        });

        let handle = TextureHandle::from_raw(self.ids.next());
        self.textures.insert(
            handle,
            GpuTexture {
                texture,
                source: desc.format,
                layers: desc.layers,
                mip_levels: desc.mip_levels,
                width: desc.width,
                height: desc.height,
            },
        );
        Ok(handle)
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        region: TextureRegion,
        data: &[u8],
    ) -> Result<(), RenderError> {
        let entry = self.textures.get(&texture).ok_or(RenderError::UnknownHandle {
            kind: TextureHandle::KIND,
            id: texture.raw(),
        })?;
        if region.layer >= entry.layers || region.mip_level >= entry.mip_levels {
            return Err(RenderError::LayerOutOfRange {
                texture,
                layer: region.layer,
            });
        }
        let expected = (region.width * region.height * entry.source.texel_size()) as usize;
        if data.len() < expected {
            return Err(RenderError::allocation(
                "texture upload",
                format!("{} bytes given, {} needed", data.len(), expected),
            ));
        }

        let texels = convert::texel_data(entry.source, &data[..expected]);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: region.mip_level,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: region.layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            &texels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(region.width * convert::uploaded_texel_size(entry.source)),
                rows_per_image: Some(region.height),
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDescriptor<'_>,
    ) -> Result<VertexArrayHandle, RenderError> {
        for attribute in desc.attributes {
            if !self.buffers.contains_key(&attribute.buffer) {
                return Err(RenderError::UnknownHandle {
                    kind: BufferHandle::KIND,
                    id: attribute.buffer.raw(),
                });
            }
            if attribute.format.is_double() {
                return Err(RenderError::allocation(
                    "vertex array",
                    "64-bit attributes are not supported",
                ));
            }
        }
        let handle = VertexArrayHandle::from_raw(self.ids.next());
        self.vertex_arrays.insert(handle, desc.attributes.to_vec());
        Ok(handle)
    }

    fn create_render_target(
        &mut self,
        depth: DepthAttachment,
    ) -> Result<RenderTargetHandle, RenderError> {
        let handle = RenderTargetHandle::from_raw(self.ids.next());
        self.render_targets.insert(handle, depth);
        Ok(handle)
    }

    fn render_target_status(&self, target: RenderTargetHandle) -> TargetStatus {
        let Some(attachment) = self.render_targets.get(&target) else {
            return TargetStatus::Incomplete("unknown render target".to_string());
        };
        let Some(texture) = self.textures.get(&attachment.texture()) else {
            return TargetStatus::Incomplete("attachment texture was released".to_string());
        };
        if texture.source != PixelFormat::Depth32Float {
            return TargetStatus::Incomplete(format!("{:?} is not a depth format", texture.source));
        }
        if !texture
            .texture
            .usage()
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
        {
            return TargetStatus::Incomplete("texture is not renderable".to_string());
        }
        let last_layer = match *attachment {
            DepthAttachment::Layer { layer, .. } => layer,
            DepthAttachment::Cube { cube_index, .. } => cube_index * 6 + 5,
        };
        if last_layer >= texture.layers {
            return TargetStatus::Incomplete(format!(
                "layer {} outside of {} layers",
                last_layer, texture.layers
            ));
        }
        TargetStatus::Complete
    }

    fn create_program(
        &mut self,
        desc: &ProgramDescriptor<'_>,
    ) -> Result<ProgramHandle, RenderError> {
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.name),
                source: wgpu::ShaderSource::Wgsl(desc.source.into()),
            });

        let group_layouts =
            Self::bind_group_layouts(&self.device, desc.name, desc.kind, &desc.reflection);
        let layout_refs: Vec<&wgpu::BindGroupLayout> = group_layouts.iter().collect();
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.name),
                bind_group_layouts: &layout_refs,
                push_constant_ranges: &[],
            });

        let compute = match desc.kind {
            ProgramKind::Compute => {
                let entry = desc.reflection.entry_point(Stage::Compute).ok_or_else(|| {
                    RenderError::ShaderParse {
                        name: desc.name.to_string(),
                        message: "no compute entry point".to_string(),
                    }
                })?;
                Some(
                    self.device
                        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                            label: Some(desc.name),
                            layout: Some(&layout),
                            module: &module,
                            entry_point: Some(entry.name.as_str()),
                            compilation_options: Default::default(),
                            cache: None,
                        }),
                )
            }
            ProgramKind::Graphics => {
                if desc.reflection.entry_point(Stage::Vertex).is_none() {
                    return Err(RenderError::ShaderParse {
                        name: desc.name.to_string(),
                        message: "no vertex entry point".to_string(),
                    });
                }
                None
            }
        };

        log::info!("Created program '{}'", desc.name);
        let handle = ProgramHandle::from_raw(self.ids.next());
        self.programs.insert(
            handle,
            GpuProgram {
                name: desc.name.to_string(),
                kind: desc.kind,
                module,
                reflection: Arc::clone(&desc.reflection),
                group_layouts,
                layout,
                compute,
            },
        );
        Ok(handle)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_none() {
            log::warn!("Release of unknown {} handle", BufferHandle::KIND);
        }
        self.invalidate_bind_groups();
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture).is_none() {
            log::warn!("Release of unknown {} handle", TextureHandle::KIND);
        }
        self.invalidate_bind_groups();
    }

    fn release_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        if self.vertex_arrays.remove(&vertex_array).is_none() {
            log::warn!("Release of unknown {} handle", VertexArrayHandle::KIND);
        }
    }

    fn release_render_target(&mut self, target: RenderTargetHandle) {
        if self.render_targets.remove(&target).is_none() {
            log::warn!("Release of unknown {} handle", RenderTargetHandle::KIND);
        }
    }

    fn release_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program).is_none() {
            log::warn!("Release of unknown {} handle", ProgramHandle::KIND);
        }
        self.pipelines.retain(|key, _| key.program != program);
        self.invalidate_bind_groups();
    }

    fn submit(&mut self, commands: CommandList) -> Result<(), RenderError> {
        let plan = replay::plan_passes(commands);
        self.execute(plan)
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.reconfigure();
    }
}
