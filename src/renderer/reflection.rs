//! Shader reflection over naga modules.
//!
//! Uniform block layouts, resource bindings and entry points are read from
//! the parsed WGSL so that constant packing and bind group construction
//! follow whatever the shader declares. Every lookup returns `None` when the
//! shader does not declare the requested name.

use naga::{AddressSpace, ArraySize, Binding, ImageClass, ImageDimension, ScalarKind, TypeInner};

use super::backend::PixelFormat;
use super::error::RenderError;

/// Block holding a program's loose parameters.
pub const PARAMS_BLOCK: &str = "params";

/// Byte range of a uniform field relative to the start of its block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub offset: u32,
    pub size: u32,
}

impl FieldInfo {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset as usize..(self.offset + self.size) as usize
    }
}

#[derive(Clone, Debug)]
pub struct UniformBlock {
    /// Struct type name, e.g. `DrawFrameConstants`.
    pub name: String,
    /// Variable name, e.g. `frame`.
    pub variable: String,
    pub group: u32,
    pub binding: u32,
    pub size: u32,
    ty: naga::Handle<naga::Type>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureViewKind {
    D1,
    D2,
    D2Array,
    D3,
    Cube,
    CubeArray,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Float,
    Depth,
    Sint,
    Uint,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    UniformBuffer {
        size: u32,
    },
    Texture {
        view: TextureViewKind,
        sample: SampleKind,
    },
    StorageTexture {
        view: TextureViewKind,
        format: Option<PixelFormat>,
    },
    Sampler {
        comparison: bool,
    },
}

#[derive(Clone, Debug)]
pub struct ResourceBinding {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub kind: ResourceKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Clone, Debug)]
pub struct EntryPointInfo {
    pub name: String,
    pub stage: Stage,
    pub workgroup_size: [u32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputScalar {
    Float,
    Sint,
    Uint,
    Double,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexInput {
    pub location: u32,
    pub components: u32,
    pub scalar: InputScalar,
}

pub struct ShaderReflection {
    module: naga::Module,
    uniform_blocks: Vec<UniformBlock>,
    resources: Vec<ResourceBinding>,
    entry_points: Vec<EntryPointInfo>,
    vertex_inputs: Vec<VertexInput>,
}

impl std::fmt::Debug for ShaderReflection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderReflection")
            .field("uniform_blocks", &self.uniform_blocks)
            .field("resources", &self.resources)
            .field("entry_points", &self.entry_points)
            .finish()
    }
}

impl ShaderReflection {
    pub fn from_wgsl(name: &str, source: &str) -> Result<Self, RenderError> {
        let module = naga::front::wgsl::parse_str(source).map_err(|err| RenderError::ShaderParse {
            name: name.to_string(),
            message: err.emit_to_string(source),
        })?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator
            .validate(&module)
            .map_err(|err| RenderError::ShaderParse {
                name: name.to_string(),
                message: format!("{:?}", err.as_inner()),
            })?;

        Ok(Self::from_module(module))
    }

    fn from_module(module: naga::Module) -> Self {
        let mut uniform_blocks = Vec::new();
        let mut resources = Vec::new();

        for (_, global) in module.global_variables.iter() {
            let (Some(binding), Some(variable)) = (&global.binding, &global.name) else {
                continue;
            };
            let ty = &module.types[global.ty];

            let kind = match (global.space, &ty.inner) {
                (AddressSpace::Uniform, inner) => {
                    let size = inner.size(module.to_ctx());
                    uniform_blocks.push(UniformBlock {
                        name: ty.name.clone().unwrap_or_else(|| variable.clone()),
                        variable: variable.clone(),
                        group: binding.group,
                        binding: binding.binding,
                        size,
                        ty: global.ty,
                    });
                    ResourceKind::UniformBuffer { size }
                }
                (AddressSpace::Handle, TypeInner::Image { dim, arrayed, class }) => {
                    let view = view_kind(*dim, *arrayed);
                    match class {
                        ImageClass::Sampled { kind, .. } => ResourceKind::Texture {
                            view,
                            sample: match kind {
                                ScalarKind::Sint => SampleKind::Sint,
                                ScalarKind::Uint => SampleKind::Uint,
                                _ => SampleKind::Float,
                            },
                        },
                        ImageClass::Depth { .. } => ResourceKind::Texture {
                            view,
                            sample: SampleKind::Depth,
                        },
                        ImageClass::Storage { format, .. } => ResourceKind::StorageTexture {
                            view,
                            format: storage_format(*format),
                        },
                        #[allow(unreachable_patterns)]
                        _ => continue,
                    }
                }
                (AddressSpace::Handle, TypeInner::Sampler { comparison }) => ResourceKind::Sampler {
                    comparison: *comparison,
                },
                _ => continue,
            };

            resources.push(ResourceBinding {
                name: variable.clone(),
                group: binding.group,
                binding: binding.binding,
                kind,
            });
        }

        let mut entry_points = Vec::new();
        let mut vertex_inputs = Vec::new();
        for entry in &module.entry_points {
            let stage = match entry.stage {
                naga::ShaderStage::Vertex => Stage::Vertex,
                naga::ShaderStage::Fragment => Stage::Fragment,
                naga::ShaderStage::Compute => Stage::Compute,
                #[allow(unreachable_patterns)]
                _ => continue,
            };

            if stage == Stage::Vertex && vertex_inputs.is_empty() {
                for argument in &entry.function.arguments {
                    collect_inputs(&module, argument.ty, argument.binding.as_ref(), &mut vertex_inputs);
                }
                vertex_inputs.sort_by_key(|input| input.location);
            }

            entry_points.push(EntryPointInfo {
                name: entry.name.clone(),
                stage,
                workgroup_size: entry.workgroup_size,
            });
        }

        Self {
            module,
            uniform_blocks,
            resources,
            entry_points,
            vertex_inputs,
        }
    }

    /// Finds a uniform block by struct type name or variable name.
    pub fn uniform_block(&self, name: &str) -> Option<&UniformBlock> {
        self.uniform_blocks
            .iter()
            .find(|block| block.name == name || block.variable == name)
    }

    pub fn uniform_blocks(&self) -> &[UniformBlock] {
        &self.uniform_blocks
    }

    /// Resolves a GL-style member path such as `all_lights[2].light_vp`
    /// inside `block`.
    pub fn field(&self, block: &UniformBlock, path: &str) -> Option<FieldInfo> {
        let mut ty = block.ty;
        let mut offset = 0u32;

        for segment in parse_path(path)? {
            match (segment, &self.module.types[ty].inner) {
                (Segment::Field(name), TypeInner::Struct { members, .. }) => {
                    let member = members
                        .iter()
                        .find(|member| member.name.as_deref() == Some(name))?;
                    offset += member.offset;
                    ty = member.ty;
                }
                (Segment::Index(index), TypeInner::Array { base, size, stride }) => {
                    if let ArraySize::Constant(len) = size {
                        if index >= len.get() {
                            return None;
                        }
                    }
                    offset += index * stride;
                    ty = *base;
                }
                _ => return None,
            }
        }

        Some(FieldInfo {
            offset,
            size: self.module.types[ty].inner.size(self.module.to_ctx()),
        })
    }

    /// Shorthand for a field of the `params` block.
    pub fn parameter(&self, path: &str) -> Option<FieldInfo> {
        let block = self.uniform_block(PARAMS_BLOCK)?;
        self.field(block, path)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceBinding> {
        self.resources.iter().find(|resource| resource.name == name)
    }

    pub fn resources(&self) -> &[ResourceBinding] {
        &self.resources
    }

    /// Writable image slot `n` is the storage texture at group 0, binding `n`.
    pub fn storage_slot(&self, slot: u32) -> Option<&ResourceBinding> {
        self.resources.iter().find(|resource| {
            resource.group == 0
                && resource.binding == slot
                && matches!(resource.kind, ResourceKind::StorageTexture { .. })
        })
    }

    pub fn entry_point(&self, stage: Stage) -> Option<&EntryPointInfo> {
        self.entry_points.iter().find(|entry| entry.stage == stage)
    }

    pub fn vertex_inputs(&self) -> &[VertexInput] {
        &self.vertex_inputs
    }

    /// Number of bind groups the pipeline layout needs.
    pub fn group_count(&self) -> u32 {
        self.resources
            .iter()
            .map(|resource| resource.group + 1)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Segment<'a> {
    Field(&'a str),
    Index(u32),
}

fn parse_path(path: &str) -> Option<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    if path.is_empty() {
        return Some(segments);
    }

    for part in path.split('.') {
        let (name, mut rest) = match part.find('[') {
            Some(bracket) => part.split_at(bracket),
            None => (part, ""),
        };
        if name.is_empty() {
            return None;
        }
        segments.push(Segment::Field(name));

        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped.find(']')?;
            segments.push(Segment::Index(stripped[..close].trim().parse().ok()?));
            rest = &stripped[close + 1..];
        }
        if !rest.is_empty() {
            return None;
        }
    }
    Some(segments)
}

fn view_kind(dim: ImageDimension, arrayed: bool) -> TextureViewKind {
    match (dim, arrayed) {
        (ImageDimension::D1, _) => TextureViewKind::D1,
        (ImageDimension::D2, false) => TextureViewKind::D2,
        (ImageDimension::D2, true) => TextureViewKind::D2Array,
        (ImageDimension::D3, _) => TextureViewKind::D3,
        (ImageDimension::Cube, false) => TextureViewKind::Cube,
        (ImageDimension::Cube, true) => TextureViewKind::CubeArray,
    }
}

fn storage_format(format: naga::StorageFormat) -> Option<PixelFormat> {
    match format {
        naga::StorageFormat::Rgba16Float => Some(PixelFormat::Rgba16Float),
        naga::StorageFormat::Rgba8Unorm => Some(PixelFormat::Rgba8),
        naga::StorageFormat::R32Float => Some(PixelFormat::R32Float),
        _ => None,
    }
}

fn collect_inputs(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&Binding>,
    inputs: &mut Vec<VertexInput>,
) {
    match (binding, &module.types[ty].inner) {
        (Some(Binding::Location { location, .. }), inner) => {
            let (components, scalar) = match inner {
                TypeInner::Scalar(scalar) => (1, *scalar),
                TypeInner::Vector { size, scalar } => (*size as u32, *scalar),
                _ => return,
            };
            let scalar = match (scalar.kind, scalar.width) {
                (ScalarKind::Float, 8) => InputScalar::Double,
                (ScalarKind::Sint, _) => InputScalar::Sint,
                (ScalarKind::Uint, _) => InputScalar::Uint,
                _ => InputScalar::Float,
            };
            inputs.push(VertexInput {
                location: *location,
                components,
                scalar,
            });
        }
        (None, TypeInner::Struct { members, .. }) => {
            for member in members {
                collect_inputs(module, member.ty, member.binding.as_ref(), inputs);
            }
        }
        _ => {}
    }
}
