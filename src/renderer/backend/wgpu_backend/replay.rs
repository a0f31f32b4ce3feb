//! Splits a recorded command list into the passes a wgpu encoder needs.
//!
//! wgpu has no free-standing render state, so every draw carries a snapshot
//! of what was bound when it was recorded. Bindings are shared between
//! draws until something changes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::renderer::backend::{
    ClearValues, Command, CommandList, CullMode, DepthCompare, IndexFormat, RenderTarget,
    Topology, Viewport,
};
use crate::renderer::handles::{BufferHandle, ProgramHandle, TextureHandle, VertexArrayHandle};

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Bindings {
    /// Uniform buffers by block or variable name.
    pub(crate) uniforms: BTreeMap<String, BufferHandle>,
    pub(crate) textures: BTreeMap<String, Option<TextureHandle>>,
    pub(crate) storage: BTreeMap<u32, TextureHandle>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DrawCall {
    Indexed {
        vertex_array: VertexArrayHandle,
        index_buffer: BufferHandle,
        topology: Topology,
        index_format: IndexFormat,
        index_count: u32,
    },
    Array {
        vertex_array: VertexArrayHandle,
        topology: Topology,
        vertex_count: u32,
    },
}

impl DrawCall {
    pub(crate) fn topology(&self) -> Topology {
        match *self {
            Self::Indexed { topology, .. } | Self::Array { topology, .. } => topology,
        }
    }

    pub(crate) fn vertex_array(&self) -> VertexArrayHandle {
        match *self {
            Self::Indexed { vertex_array, .. } | Self::Array { vertex_array, .. } => vertex_array,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct DrawPlan {
    pub(crate) program: ProgramHandle,
    pub(crate) cull: CullMode,
    pub(crate) depth_compare: DepthCompare,
    pub(crate) viewport: Option<Viewport>,
    pub(crate) bindings: Arc<Bindings>,
    /// Index into [`Plan::parameters`].
    pub(crate) parameters: Option<usize>,
    pub(crate) call: DrawCall,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct RenderPassPlan {
    pub(crate) target: Option<RenderTarget>,
    pub(crate) clear: Option<ClearValues>,
    pub(crate) draws: Vec<DrawPlan>,
}

#[derive(Clone, Debug)]
pub(crate) struct DispatchPlan {
    pub(crate) program: Option<ProgramHandle>,
    pub(crate) bindings: Arc<Bindings>,
    pub(crate) parameters: Option<usize>,
    pub(crate) groups: [u32; 3],
}

#[derive(Clone, Debug)]
pub(crate) enum Pass {
    Copy {
        buffer: BufferHandle,
        offset: u64,
        data: Vec<u8>,
    },
    Compute(Vec<DispatchPlan>),
    Render(RenderPassPlan),
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Plan {
    pub(crate) passes: Vec<Pass>,
    pub(crate) parameters: Vec<Vec<u8>>,
}

impl Plan {
    pub(crate) fn render_passes(&self) -> impl Iterator<Item = &RenderPassPlan> {
        self.passes.iter().filter_map(|pass| match pass {
            Pass::Render(plan) => Some(plan),
            _ => None,
        })
    }

    pub(crate) fn touches_screen(&self) -> bool {
        self.render_passes()
            .any(|pass| pass.target.unwrap_or(RenderTarget::Screen) == RenderTarget::Screen)
    }
}

enum Open {
    None,
    Render(RenderPassPlan),
    Compute(Vec<DispatchPlan>),
}

struct Planner {
    plan: Plan,
    open: Open,
    target: RenderTarget,
    program: Option<ProgramHandle>,
    cull: CullMode,
    depth_compare: DepthCompare,
    viewport: Option<Viewport>,
    bindings: Arc<Bindings>,
    parameters: Option<usize>,
}

impl Planner {
    fn new() -> Self {
        Self {
            plan: Plan::default(),
            open: Open::None,
            target: RenderTarget::Screen,
            program: None,
            cull: CullMode::default(),
            depth_compare: DepthCompare::default(),
            viewport: None,
            bindings: Arc::new(Bindings::default()),
            parameters: None,
        }
    }

    fn close(&mut self) {
        match std::mem::replace(&mut self.open, Open::None) {
            Open::None => {}
            Open::Render(pass) => {
                if pass.clear.is_some() || !pass.draws.is_empty() {
                    self.plan.passes.push(Pass::Render(pass));
                }
            }
            Open::Compute(dispatches) => {
                if !dispatches.is_empty() {
                    self.plan.passes.push(Pass::Compute(dispatches));
                }
            }
        }
    }

    fn render_pass(&mut self) -> &mut RenderPassPlan {
        if !matches!(self.open, Open::Render(_)) {
            self.close();
            self.open = Open::Render(RenderPassPlan {
                target: Some(self.target),
                ..Default::default()
            });
        }
        match &mut self.open {
            Open::Render(pass) => pass,
            _ => unreachable!("render pass was just opened"),
        }
    }

    fn compute_pass(&mut self) -> &mut Vec<DispatchPlan> {
        if !matches!(self.open, Open::Compute(_)) {
            self.close();
            self.open = Open::Compute(Vec::new());
        }
        match &mut self.open {
            Open::Compute(dispatches) => dispatches,
            _ => unreachable!("compute pass was just opened"),
        }
    }

    fn clear(&mut self, values: ClearValues) {
        let needs_new = matches!(&self.open, Open::Render(pass) if !pass.draws.is_empty());
        if needs_new {
            self.close();
        }
        let pass = self.render_pass();
        pass.clear = Some(match pass.clear {
            Some(previous) => ClearValues {
                flags: previous.flags | values.flags,
                ..values
            },
            None => values,
        });
    }

    fn draw(&mut self, call: DrawCall) {
        let Some(program) = self.program else {
            log::warn!("Draw recorded without a bound program, skipping");
            return;
        };
        let draw = DrawPlan {
            program,
            cull: self.cull,
            depth_compare: self.depth_compare,
            viewport: self.viewport,
            bindings: Arc::clone(&self.bindings),
            parameters: self.parameters,
            call,
        };
        self.render_pass().draws.push(draw);
    }

    fn feed(&mut self, command: Command) {
        match command {
            Command::SetRenderTarget(target) => {
                if target != self.target {
                    self.close();
                    self.target = target;
                }
            }
            Command::SetViewport(viewport) => self.viewport = Some(viewport),
            Command::SetCullMode(cull) => self.cull = cull,
            Command::SetDepthCompare(compare) => self.depth_compare = compare,
            Command::Clear(values) => self.clear(values),
            Command::BindProgram(program) => {
                self.program = Some(program);
                self.parameters = None;
            }
            Command::BindUniformBuffer { block, buffer } => {
                Arc::make_mut(&mut self.bindings)
                    .uniforms
                    .insert(block, buffer);
            }
            Command::SetParameters(data) => {
                self.plan.parameters.push(data);
                self.parameters = Some(self.plan.parameters.len() - 1);
            }
            Command::BindTexture { name, texture } => {
                Arc::make_mut(&mut self.bindings)
                    .textures
                    .insert(name, texture);
            }
            Command::BindStorageTexture { slot, texture } => {
                Arc::make_mut(&mut self.bindings)
                    .storage
                    .insert(slot, texture);
            }
            Command::WriteBuffer {
                buffer,
                offset,
                data,
            } => {
                self.close();
                self.plan.passes.push(Pass::Copy {
                    buffer,
                    offset,
                    data,
                });
            }
            Command::DrawIndexed {
                vertex_array,
                index_buffer,
                topology,
                index_format,
                index_count,
            } => self.draw(DrawCall::Indexed {
                vertex_array,
                index_buffer,
                topology,
                index_format,
                index_count,
            }),
            Command::Draw {
                vertex_array,
                topology,
                vertex_count,
            } => self.draw(DrawCall::Array {
                vertex_array,
                topology,
                vertex_count,
            }),
            Command::Dispatch { x, y, z } => {
                let dispatch = DispatchPlan {
                    program: self.program,
                    bindings: Arc::clone(&self.bindings),
                    parameters: self.parameters,
                    groups: [x, y, z],
                };
                self.compute_pass().push(dispatch);
            }
            Command::MemoryBarrier => {
                if matches!(self.open, Open::Compute(_)) {
                    self.close();
                }
            }
        }
    }
}

pub(crate) fn plan_passes(commands: CommandList) -> Plan {
    let mut planner = Planner::new();
    for command in commands {
        planner.feed(command);
    }
    planner.close();
    planner.plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::ClearFlags;
    use crate::renderer::handles::RenderTargetHandle;

    fn clear(flags: ClearFlags) -> Command {
        Command::Clear(ClearValues {
            flags,
            color: [0.0, 0.0, 0.0, 1.0],
            depth: 1.0,
        })
    }

    fn draw() -> Command {
        Command::DrawIndexed {
            vertex_array: VertexArrayHandle::from_raw(10),
            index_buffer: BufferHandle::from_raw(11),
            topology: Topology::TriangleList,
            index_format: IndexFormat::U16,
            index_count: 3,
        }
    }

    #[test]
    fn shadow_then_screen_passes_keep_recording_order() {
        let shadow = RenderTarget::Offscreen(RenderTargetHandle::from_raw(5));
        let mut list = CommandList::new();
        list.push(Command::SetRenderTarget(shadow));
        list.push(clear(ClearFlags::DEPTH));
        list.push(Command::BindProgram(ProgramHandle::from_raw(1)));
        list.push(Command::SetParameters(vec![1; 16]));
        list.push(draw());
        list.push(Command::SetRenderTarget(RenderTarget::Screen));
        list.push(Command::BindProgram(ProgramHandle::from_raw(2)));
        list.push(draw());

        let plan = plan_passes(list);
        let passes: Vec<_> = plan.render_passes().collect();
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0].target, Some(shadow));
        assert!(passes[0].clear.is_some());
        assert_eq!(passes[0].draws[0].parameters, Some(0));
        assert_eq!(passes[1].target, Some(RenderTarget::Screen));
        assert_eq!(passes[1].draws[0].program, ProgramHandle::from_raw(2));
        assert_eq!(passes[1].draws[0].parameters, None);
    }

    #[test]
    fn clears_merge_until_the_first_draw() {
        let mut list = CommandList::new();
        list.push(clear(ClearFlags::COLOR));
        list.push(clear(ClearFlags::DEPTH));
        list.push(Command::BindProgram(ProgramHandle::from_raw(1)));
        list.push(draw());
        list.push(clear(ClearFlags::DEPTH));
        list.push(draw());

        let plan = plan_passes(list);
        let passes: Vec<_> = plan.render_passes().collect();
        assert_eq!(passes.len(), 2);
        assert_eq!(
            passes[0].clear.map(|c| c.flags),
            Some(ClearFlags::COLOR | ClearFlags::DEPTH)
        );
        assert_eq!(passes[1].clear.map(|c| c.flags), Some(ClearFlags::DEPTH));
    }

    #[test]
    fn barriers_split_compute_and_writes_split_render() {
        let mut list = CommandList::new();
        list.push(Command::BindProgram(ProgramHandle::from_raw(3)));
        list.push(Command::Dispatch { x: 64, y: 64, z: 1 });
        list.push(Command::MemoryBarrier);
        list.push(Command::Dispatch { x: 1, y: 1, z: 1 });
        list.push(Command::WriteBuffer {
            buffer: BufferHandle::from_raw(4),
            offset: 0,
            data: vec![0; 4],
        });
        list.push(draw());

        let plan = plan_passes(list);
        assert!(matches!(plan.passes[0], Pass::Compute(ref d) if d.len() == 1));
        assert!(matches!(plan.passes[1], Pass::Compute(_)));
        assert!(matches!(plan.passes[2], Pass::Copy { .. }));
        assert!(matches!(plan.passes[3], Pass::Render(_)));
    }

    #[test]
    fn binding_snapshots_are_shared_until_changed() {
        let mut list = CommandList::new();
        list.push(Command::BindProgram(ProgramHandle::from_raw(1)));
        list.push(Command::BindTexture {
            name: "diffuse_map".into(),
            texture: Some(TextureHandle::from_raw(9)),
        });
        list.push(draw());
        list.push(draw());
        list.push(Command::BindTexture {
            name: "diffuse_map".into(),
            texture: None,
        });
        list.push(draw());

        let plan = plan_passes(list);
        let draws = &plan.render_passes().next().unwrap().draws;
        assert!(Arc::ptr_eq(&draws[0].bindings, &draws[1].bindings));
        assert!(!Arc::ptr_eq(&draws[1].bindings, &draws[2].bindings));
        assert_eq!(draws[2].bindings.textures.get("diffuse_map"), Some(&None));
    }

    #[test]
    fn empty_passes_are_dropped() {
        let mut list = CommandList::new();
        list.push(Command::SetRenderTarget(RenderTarget::Offscreen(
            RenderTargetHandle::from_raw(1),
        )));
        list.push(Command::SetRenderTarget(RenderTarget::Screen));
        assert!(plan_passes(list).passes.is_empty());
    }
}
