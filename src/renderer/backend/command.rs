use super::{ClearFlags, CullMode, DepthCompare, IndexFormat, Topology, Viewport};
use crate::renderer::handles::{
    BufferHandle, ProgramHandle, RenderTargetHandle, TextureHandle, VertexArrayHandle,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    Screen,
    Offscreen(RenderTargetHandle),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearValues {
    pub flags: ClearFlags,
    pub color: [f32; 4],
    pub depth: f32,
}

/// One recorded unit of work. State commands persist until overwritten.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    SetRenderTarget(RenderTarget),
    SetViewport(Viewport),
    SetCullMode(CullMode),
    SetDepthCompare(DepthCompare),
    Clear(ClearValues),
    BindProgram(ProgramHandle),
    /// Binds `buffer` to the uniform block named `block`.
    BindUniformBuffer {
        block: String,
        buffer: BufferHandle,
    },
    /// Snapshot of the bound program's parameter block for following draws.
    SetParameters(Vec<u8>),
    BindTexture {
        name: String,
        texture: Option<TextureHandle>,
    },
    BindStorageTexture {
        slot: u32,
        texture: TextureHandle,
    },
    WriteBuffer {
        buffer: BufferHandle,
        offset: u64,
        data: Vec<u8>,
    },
    DrawIndexed {
        vertex_array: VertexArrayHandle,
        index_buffer: BufferHandle,
        topology: Topology,
        index_format: IndexFormat,
        index_count: u32,
    },
    Draw {
        vertex_array: VertexArrayHandle,
        topology: Topology,
        vertex_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    /// Storage writes made before this point are visible to later reads.
    MemoryBarrier,
}

impl Command {
    pub fn is_draw(&self) -> bool {
        matches!(self, Self::DrawIndexed { .. } | Self::Draw { .. })
    }
}

#[derive(Clone, Debug, Default)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    pub fn take(&mut self) -> CommandList {
        std::mem::take(self)
    }

    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_draw()).count()
    }

    pub fn dispatch_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Dispatch { .. }))
            .count()
    }

    /// Draws and clears grouped by the render target active when they were
    /// recorded.
    pub fn target_summary(&self) -> Vec<TargetActivity> {
        let mut summary: Vec<TargetActivity> = Vec::new();
        let mut target = RenderTarget::Screen;

        for command in &self.commands {
            match command {
                Command::SetRenderTarget(next) => {
                    target = *next;
                    continue;
                }
                Command::Clear(_) | Command::DrawIndexed { .. } | Command::Draw { .. } => {}
                _ => continue,
            }

            let index = match summary.iter().position(|entry| entry.target == target) {
                Some(index) => index,
                None => {
                    summary.push(TargetActivity {
                        target,
                        clears: 0,
                        draws: 0,
                    });
                    summary.len() - 1
                }
            };
            if let Command::Clear(_) = command {
                summary[index].clears += 1;
            } else {
                summary[index].draws += 1;
            }
        }
        summary
    }
}

impl IntoIterator for CommandList {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetActivity {
    pub target: RenderTarget,
    pub clears: usize,
    pub draws: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_groups_by_active_target() {
        let offscreen = RenderTarget::Offscreen(RenderTargetHandle::from_raw(7));
        let clear = Command::Clear(ClearValues {
            flags: ClearFlags::DEPTH,
            color: [0.0; 4],
            depth: 1.0,
        });
        let draw = Command::Draw {
            vertex_array: VertexArrayHandle::from_raw(1),
            topology: Topology::TriangleList,
            vertex_count: 3,
        };

        let mut list = CommandList::new();
        list.push(Command::SetRenderTarget(offscreen));
        list.push(clear.clone());
        list.push(draw.clone());
        list.push(draw.clone());
        list.push(Command::SetRenderTarget(RenderTarget::Screen));
        list.push(clear);
        list.push(draw);

        let summary = list.target_summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(
            summary[0],
            TargetActivity {
                target: offscreen,
                clears: 1,
                draws: 2
            }
        );
        assert_eq!(summary[1].draws, 1);
        assert_eq!(list.draw_count(), 3);
    }
}
