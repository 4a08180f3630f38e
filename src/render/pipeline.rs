use crate::{core::ProgramHandle, render::Topology};

/// Key used to identify a render pipeline built for a program and a
/// primitive topology.
///
/// [0..32]          [32..56]                   [56..59]
/// Program index    Program generation (low)   Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(u64);

impl PipelineId {
    /// Creates a new pipeline key with invalid configuration.
    pub fn new() -> Self {
        Self(u64::MAX)
    }

    /// Returns whether the pipeline key is invalid.
    pub fn is_invalid(&self) -> bool {
        self.0 == u64::MAX
    }

    pub fn builder() -> PipelineIdBuilder {
        PipelineIdBuilder::default()
    }

    /// Returns the slot index of the program.
    pub fn program_index(&self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    /// Returns the primitive topology, `None` for an invalid key.
    pub fn topology(&self) -> Option<Topology> {
        if self.is_invalid() {
            return None;
        }
        match (self.0 >> 56) & 0b111 {
            0 => Some(Topology::Points),
            1 => Some(Topology::Lines),
            2 => Some(Topology::LineStrip),
            3 => Some(Topology::Triangles),
            4 => Some(Topology::TriangleStrip),
            _ => None,
        }
    }
}

impl Default for PipelineId {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PipelineIdBuilder {
    program: Option<ProgramHandle>,
    topology: Topology,
}

impl Default for PipelineIdBuilder {
    fn default() -> Self {
        Self {
            program: None,
            topology: Topology::Triangles,
        }
    }
}

impl PipelineIdBuilder {
    pub fn build(self) -> PipelineId {
        let Some(program) = self.program else {
            return PipelineId::new();
        };
        let topology = match self.topology {
            Topology::Points => 0u64,
            Topology::Lines => 1,
            Topology::LineStrip => 2,
            Topology::Triangles => 3,
            Topology::TriangleStrip => 4,
        };
        PipelineId(
            topology << 56
                | (program.generation() as u64 & 0xFF_FFFF) << 32
                | program.index() as u64,
        )
    }

    pub fn with_program(mut self, program: ProgramHandle) -> Self {
        self.program = Some(program);
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }
}
