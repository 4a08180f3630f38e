use crate::core::{FilterMode, WrapMode};
use std::ops::Deref;

/// A key used to identify a `Sampler`.
///
/// Meaning of the bits from the least significant bit:
/// - [0-1]: The address mode for both u and v; 0 = ClampToEdge, 1 = Repeat, 2 = MirrorRepeat.
/// - [2]: The mag and min filter; 0 = Nearest, 1 = Linear.
///
/// Mipmapping is not part of the key: render target textures have a single
/// level.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct SamplerId(u32);

impl SamplerId {
    /// Creates the key of a sampler with the given filtering and wrapping.
    pub fn new(filter: FilterMode, wrap: WrapMode) -> Self {
        let wrap = match wrap {
            WrapMode::ClampToEdge => 0,
            WrapMode::Repeat => 1,
            WrapMode::MirrorRepeat => 2,
        };
        let filter = match filter {
            FilterMode::Nearest => 0,
            FilterMode::Linear => 1,
        };
        Self(wrap | filter << 2)
    }

    pub fn wrap(&self) -> WrapMode {
        match self.0 & 0b11 {
            0 => WrapMode::ClampToEdge,
            1 => WrapMode::Repeat,
            2 => WrapMode::MirrorRepeat,
            _ => unreachable!(),
        }
    }

    pub fn filter(&self) -> FilterMode {
        match (self.0 >> 2) & 0b1 {
            0 => FilterMode::Nearest,
            1 => FilterMode::Linear,
            _ => unreachable!(),
        }
    }

    /// Descriptor of the sampler this key stands for.
    pub fn descriptor(&self) -> wgpu::SamplerDescriptor<'static> {
        let address_mode = self.wrap().into();
        let filter = self.filter().into();
        wgpu::SamplerDescriptor {
            label: Some("render_target_sampler"),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        }
    }
}

/// Thin wrapper around a `wgpu::Sampler` that includes a `SamplerId`.
#[derive(Debug)]
pub struct Sampler {
    /// The sampler id.
    pub id: SamplerId,
    /// The sampler.
    pub sampler: wgpu::Sampler,
}

impl Deref for Sampler {
    type Target = wgpu::Sampler;

    fn deref(&self) -> &Self::Target {
        &self.sampler
    }
}

impl PartialEq for Sampler {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Sampler {
    /// Creates a new sampler.
    pub fn new(device: &wgpu::Device, id: SamplerId) -> Self {
        let sampler = device.create_sampler(&id.descriptor());
        Self { sampler, id }
    }
}
