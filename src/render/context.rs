use crate::{
    core::ArrVec,
    error::{Error, Result},
};
use std::sync::Arc;
use wgpu::DeviceType;

/// Aggregates all the objects needed to use the GPU.
///
/// No window or surface is involved; everything renders offscreen.
#[derive(Clone)]
pub struct GpuContext {
    /// Instance of the graphics API.
    pub instance: Arc<wgpu::Instance>,
    /// Physical device used to render.
    pub adapter: Arc<wgpu::Adapter>,
    /// Logical device used to render.
    pub device: Arc<wgpu::Device>,
    /// Command queue used to send commands to the GPU.
    pub queue: Arc<wgpu::Queue>,
    /// Features enabled on the device.
    pub features: wgpu::Features,
    /// Limits of the device.
    pub limits: wgpu::Limits,
}

/// Potential adapter to use.
struct PotentialAdapter {
    adapter: wgpu::Adapter,
    info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
    features: wgpu::Features,
}

impl GpuContext {
    /// Creates a new headless GPU context.
    ///
    /// Discrete GPUs are preferred over integrated, virtual and software
    /// adapters. Fails with [`Error::NoAdapter`] when no adapter supports
    /// `desired_features`.
    pub fn new(desired_features: Option<wgpu::Features>) -> Result<Self> {
        profiling::scope!("GpuContext::new");
        let backends = wgpu::Backends::PRIMARY | wgpu::Backends::GL;

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            flags: wgpu::InstanceFlags::from_build_config(),
            ..Default::default()
        });

        let desired_features = desired_features.unwrap_or_else(wgpu::Features::empty);
        log::debug!("Desired features: {:#?}", desired_features);

        let mut adapters = ArrVec::<PotentialAdapter, 16>::new();
        for adapter in instance.enumerate_adapters(backends) {
            let limits = adapter.limits();
            let features = adapter.features();
            let info = adapter.get_info();
            log::info!("{:?} Adapter: {:#?}", backends, info);
            if !features.contains(desired_features) {
                for feat in desired_features.iter() {
                    if !features.contains(feat) {
                        log::warn!("Adapter {:?} lacks feature '{:?}'", info.name, feat);
                    }
                }
                continue;
            }
            if adapters.is_full() {
                break;
            }
            adapters.push(PotentialAdapter {
                adapter,
                info,
                limits,
                features,
            });
        }
        adapters.sort_by_key(|adapter| match adapter.info.device_type {
            DeviceType::DiscreteGpu => 0,
            DeviceType::IntegratedGpu => 1,
            DeviceType::VirtualGpu => 2,
            DeviceType::Cpu => 3,
            DeviceType::Other => 4,
        });

        if adapters.is_empty() {
            return Err(Error::NoAdapter);
        }

        let adapter = adapters.remove(0);
        log::info!(
            "Using adapter {:?} ({:?}), max texture size {}",
            adapter.info.name,
            adapter.info.backend,
            adapter.limits.max_texture_dimension_2d
        );
        log::trace!("Adapter features: {:?}", adapter.features);

        let limits = adapter.limits;

        // Create the GPU device and queue.
        let (device, queue) = pollster::block_on(adapter.adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Offscreen GPU Logical Device"),
                required_features: desired_features,
                required_limits: limits.clone(),
                memory_hints: Default::default(),
            },
            None,
        ))?;

        Ok(GpuContext {
            instance: Arc::new(instance),
            adapter: Arc::new(adapter.adapter),
            device: Arc::new(device),
            queue: Arc::new(queue),
            features: desired_features,
            limits,
        })
    }
}
