// Adapter and device acquisition.

use std::sync::Arc;

use super::error::{RenderError, RenderResult};

/// Features every Ptex method relies on: texture binding arrays indexed per
/// fragment, and border-colour addressing.
pub fn required_features() -> wgpu::Features {
    wgpu::Features::TEXTURE_BINDING_ARRAY
        | wgpu::Features::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING
        | wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER
}

/// Enabled when present; GPU pass timing is skipped otherwise.
pub fn timestamp_features() -> wgpu::Features {
    wgpu::Features::TIMESTAMP_QUERY | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS
}

pub struct Gpu {
    pub adapter:    wgpu::Adapter,
    pub device:     Arc<wgpu::Device>,
    pub queue:      Arc<wgpu::Queue>,
    pub timestamps: bool,
}

pub async fn request_gpu(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'_>>,
) -> RenderResult<Gpu> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        })
        .await
        .ok_or_else(|| RenderError::device("no suitable GPU adapter"))?;

    let info = adapter.get_info();
    log::info!("Adapter: {} ({:?}, {:?})", info.name, info.device_type, info.backend);

    let available = adapter.features();
    let missing = required_features().difference(available);
    if !missing.is_empty() {
        return Err(RenderError::device(format!("adapter lacks required features: {missing:?}")));
    }
    let timestamps = available.contains(timestamp_features());
    if !timestamps {
        log::warn!("Timestamp queries unavailable; GPU pass times will not be recorded");
    }

    let mut features = required_features();
    if timestamps {
        features |= timestamp_features();
    }

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Ptex Device"),
                required_features: features,
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        )
        .await
        .map_err(RenderError::device)?;

    Ok(Gpu {
        adapter,
        device: Arc::new(device),
        queue: Arc::new(queue),
        timestamps,
    })
}

/// Device without a surface for tests. `None` when there is no adapter or
/// it lacks `features`.
#[cfg(test)]
pub fn headless_device(features: wgpu::Features) -> Option<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))?;
    if !adapter.features().contains(features) {
        return None;
    }
    pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("Test Device"),
            required_features: features,
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
        },
        None,
    ))
    .ok()
}
