//! GPU render-resource and frame-synchronization engine.
//!
//! This crate provides:
//! - Vulkan instance, device and queue bootstrap behind a [`Wsi`] boundary
//! - Double-buffered frame orchestration ([`FrameRenderer`])
//! - Lease-based buffer and image pools, per-frame scratch buffers
//! - Sampler, descriptor set, shader module and pipeline caches
//! - Deferred destruction of resources the GPU may still be reading

pub mod buffering;
pub mod buffers;
pub mod capabilities;
pub mod command;
pub mod config;
pub mod context;
pub mod cycle;
pub mod deferred;
pub mod descriptors;
pub mod draw;
pub mod error;
pub mod frame;
pub mod images;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod pool;
pub mod resource;
pub mod samplers;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod wsi;

pub use buffering::{FrameIndex, PerFrame, BUFFERING};
pub use buffers::BufferCache;
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use config::RendererConfig;
pub use context::{GpuContext, GpuContextBuilder};
pub use cycle::{FrameCycle, FramePlan, RenderState};
pub use deferred::DeferredDestructionQueue;
pub use descriptors::{DescriptorCache, DescriptorConfig, StandardLayouts};
pub use draw::{DrawRequest, DrawState, InstanceData, TextureBinding, ViewProjection};
pub use error::{GpuError, Result};
pub use frame::{Frame, FrameRenderer};
pub use images::{ImageCache, ImageRequest};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{PipelineCache, PipelineKey, Vertex};
pub use pool::{Lease, ResourcePool, ScratchArena};
pub use resource::Owned;
pub use samplers::{BorderColour, FilterMode, SamplerCache, SamplerDesc, WrapMode};
pub use shader::{DataStore, FileStore, ShaderCache, ShaderCompiler};
pub use swapchain::Swapchain;
pub use sync::FrameSync;
pub use wsi::{DeviceCandidate, Wsi};
