//! wgpu implementation of [`GraphicsDevice`].
//!
//! Runs headless: the frame is an off-screen texture read back with
//! [`WgpuDevice::read_frame`]. Picking renders primitive ids into an
//! `R32Uint` attachment and reads the requested region back.

use std::collections::HashMap;

use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;

use super::{
    FrameSetup, GraphicsDevice, LightInfo, PickHit, PickRegion, QuadDraw, RenderTargetHandle,
    StereoMode, TextureHandle,
};
use crate::color::Color;
use crate::id::PrimitiveId;
use crate::state::{FilterMode, SamplerParams, WrapMode};

const COLOUR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const PICK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;
const MAX_LIGHTS: usize = 8;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct LightUniform {
    position: [f32; 4],
    diffuse: [f32; 4],
    ambient: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Uniforms {
    view_proj: [[f32; 4]; 4],
    eye: [f32; 4],
    fog_colour: [f32; 4],
    fog_params: [f32; 4],
    counts: [u32; 4],
    lights: [LightUniform; MAX_LIGHTS],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct QuadVertex {
    position: [f32; 3],
    uv: [f32; 2],
    colour: [f32; 4],
    normal: [f32; 3],
}

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x2,
    2 => Float32x4,
    3 => Float32x3,
];

fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &VERTEX_ATTRIBUTES,
    }
}

struct Pipelines {
    solid: wgpu::RenderPipeline,
    solid_overlay: wgpu::RenderPipeline,
    line: wgpu::RenderPipeline,
    line_overlay: wgpu::RenderPipeline,
    pick: wgpu::RenderPipeline,
    pick_overlay: wgpu::RenderPipeline,
}

impl Pipelines {
    fn build(
        device: &wgpu::Device,
        uniform_layout: &wgpu::BindGroupLayout,
        texture_layout: &wgpu::BindGroupLayout,
        backface_cull: bool,
        clockwise_faces: bool,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("quad shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("./shader.wgsl").into()),
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("quad pipeline layout"),
            bind_group_layouts: &[uniform_layout, texture_layout],
            push_constant_ranges: &[],
        });

        let front_face = if clockwise_faces {
            wgpu::FrontFace::Cw
        } else {
            wgpu::FrontFace::Ccw
        };
        let cull_mode = backface_cull.then_some(wgpu::Face::Back);

        let build_one = |topology: wgpu::PrimitiveTopology,
                         depth_test: bool,
                         fragment_entry: &str,
                         format: wgpu::TextureFormat,
                         blend: Option<wgpu::BlendState>,
                         bias: i32| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("quad pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[vertex_layout()],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(fragment_entry),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology,
                    front_face,
                    cull_mode,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: depth_test,
                    depth_compare: if depth_test {
                        wgpu::CompareFunction::LessEqual
                    } else {
                        wgpu::CompareFunction::Always
                    },
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState {
                        constant: bias,
                        slope_scale: 0.0,
                        clamp: 0.0,
                    },
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let triangles = wgpu::PrimitiveTopology::TriangleList;
        let lines = wgpu::PrimitiveTopology::LineList;
        let alpha = Some(wgpu::BlendState::ALPHA_BLENDING);

        Self {
            solid: build_one(triangles, true, "fs_main", COLOUR_FORMAT, alpha, 0),
            solid_overlay: build_one(triangles, false, "fs_main", COLOUR_FORMAT, alpha, 0),
            line: build_one(lines, true, "fs_main", COLOUR_FORMAT, alpha, -2),
            line_overlay: build_one(lines, false, "fs_main", COLOUR_FORMAT, alpha, -2),
            pick: build_one(triangles, true, "fs_pick", PICK_FORMAT, None, 0),
            pick_overlay: build_one(triangles, false, "fs_pick", PICK_FORMAT, None, 0),
        }
    }
}

struct TextureEntry {
    texture: wgpu::Texture,
    /// Full mip chain, for sampling.
    view: wgpu::TextureView,
    /// Base level only; render-pass attachments must cover exactly one mip.
    attachment_view: wgpu::TextureView,
    width: u32,
    height: u32,
    mip_count: u32,
    sampler: SamplerParams,
}

struct TargetEntry {
    colour: TextureHandle,
    _depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
}

struct FrameTextures {
    colour: wgpu::Texture,
    colour_view: wgpu::TextureView,
    _depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct SavedState {
    uniforms: Uniforms,
    viewport: (u32, u32),
}

struct PickPass {
    region: PickRegion,
    id_texture: wgpu::Texture,
    id_view: wgpu::TextureView,
    depth_texture: wgpu::Texture,
    depth_view: wgpu::TextureView,
    width: u32,
    height: u32,
}

/// GPU-backed device. Every texture, render target and frame lives on the
/// wgpu device created at construction; no window or surface is involved.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,

    pipelines: Pipelines,
    blit_pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,

    uniforms: Uniforms,
    viewport: (u32, u32),
    backface_cull: bool,
    clockwise_faces: bool,

    frame: FrameTextures,
    textures: HashMap<u64, TextureEntry>,
    targets: HashMap<u64, TargetEntry>,
    samplers: HashMap<SamplerParams, wgpu::Sampler>,
    white_texture: wgpu::TextureView,
    next_texture_id: u64,
    next_target_id: u64,

    bound: Vec<u64>,
    saved: Vec<SavedState>,
    pick: Option<PickPass>,
}

fn zeroed_uniforms() -> Uniforms {
    Uniforms {
        view_proj: Mat4::IDENTITY.to_cols_array_2d(),
        eye: [0.0; 4],
        fog_colour: [0.0; 4],
        fog_params: [0.0; 4],
        counts: [0; 4],
        lights: [LightUniform {
            position: [0.0; 4],
            diffuse: [0.0; 4],
            ambient: [0.0; 4],
        }; MAX_LIGHTS],
    }
}

fn mip_count_for(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

fn copy_padded_readback_rows(
    data: &[u8],
    height: u32,
    unpadded_bytes_per_row: u32,
    padded_bytes_per_row: u32,
    output: &mut Vec<u8>,
) {
    let output_size = (unpadded_bytes_per_row * height) as usize;
    output.resize(output_size, 0);

    if padded_bytes_per_row == unpadded_bytes_per_row {
        output.copy_from_slice(&data[..output_size]);
        return;
    }

    for row in 0..height {
        let padded_offset = (row * padded_bytes_per_row) as usize;
        let unpadded_offset = (row * unpadded_bytes_per_row) as usize;
        let row_data = &data[padded_offset..padded_offset + unpadded_bytes_per_row as usize];
        output[unpadded_offset..unpadded_offset + unpadded_bytes_per_row as usize]
            .copy_from_slice(row_data);
    }
}

impl WgpuDevice {
    /// Builds a headless device on the best available adapter. Returns
    /// `None` when no adapter can be acquired, e.g. on machines without a
    /// GPU or software rasteriser.
    pub async fn try_new_headless(width: u32, height: u32) -> Option<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok()?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                trace: Default::default(),
            })
            .await
            .ok()?;

        Some(Self::from_device(device, queue, width, height))
    }

    fn from_device(device: wgpu::Device, queue: wgpu::Queue, width: u32, height: u32) -> Self {
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipelines = Pipelines::build(&device, &uniform_layout, &texture_layout, false, false);
        let blit_pipeline = Self::build_blit_pipeline(&device, &texture_layout);

        let uniforms = zeroed_uniforms();
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("uniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let white = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("white"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOUR_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &white,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255u8; 4],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let white_view = white.create_view(&wgpu::TextureViewDescriptor::default());

        let frame = Self::build_frame_textures(&device, width, height);

        Self {
            device,
            queue,
            pipelines,
            blit_pipeline,
            uniform_buffer,
            uniform_bind_group,
            uniform_layout,
            texture_layout,
            uniforms,
            viewport: (width, height),
            backface_cull: false,
            clockwise_faces: false,
            frame,
            textures: HashMap::new(),
            targets: HashMap::new(),
            samplers: HashMap::new(),
            white_texture: white_view,
            next_texture_id: 1,
            next_target_id: 1,
            bound: Vec::new(),
            saved: Vec::new(),
            pick: None,
        }
    }

    fn build_blit_pipeline(
        device: &wgpu::Device,
        texture_layout: &wgpu::BindGroupLayout,
    ) -> wgpu::RenderPipeline {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("./blit.wgsl").into()),
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit pipeline layout"),
            bind_group_layouts: &[texture_layout],
            push_constant_ranges: &[],
        });
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blit pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_blit"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_blit"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOUR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }

    fn build_frame_textures(device: &wgpu::Device, width: u32, height: u32) -> FrameTextures {
        let colour = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("frame colour"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOUR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("frame depth"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let colour_view = colour.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
        FrameTextures {
            colour,
            colour_view,
            _depth: depth,
            depth_view,
            width,
            height,
        }
    }

    fn sampler_for(&mut self, params: SamplerParams) -> &wgpu::Sampler {
        let device = &self.device;
        self.samplers.entry(params).or_insert_with(|| {
            let filter = |mode: FilterMode| match mode {
                FilterMode::Nearest => wgpu::FilterMode::Nearest,
                FilterMode::Linear | FilterMode::LinearMipmap => wgpu::FilterMode::Linear,
            };
            let address = |mode: WrapMode| match mode {
                WrapMode::Clamp => wgpu::AddressMode::ClampToEdge,
                WrapMode::Repeat => wgpu::AddressMode::Repeat,
            };
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("quad sampler"),
                address_mode_u: address(params.wrap_s),
                address_mode_v: address(params.wrap_t),
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter(params.mag),
                min_filter: filter(params.min),
                mipmap_filter: if params.min == FilterMode::LinearMipmap {
                    wgpu::FilterMode::Linear
                } else {
                    wgpu::FilterMode::Nearest
                },
                ..Default::default()
            })
        })
    }

    /// Whether draws currently land in the picking attachments rather than
    /// a visible surface.
    fn picking_now(&self) -> bool {
        self.pick.is_some() && self.bound.is_empty()
    }

    fn write_uniforms(&self, pick_id: Option<PrimitiveId>, lit: bool) {
        let mut uniforms = self.uniforms;
        uniforms.counts[0] = lit as u32;
        uniforms.counts[2] = pick_id.map(|id| id.0).unwrap_or(0);
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
    }

    fn map_readback_buffer_into(&self, buffer: &wgpu::Buffer, mapped_bytes: &mut Vec<u8>) {
        mapped_bytes.clear();

        let buffer_slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            if sender.send(result).is_err() {
                log::warn!("failed to send map_async result from callback");
            }
        });

        let _ = self.device.poll(wgpu::MaintainBase::Wait);

        let map_result = match receiver.recv() {
            Ok(result) => result,
            Err(error) => {
                log::warn!("failed to receive mapped buffer result: {}", error);
                return;
            }
        };
        if let Err(error) = map_result {
            log::warn!("failed to map readback buffer: {:?}", error);
            return;
        }

        let mapped_range = buffer_slice.get_mapped_range();
        mapped_bytes.extend_from_slice(&mapped_range);
        drop(mapped_range);
        buffer.unmap();
    }

    fn read_texture_region(
        &self,
        texture: &wgpu::Texture,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        bytes_per_texel: u32,
        out: &mut Vec<u8>,
    ) {
        out.clear();
        if width == 0 || height == 0 {
            return;
        }

        let unpadded = width * bytes_per_texel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: (padded * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let mut mapped = Vec::new();
        self.map_readback_buffer_into(&buffer, &mut mapped);
        if mapped.is_empty() {
            return;
        }
        copy_padded_readback_rows(&mapped, height, unpadded, padded, out);
    }

    /// Reads the whole visible frame back as tightly packed RGBA8 rows.
    pub fn read_frame(&self, out: &mut Vec<u8>) {
        self.read_texture_region(
            &self.frame.colour,
            0,
            0,
            self.frame.width,
            self.frame.height,
            4,
            out,
        );
    }

    fn clear_pass(
        &self,
        colour_view: &wgpu::TextureView,
        depth_view: &wgpu::TextureView,
        colour: Option<Color>,
        depth: bool,
    ) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: colour_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match colour {
                            Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
                                r: c.r as f64,
                                g: c.g as f64,
                                b: c.b as f64,
                                a: c.a as f64,
                            }),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: if depth {
                            wgpu::LoadOp::Clear(1.0)
                        } else {
                            wgpu::LoadOp::Load
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
    }
}

impl GraphicsDevice for WgpuDevice {
    fn supports_render_targets(&self) -> bool {
        true
    }

    fn create_texture(&mut self, width: u32, height: u32, sampler: SamplerParams) -> TextureHandle {
        let mip_count = mip_count_for(width, height);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("scene texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOUR_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            base_mip_level: 0,
            ..Default::default()
        });
        let attachment_view = texture.create_view(&wgpu::TextureViewDescriptor {
            base_mip_level: 0,
            mip_level_count: Some(1),
            ..Default::default()
        });

        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(
            id,
            TextureEntry {
                texture,
                view,
                attachment_view,
                width,
                height,
                mip_count,
                sampler,
            },
        );
        TextureHandle(id)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(entry) = self.textures.remove(&texture.0) {
            entry.texture.destroy();
        }
    }

    fn upload_region(
        &mut self,
        texture: TextureHandle,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        rgba8: &[u8],
    ) {
        let Some(entry) = self.textures.get(&texture.0) else {
            return;
        };
        if rgba8.len() < (width * height * 4) as usize {
            return;
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            rgba8,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn set_sampler(&mut self, texture: TextureHandle, sampler: SamplerParams) {
        if let Some(entry) = self.textures.get_mut(&texture.0) {
            entry.sampler = sampler;
        }
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        let Some(entry) = self.textures.get(&texture.0) else {
            return;
        };
        if entry.mip_count < 2 {
            return;
        }

        let linear = self
            .sampler_for(SamplerParams {
                mag: FilterMode::Linear,
                min: FilterMode::Linear,
                wrap_s: WrapMode::Clamp,
                wrap_t: WrapMode::Clamp,
            })
            .clone();
        let Some(entry) = self.textures.get(&texture.0) else {
            return;
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mipmap encoder"),
            });
        for level in 1..entry.mip_count {
            let source = entry.texture.create_view(&wgpu::TextureViewDescriptor {
                base_mip_level: level - 1,
                mip_level_count: Some(1),
                ..Default::default()
            });
            let destination = entry.texture.create_view(&wgpu::TextureViewDescriptor {
                base_mip_level: level,
                mip_level_count: Some(1),
                ..Default::default()
            });
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("mipmap bind group"),
                layout: &self.texture_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&source),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&linear),
                    },
                ],
            });
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mipmap pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &destination,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.blit_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn create_render_target(
        &mut self,
        colour: TextureHandle,
        _with_depth: bool,
    ) -> RenderTargetHandle {
        let (width, height) = self
            .textures
            .get(&colour.0)
            .map(|entry| (entry.width, entry.height))
            .unwrap_or((1, 1));
        // a depth buffer is always attached; per-draw depth state decides
        // whether it is consulted
        let depth = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("target depth"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        let id = self.next_target_id;
        self.next_target_id += 1;
        self.targets.insert(
            id,
            TargetEntry {
                colour,
                _depth: depth,
                depth_view,
            },
        );
        RenderTargetHandle(id)
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        self.targets.remove(&target.0);
    }

    fn bind_render_target(&mut self, target: RenderTargetHandle) {
        if !self.targets.contains_key(&target.0) {
            log::error!("bind of unknown render target {}", target.0);
            return;
        }
        self.saved.push(SavedState {
            uniforms: self.uniforms,
            viewport: self.viewport,
        });
        self.bound.push(target.0);
    }

    fn unbind_render_target(&mut self) {
        if self.bound.pop().is_none() {
            debug_assert!(false, "unbind without a matching bind");
            log::error!("unbind without a matching bind");
            return;
        }
        if let Some(saved) = self.saved.pop() {
            self.uniforms = saved.uniforms;
            self.viewport = saved.viewport;
        }
    }

    fn read_pixels(&mut self, x: u32, y: u32, width: u32, height: u32, out: &mut Vec<u8>) {
        let texture = match self.bound.last() {
            Some(target_id) => {
                let Some(target) = self.targets.get(target_id) else {
                    out.clear();
                    return;
                };
                match self.textures.get(&target.colour.0) {
                    Some(entry) => &entry.texture,
                    None => {
                        out.clear();
                        return;
                    }
                }
            }
            None => &self.frame.colour,
        };
        self.read_texture_region(texture, x, y, width, height, 4, out);
    }

    fn begin_frame(&mut self, setup: &FrameSetup) {
        self.viewport = (setup.width, setup.height);

        if self.bound.is_empty() {
            if (self.frame.width, self.frame.height) != (setup.width, setup.height) {
                self.frame = Self::build_frame_textures(&self.device, setup.width, setup.height);
            }
            if (self.backface_cull, self.clockwise_faces)
                != (setup.backface_cull, setup.clockwise_faces)
            {
                self.backface_cull = setup.backface_cull;
                self.clockwise_faces = setup.clockwise_faces;
                self.pipelines = Pipelines::build(
                    &self.device,
                    &self.uniform_layout,
                    &self.texture_layout,
                    self.backface_cull,
                    self.clockwise_faces,
                );
            }
        }

        match setup.fog {
            Some(fog) => {
                self.uniforms.fog_colour = fog.colour.to_array();
                self.uniforms.fog_params = [fog.density, fog.start, fog.end, 1.0];
            }
            None => {
                self.uniforms.fog_params = [0.0; 4];
            }
        }
        if setup.stereo != StereoMode::None {
            log::debug!("stereo mode configured but rendered single-pass");
        }
    }

    fn clear(&mut self, colour: Color, frame: bool, depth: bool) {
        if !frame && !depth {
            return;
        }
        let colour = frame.then_some(colour);

        if self.picking_now() {
            if let Some(pick) = &self.pick {
                self.clear_pass(
                    &pick.id_view,
                    &pick.depth_view,
                    colour.map(|_| Color::TRANSPARENT),
                    depth,
                );
            }
            return;
        }
        match self.bound.last() {
            Some(target_id) => {
                let Some(target) = self.targets.get(target_id) else {
                    return;
                };
                let Some(entry) = self.textures.get(&target.colour.0) else {
                    return;
                };
                self.clear_pass(&entry.attachment_view, &target.depth_view, colour, depth);
            }
            None => {
                self.clear_pass(&self.frame.colour_view, &self.frame.depth_view, colour, depth);
            }
        }
    }

    fn set_camera(&mut self, view_proj: Mat4, eye: Vec3) {
        self.uniforms.view_proj = view_proj.to_cols_array_2d();
        self.uniforms.eye = [eye.x, eye.y, eye.z, 1.0];
    }

    fn set_lights(&mut self, lights: &[LightInfo]) {
        let count = lights.len().min(MAX_LIGHTS);
        for (slot, light) in self.uniforms.lights.iter_mut().zip(lights.iter()) {
            slot.position = [light.position.x, light.position.y, light.position.z, 1.0];
            slot.diffuse = light.diffuse.to_array();
            slot.ambient = light.ambient.to_array();
        }
        self.uniforms.counts[1] = count as u32;
    }

    fn draw_quad(&mut self, quad: &QuadDraw) {
        let picking = self.picking_now();
        if picking && quad.pick.is_none() {
            return;
        }

        let normal = (quad.points[1] - quad.points[0])
            .cross(quad.points[3] - quad.points[0])
            .normalize_or_zero();
        let vertex =
            |index: usize| QuadVertex {
                position: quad.points[index].to_array(),
                uv: quad.uvs[index],
                colour: quad.colour.to_array(),
                normal: normal.to_array(),
            };
        // pick passes rasterise wire quads as solid coverage
        let as_lines = quad.wire && !picking;
        let vertices: Vec<QuadVertex> = if as_lines {
            [0, 1, 1, 2, 2, 3, 3, 0].iter().map(|i| vertex(*i)).collect()
        } else {
            [0, 1, 2, 0, 2, 3].iter().map(|i| vertex(*i)).collect()
        };
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("quad vertices"),
                contents: bytemuck::cast_slice(&vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });

        self.write_uniforms(quad.pick, quad.lit);

        let sampler = self.sampler_for(quad.sampler).clone();
        let texture_view = quad
            .texture
            .and_then(|handle| self.textures.get(&handle.0))
            .map(|entry| &entry.view)
            .unwrap_or(&self.white_texture);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("quad bind group"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(texture_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let (colour_view, depth_view) = if let (true, Some(pick)) = (picking, self.pick.as_ref()) {
            (&pick.id_view, &pick.depth_view)
        } else {
            match self.bound.last() {
                Some(target_id) => {
                    let Some(target) = self.targets.get(target_id) else {
                        return;
                    };
                    let Some(entry) = self.textures.get(&target.colour.0) else {
                        return;
                    };
                    (&entry.attachment_view, &target.depth_view)
                }
                None => (&self.frame.colour_view, &self.frame.depth_view),
            }
        };

        let pipeline = match (picking, as_lines, quad.depth_test) {
            (true, _, true) => &self.pipelines.pick,
            (true, _, false) => &self.pipelines.pick_overlay,
            (false, true, true) => &self.pipelines.line,
            (false, true, false) => &self.pipelines.line_overlay,
            (false, false, true) => &self.pipelines.solid,
            (false, false, false) => &self.pipelines.solid_overlay,
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("quad encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("quad pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: colour_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_viewport(
                0.0,
                0.0,
                self.viewport.0 as f32,
                self.viewport.1 as f32,
                0.0,
                1.0,
            );
            pass.set_bind_group(0, &self.uniform_bind_group, &[]);
            pass.set_bind_group(1, &bind_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.draw(0..vertices.len() as u32, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn end_frame(&mut self) {
        // per-draw submission; nothing left to flush
    }

    fn begin_pick(&mut self, region: PickRegion) {
        let width = self.frame.width.max(1);
        let height = self.frame.height.max(1);
        let id_texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pick ids"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: PICK_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth_texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pick depth"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let id_view = id_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let pick = PickPass {
            region,
            id_texture,
            id_view,
            depth_texture,
            depth_view,
            width,
            height,
        };
        self.clear_pass(&pick.id_view, &pick.depth_view, Some(Color::TRANSPARENT), true);
        self.pick = Some(pick);
    }

    fn take_pick_hits(&mut self, out: &mut Vec<PickHit>) {
        out.clear();
        let Some(pick) = self.pick.take() else {
            return;
        };

        let x0 = pick.region.x.min(pick.width - 1);
        let y0 = pick.region.y.min(pick.height - 1);
        let width = pick.region.size.max(1).min(pick.width - x0);
        let height = pick.region.size.max(1).min(pick.height - y0);

        let mut id_bytes = Vec::new();
        self.read_texture_region(&pick.id_texture, x0, y0, width, height, 4, &mut id_bytes);
        let mut depth_bytes = Vec::new();
        self.read_texture_region(
            &pick.depth_texture,
            x0,
            y0,
            width,
            height,
            4,
            &mut depth_bytes,
        );

        let mut nearest: ahash::AHashMap<u32, f32> = ahash::AHashMap::new();
        for (index, id_sample) in id_bytes.chunks_exact(4).enumerate() {
            let id = u32::from_le_bytes([id_sample[0], id_sample[1], id_sample[2], id_sample[3]]);
            if id == 0 {
                continue;
            }
            let depth = depth_bytes
                .get(index * 4..index * 4 + 4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .unwrap_or(1.0);
            let entry = nearest.entry(id).or_insert(f32::INFINITY);
            if depth < *entry {
                *entry = depth;
            }
        }
        out.extend(
            nearest
                .into_iter()
                .map(|(id, depth)| PickHit {
                    id: PrimitiveId(id),
                    depth,
                }),
        );
        // map iteration order is arbitrary; report hits by id
        out.sort_by_key(|hit| hit.id);
    }
}
