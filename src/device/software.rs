//! CPU reference backend.
//!
//! Rasterizes quads into plain byte buffers with per-pixel depth testing.
//! Used for headless rendering and the integration tests; it is also the
//! executable description of the device semantics the wgpu backend
//! implements on the GPU.

use ahash::{HashMap, HashMapExt};
use glam::{Mat4, Vec2, Vec3};

use crate::color::Color;
use crate::id::PrimitiveId;
use crate::state::SamplerParams;

use super::{
    FrameSetup, GraphicsDevice, LightInfo, PickHit, PickRegion, QuadDraw, RenderTargetHandle,
    TextureHandle,
};

#[derive(Debug)]
struct SoftTexture {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    #[allow(dead_code)]
    sampler: SamplerParams,
}

#[derive(Debug)]
struct SoftTarget {
    colour: TextureHandle,
    depth: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy)]
struct SavedState {
    view_proj: Mat4,
    eye: Vec3,
    viewport: (u32, u32),
    light_count: usize,
}

#[derive(Debug)]
struct PickState {
    region: PickRegion,
    /// Nearest (id, depth) winner per region pixel.
    winners: Vec<Option<(PrimitiveId, f32)>>,
}

/// A headless, CPU-resident [`GraphicsDevice`].
pub struct SoftwareDevice {
    supports_render_targets: bool,
    next_handle: u64,
    textures: HashMap<u64, SoftTexture>,
    targets: HashMap<u64, SoftTarget>,
    /// Bind stack: bound target plus the device state saved at bind time.
    bound: Vec<(RenderTargetHandle, SavedState)>,

    frame_width: u32,
    frame_height: u32,
    frame_pixels: Vec<u8>,
    frame_depth: Vec<f32>,

    viewport: (u32, u32),
    view_proj: Mat4,
    eye: Vec3,
    lights: Vec<LightInfo>,
    pick: Option<PickState>,
}

impl SoftwareDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            supports_render_targets: true,
            next_handle: 1,
            textures: HashMap::new(),
            targets: HashMap::new(),
            bound: Vec::new(),
            frame_width: width,
            frame_height: height,
            frame_pixels: vec![0; (width * height * 4) as usize],
            frame_depth: vec![1.0; (width * height) as usize],
            viewport: (width, height),
            view_proj: Mat4::IDENTITY,
            eye: Vec3::ZERO,
            lights: Vec::new(),
            pick: None,
        }
    }

    /// A device that reports no render-target support, for exercising the
    /// plain-texture fallback path.
    pub fn without_render_targets(width: u32, height: u32) -> Self {
        let mut device = Self::new(width, height);
        device.supports_render_targets = false;
        device
    }

    /// The main frame's pixels as tightly packed RGBA8 rows.
    pub fn frame_pixels(&self) -> &[u8] {
        &self.frame_pixels
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    /// Direct read access to a texture's pixel store, for assertions.
    pub fn texture_pixels(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.textures.get(&texture.0).map(|t| t.pixels.as_slice())
    }

    pub fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(&texture.0).map(|t| (t.width, t.height))
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn render_target_count(&self) -> usize {
        self.targets.len()
    }

    fn alloc_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn saved_state(&self) -> SavedState {
        SavedState {
            view_proj: self.view_proj,
            eye: self.eye,
            viewport: self.viewport,
            light_count: self.lights.len(),
        }
    }

    fn restore_state(&mut self, saved: SavedState) {
        self.view_proj = saved.view_proj;
        self.eye = saved.eye;
        self.viewport = saved.viewport;
        self.lights.truncate(saved.light_count);
    }

    /// Projects a world-space point to pixel coordinates plus NDC depth for
    /// the current viewport. Returns `None` behind the eye plane.
    fn project(&self, point: Vec3) -> Option<(Vec2, f32)> {
        let clip = self.view_proj * point.extend(1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        let (vw, vh) = self.viewport;
        let px = (ndc.x * 0.5 + 0.5) * vw as f32;
        let py = (1.0 - (ndc.y * 0.5 + 0.5)) * vh as f32;
        Some((Vec2::new(px, py), ndc.z))
    }

    fn raster_quad(&mut self, quad: &QuadDraw) {
        let mut projected = [(Vec2::ZERO, 0.0f32); 4];
        for (slot, point) in projected.iter_mut().zip(quad.points.iter()) {
            match self.project(*point) {
                Some(p) => *slot = p,
                None => return,
            }
        }

        if quad.wire {
            for edge in 0..4 {
                let (a, az) = projected[edge];
                let (b, bz) = projected[(edge + 1) % 4];
                self.raster_line(a, az, b, bz, quad);
            }
            return;
        }

        self.raster_triangle([projected[0], projected[1], projected[2]], [0, 1, 2], quad);
        self.raster_triangle([projected[0], projected[2], projected[3]], [0, 2, 3], quad);
    }

    fn raster_triangle(&mut self, verts: [(Vec2, f32); 3], uv_index: [usize; 3], quad: &QuadDraw) {
        let (vw, vh) = self.viewport;
        let [(a, az), (b, bz), (c, cz)] = verts;

        let min_x = a.x.min(b.x).min(c.x).floor().max(0.0) as i64;
        let min_y = a.y.min(b.y).min(c.y).floor().max(0.0) as i64;
        let max_x = (a.x.max(b.x).max(c.x).ceil() as i64).min(vw as i64 - 1);
        let max_y = (a.y.max(b.y).max(c.y).ceil() as i64).min(vh as i64 - 1);

        let area = edge(a, b, c);
        if area.abs() < f32::EPSILON {
            return;
        }

        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(b, c, p) / area;
                let w1 = edge(c, a, p) / area;
                let w2 = edge(a, b, p) / area;
                let inside = (w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0)
                    || (w0 <= 0.0 && w1 <= 0.0 && w2 <= 0.0);
                if !inside {
                    continue;
                }

                let depth = w0 * az + w1 * bz + w2 * cz;
                let uv_a = quad.uvs[uv_index[0]];
                let uv_b = quad.uvs[uv_index[1]];
                let uv_c = quad.uvs[uv_index[2]];
                let u = w0 * uv_a[0] + w1 * uv_b[0] + w2 * uv_c[0];
                let v = w0 * uv_a[1] + w1 * uv_b[1] + w2 * uv_c[1];

                // texels modulate the quad colour, matching the GPU shader
                let colour = match quad.texture.and_then(|t| self.sample(t, u, v)) {
                    Some(sampled) => Color::rgba(
                        sampled.r * quad.colour.r,
                        sampled.g * quad.colour.g,
                        sampled.b * quad.colour.b,
                        sampled.a * quad.colour.a,
                    ),
                    None => quad.colour,
                };
                self.write_pixel(x as u32, y as u32, depth, colour, quad);
            }
        }
    }

    fn raster_line(&mut self, a: Vec2, az: f32, b: Vec2, bz: f32, quad: &QuadDraw) {
        let steps = (b - a).abs().max_element().ceil().max(1.0) as u32;
        for step in 0..=steps {
            let t = step as f32 / steps as f32;
            let p = a.lerp(b, t);
            let depth = az + (bz - az) * t;
            let (vw, vh) = self.viewport;
            if p.x < 0.0 || p.y < 0.0 || p.x >= vw as f32 || p.y >= vh as f32 {
                continue;
            }
            // small bias so outlines win over the fill they sit on
            self.write_pixel(p.x as u32, p.y as u32, depth - 1e-4, quad.colour, quad);
        }
    }

    fn sample(&self, texture: TextureHandle, u: f32, v: f32) -> Option<Color> {
        let texture = self.textures.get(&texture.0)?;
        let tx = ((u * texture.width as f32) as i64).clamp(0, texture.width as i64 - 1) as u32;
        let ty = ((v * texture.height as f32) as i64).clamp(0, texture.height as i64 - 1) as u32;
        let offset = ((ty * texture.width + tx) * 4) as usize;
        let bytes = texture.pixels.get(offset..offset + 4)?;
        Some(Color::from_rgba8([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn write_pixel(&mut self, x: u32, y: u32, depth: f32, colour: Color, quad: &QuadDraw) {
        let picking = self.bound.is_empty() && self.pick.is_some();

        if let Some((target, _)) = self.bound.last().copied() {
            let Some(target) = self.targets.get_mut(&target.0) else {
                return;
            };
            let Some(texture) = self.textures.get_mut(&target.colour.0) else {
                return;
            };
            if x >= texture.width || y >= texture.height {
                return;
            }
            let idx = (y * texture.width + x) as usize;
            if quad.depth_test {
                if let Some(depth_buffer) = target.depth.as_mut() {
                    if depth > depth_buffer[idx] {
                        return;
                    }
                    depth_buffer[idx] = depth;
                }
            }
            texture.pixels[idx * 4..idx * 4 + 4].copy_from_slice(&colour.to_rgba8());
            return;
        }

        if x >= self.frame_width || y >= self.frame_height {
            return;
        }
        let idx = (y * self.frame_width + x) as usize;
        if quad.depth_test {
            if depth > self.frame_depth[idx] {
                return;
            }
            self.frame_depth[idx] = depth;
        }

        if picking {
            if let (Some(pick), Some(id)) = (self.pick.as_mut(), quad.pick) {
                let region = pick.region;
                if x >= region.x
                    && y >= region.y
                    && x < region.x + region.size
                    && y < region.y + region.size
                {
                    let region_idx =
                        ((y - region.y) * region.size + (x - region.x)) as usize;
                    let slot = &mut pick.winners[region_idx];
                    if slot.map(|(_, d)| depth < d).unwrap_or(true) {
                        *slot = Some((id, depth));
                    }
                }
            }
            // a picking pass never produces a visible image
            return;
        }

        self.frame_pixels[idx * 4..idx * 4 + 4].copy_from_slice(&colour.to_rgba8());
    }
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

impl GraphicsDevice for SoftwareDevice {
    fn supports_render_targets(&self) -> bool {
        self.supports_render_targets
    }

    fn create_texture(&mut self, width: u32, height: u32, sampler: SamplerParams) -> TextureHandle {
        let handle = self.alloc_handle();
        self.textures.insert(
            handle,
            SoftTexture {
                width,
                height,
                pixels: vec![0; (width * height * 4) as usize],
                sampler,
            },
        );
        TextureHandle(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture.0).is_none() {
            log::warn!("destroy_texture: unknown texture {}", texture.0);
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
        let Some(texture) = self.textures.get_mut(&texture.0) else {
            log::warn!("upload_region: unknown texture {}", texture.0);
            return;
        };
        debug_assert!(rgba8.len() >= (width * height * 4) as usize);
        if x >= texture.width {
            return;
        }
        for row in 0..height.min(texture.height.saturating_sub(y)) {
            let src = ((row * width) * 4) as usize;
            let dst = (((y + row) * texture.width + x) * 4) as usize;
            let copy_width = width.min(texture.width.saturating_sub(x)) as usize * 4;
            texture.pixels[dst..dst + copy_width].copy_from_slice(&rgba8[src..src + copy_width]);
        }
    }

    fn set_sampler(&mut self, texture: TextureHandle, sampler: SamplerParams) {
        if let Some(texture) = self.textures.get_mut(&texture.0) {
            texture.sampler = sampler;
        }
    }

    fn generate_mipmaps(&mut self, _texture: TextureHandle) {
        // the software sampler only ever reads level 0
    }

    fn create_render_target(
        &mut self,
        colour: TextureHandle,
        with_depth: bool,
    ) -> RenderTargetHandle {
        let depth = if with_depth {
            let size = self
                .textures
                .get(&colour.0)
                .map(|t| (t.width * t.height) as usize)
                .unwrap_or(0);
            Some(vec![1.0; size])
        } else {
            None
        };
        let handle = self.alloc_handle();
        self.targets.insert(handle, SoftTarget { colour, depth });
        RenderTargetHandle(handle)
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        if self.targets.remove(&target.0).is_none() {
            log::warn!("destroy_render_target: unknown target {}", target.0);
        }
    }

    fn bind_render_target(&mut self, target: RenderTargetHandle) {
        let saved = self.saved_state();
        self.bound.push((target, saved));
    }

    fn unbind_render_target(&mut self) {
        match self.bound.pop() {
            Some((_, saved)) => self.restore_state(saved),
            None => {
                debug_assert!(false, "unbind_render_target without a matching bind");
                log::error!("unbind_render_target called with nothing bound");
            }
        }
    }

    fn read_pixels(&mut self, x: u32, y: u32, width: u32, height: u32, out: &mut Vec<u8>) {
        out.clear();
        let (pixels, stride, max_h) = match self.bound.last() {
            Some((target, _)) => {
                let Some(target) = self.targets.get(&target.0) else {
                    return;
                };
                let Some(texture) = self.textures.get(&target.colour.0) else {
                    return;
                };
                (&texture.pixels, texture.width, texture.height)
            }
            None => (&self.frame_pixels, self.frame_width, self.frame_height),
        };
        if x >= stride {
            return;
        }
        for row in y..(y + height).min(max_h) {
            let offset = ((row * stride + x) * 4) as usize;
            let copy_width = width.min(stride.saturating_sub(x)) as usize * 4;
            out.extend_from_slice(&pixels[offset..offset + copy_width]);
        }
    }

    fn begin_frame(&mut self, setup: &FrameSetup) {
        if self.bound.is_empty() {
            if setup.width != self.frame_width || setup.height != self.frame_height {
                self.frame_width = setup.width;
                self.frame_height = setup.height;
                self.frame_pixels = vec![0; (setup.width * setup.height * 4) as usize];
                self.frame_depth = vec![1.0; (setup.width * setup.height) as usize];
            }
            self.viewport = (self.frame_width, self.frame_height);
        } else {
            // the nested renderer draws into the top-left of the bound
            // target's (padded) texture
            self.viewport = (setup.width, setup.height);
        }
    }

    fn clear(&mut self, colour: Color, frame: bool, depth: bool) {
        match self.bound.last().copied() {
            Some((target, _)) => {
                if let Some(target) = self.targets.get_mut(&target.0) {
                    if frame {
                        if let Some(texture) = self.textures.get_mut(&target.colour.0) {
                            let rgba = colour.to_rgba8();
                            for pixel in texture.pixels.chunks_exact_mut(4) {
                                pixel.copy_from_slice(&rgba);
                            }
                        }
                    }
                    if depth {
                        if let Some(depth_buffer) = target.depth.as_mut() {
                            depth_buffer.fill(1.0);
                        }
                    }
                }
            }
            None => {
                if frame && self.pick.is_none() {
                    let rgba = colour.to_rgba8();
                    for pixel in self.frame_pixels.chunks_exact_mut(4) {
                        pixel.copy_from_slice(&rgba);
                    }
                }
                if depth {
                    self.frame_depth.fill(1.0);
                }
            }
        }
    }

    fn set_camera(&mut self, view_proj: Mat4, eye: Vec3) {
        self.view_proj = view_proj;
        self.eye = eye;
    }

    fn set_lights(&mut self, lights: &[LightInfo]) {
        self.lights.clear();
        self.lights.extend_from_slice(lights);
    }

    fn draw_quad(&mut self, quad: &QuadDraw) {
        self.raster_quad(quad);
    }

    fn end_frame(&mut self) {}

    fn begin_pick(&mut self, region: PickRegion) {
        self.pick = Some(PickState {
            region,
            winners: vec![None; (region.size * region.size) as usize],
        });
    }

    fn take_pick_hits(&mut self, out: &mut Vec<PickHit>) {
        out.clear();
        let Some(pick) = self.pick.take() else {
            return;
        };
        let mut nearest: HashMap<PrimitiveId, f32> = HashMap::new();
        for winner in pick.winners.into_iter().flatten() {
            let (id, depth) = winner;
            nearest
                .entry(id)
                .and_modify(|d| *d = d.min(depth))
                .or_insert(depth);
        }
        out.extend(nearest.into_iter().map(|(id, depth)| PickHit { id, depth }));
        // map iteration order is arbitrary; report hits by id
        out.sort_by_key(|hit| hit.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::with_bound_target;

    fn ortho_camera(device: &mut SoftwareDevice, width: f32, height: f32) {
        let proj = Mat4::orthographic_rh(0.0, width, 0.0, height, -10.0, 10.0);
        device.set_camera(proj, Vec3::new(0.0, 0.0, 10.0));
    }

    fn setup(width: u32, height: u32) -> FrameSetup {
        FrameSetup {
            width,
            height,
            backface_cull: false,
            clockwise_faces: false,
            fog: None,
            stereo: super::super::StereoMode::None,
        }
    }

    #[test]
    fn flat_quad_fills_the_frame() {
        let mut device = SoftwareDevice::new(8, 8);
        device.begin_frame(&setup(8, 8));
        ortho_camera(&mut device, 1.0, 1.0);

        let quad = QuadDraw::unit(Color::rgb(1.0, 0.0, 0.0));
        device.draw_quad(&quad);
        device.end_frame();

        let pixels = device.frame_pixels();
        assert_eq!(&pixels[0..4], &[255, 0, 0, 255]);
        let last = pixels.len() - 4;
        assert_eq!(&pixels[last..], &[255, 0, 0, 255]);
    }

    #[test]
    fn depth_test_keeps_the_nearer_quad() {
        let mut device = SoftwareDevice::new(4, 4);
        device.begin_frame(&setup(4, 4));
        ortho_camera(&mut device, 1.0, 1.0);

        let mut far = QuadDraw::unit(Color::rgb(0.0, 1.0, 0.0));
        for point in far.points.iter_mut() {
            point.z = -1.0;
        }
        let near = QuadDraw::unit(Color::rgb(1.0, 0.0, 0.0));

        device.draw_quad(&near);
        device.draw_quad(&far);

        assert_eq!(&device.frame_pixels()[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn bind_saves_and_unbind_restores_camera_state() {
        let mut device = SoftwareDevice::new(4, 4);
        ortho_camera(&mut device, 1.0, 1.0);
        let before = device.view_proj;

        let colour = device.create_texture(4, 4, SamplerParams::default());
        let target = device.create_render_target(colour, true);
        with_bound_target(&mut device, target, |device| {
            device.set_camera(Mat4::IDENTITY, Vec3::ZERO);
        });

        assert_eq!(device.view_proj, before);
    }

    #[test]
    fn draws_while_bound_land_in_the_target_texture() {
        let mut device = SoftwareDevice::new(4, 4);
        let colour = device.create_texture(8, 8, SamplerParams::default());
        let target = device.create_render_target(colour, true);

        with_bound_target(&mut device, target, |device| {
            device.begin_frame(&setup(8, 8));
            let proj = Mat4::orthographic_rh(0.0, 1.0, 0.0, 1.0, -10.0, 10.0);
            device.set_camera(proj, Vec3::ZERO);
            device.draw_quad(&QuadDraw::unit(Color::rgb(0.0, 0.0, 1.0)));
            device.end_frame();
        });

        let pixels = device.texture_pixels(colour).unwrap();
        assert_eq!(&pixels[0..4], &[0, 0, 255, 255]);
        // the main frame is untouched
        assert_eq!(&device.frame_pixels()[0..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn upload_then_read_pixels_round_trips() {
        let mut device = SoftwareDevice::new(4, 4);
        let colour = device.create_texture(4, 4, SamplerParams::default());
        let target = device.create_render_target(colour, false);

        let data: Vec<u8> = (0..4 * 4 * 4).map(|i| (i % 251) as u8).collect();
        device.upload_region(colour, 0, 0, 4, 4, &data);

        let mut out = Vec::new();
        with_bound_target(&mut device, target, |device| {
            device.read_pixels(0, 0, 4, 4, &mut out);
        });
        assert_eq!(out, data);
    }

    #[test]
    fn reads_past_the_texture_edge_come_back_empty() {
        let mut device = SoftwareDevice::new(4, 4);
        let colour = device.create_texture(4, 4, SamplerParams::default());
        let target = device.create_render_target(colour, false);

        let mut out = vec![1, 2, 3];
        with_bound_target(&mut device, target, |device| {
            device.read_pixels(10, 0, 2, 2, &mut out);
        });
        assert!(out.is_empty());
    }

    #[test]
    fn pick_records_the_nearest_quad() {
        let mut device = SoftwareDevice::new(8, 8);
        device.begin_frame(&setup(8, 8));
        ortho_camera(&mut device, 1.0, 1.0);

        device.begin_pick(PickRegion { x: 4, y: 4, size: 2 });

        let mut behind = QuadDraw::unit(Color::WHITE);
        behind.pick = Some(PrimitiveId(1));
        for point in behind.points.iter_mut() {
            point.z = -1.0;
        }
        let mut front = QuadDraw::unit(Color::WHITE);
        front.pick = Some(PrimitiveId(2));

        device.draw_quad(&behind);
        device.draw_quad(&front);

        let mut hits = Vec::new();
        device.take_pick_hits(&mut hits);
        hits.sort_by(|a, b| a.depth.total_cmp(&b.depth));
        assert_eq!(hits.first().map(|h| h.id), Some(PrimitiveId(2)));
    }
}
