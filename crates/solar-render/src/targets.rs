//! Render targets and the per-frame resource set
//!
//! Every offscreen target the frame passes draw into is described by a list
//! of [`AttachmentSpec`]s. The specs never change after creation, so a resize
//! simply reallocates each attachment from its spec at the new size.

use crate::context::RenderError;

/// Format used by every HDR attachment (lighting, bright pass, bloom).
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
/// Format of the G-buffer depth and the environment capture depth.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Fixed description of one attachment point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentSpec {
    pub label: &'static str,
    pub format: wgpu::TextureFormat,
    pub filter: wgpu::FilterMode,
    /// Usages needed on top of render-attachment and sampling.
    pub extra_usage: wgpu::TextureUsages,
}

impl AttachmentSpec {
    pub const fn color(label: &'static str, format: wgpu::TextureFormat, filter: wgpu::FilterMode) -> Self {
        Self {
            label,
            format,
            filter,
            extra_usage: wgpu::TextureUsages::empty(),
        }
    }

    pub const fn depth(label: &'static str) -> Self {
        Self {
            label,
            format: DEPTH_FORMAT,
            filter: wgpu::FilterMode::Nearest,
            extra_usage: wgpu::TextureUsages::empty(),
        }
    }

    pub const fn with_usage(mut self, usage: wgpu::TextureUsages) -> Self {
        self.extra_usage = usage;
        self
    }

    pub fn usage(&self) -> wgpu::TextureUsages {
        wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | self.extra_usage
    }

    pub fn is_depth(&self) -> bool {
        self.format.is_depth_stencil_format()
    }
}

/// A texture allocated from an [`AttachmentSpec`].
pub struct Attachment {
    pub spec: AttachmentSpec,
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
}

impl Attachment {
    fn allocate(device: &wgpu::Device, spec: AttachmentSpec, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(spec.label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: spec.format,
            usage: spec.usage(),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(spec.label),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: spec.filter,
            min_filter: spec.filter,
            ..Default::default()
        });
        Self {
            spec,
            texture,
            view,
            sampler,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.texture.width(), self.texture.height())
    }
}

/// Bytes per sample the given color formats occupy together, following
/// wgpu's accounting (each target aligned to its component size).
pub fn color_bytes_per_sample(formats: impl IntoIterator<Item = wgpu::TextureFormat>) -> Option<u32> {
    let mut total: u32 = 0;
    for format in formats {
        let cost = format.target_pixel_byte_cost()?;
        let alignment = format.target_component_alignment()?;
        total = total.next_multiple_of(alignment) + cost;
    }
    Some(total)
}

/// Reject attachment sets the device cannot render into.
pub fn check_completeness(
    limits: &wgpu::Limits,
    target: &str,
    colors: &[AttachmentSpec],
    depth: Option<&AttachmentSpec>,
    width: u32,
    height: u32,
) -> Result<(), RenderError> {
    let incomplete = |reason: String| RenderError::IncompleteTarget {
        target: target.to_string(),
        reason,
    };

    if width == 0 || height == 0 {
        return Err(incomplete(format!("zero-sized attachments ({width}x{height})")));
    }
    if width > limits.max_texture_dimension_2d || height > limits.max_texture_dimension_2d {
        return Err(incomplete(format!(
            "{width}x{height} exceeds max texture dimension {}",
            limits.max_texture_dimension_2d
        )));
    }
    if colors.is_empty() && depth.is_none() {
        return Err(incomplete("no attachments".into()));
    }
    if colors.len() as u32 > limits.max_color_attachments {
        return Err(incomplete(format!(
            "{} color attachments, device allows {}",
            colors.len(),
            limits.max_color_attachments
        )));
    }
    for spec in colors {
        if spec.is_depth() || spec.format.target_pixel_byte_cost().is_none() {
            return Err(incomplete(format!(
                "'{}' format {:?} is not color-renderable",
                spec.label, spec.format
            )));
        }
    }
    if let Some(spec) = depth {
        if !spec.is_depth() {
            return Err(incomplete(format!(
                "'{}' format {:?} is not a depth format",
                spec.label, spec.format
            )));
        }
    }

    let bytes = color_bytes_per_sample(colors.iter().map(|s| s.format))
        .ok_or_else(|| incomplete("unknown render target byte cost".into()))?;
    if bytes > limits.max_color_attachment_bytes_per_sample {
        return Err(incomplete(format!(
            "{bytes} bytes per sample exceeds device limit {}",
            limits.max_color_attachment_bytes_per_sample
        )));
    }
    Ok(())
}

/// An offscreen framebuffer: color attachments plus an optional depth.
pub struct RenderTarget {
    pub label: &'static str,
    colors: Vec<Attachment>,
    depth: Option<Attachment>,
    width: u32,
    height: u32,
}

impl RenderTarget {
    pub fn new(
        device: &wgpu::Device,
        label: &'static str,
        colors: &[AttachmentSpec],
        depth: Option<AttachmentSpec>,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        let (colors, depth) = allocate_all(device, label, colors, depth.as_ref(), width, height)?;
        Ok(Self {
            label,
            colors,
            depth,
            width,
            height,
        })
    }

    /// Reallocate every attachment at the new size with unchanged specs.
    ///
    /// Returns `Ok(false)` without touching the GPU when the size is zero
    /// or already current.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) -> Result<bool, RenderError> {
        match self.prepare_resize(device, width, height)? {
            Some(staged) => {
                self.apply_resize(staged);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Allocate replacement attachments without modifying the target.
    pub fn prepare_resize(
        &self,
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> Result<Option<StagedResize>, RenderError> {
        if width == 0 || height == 0 || (width, height) == (self.width, self.height) {
            return Ok(None);
        }
        let color_specs: Vec<AttachmentSpec> = self.colors.iter().map(|a| a.spec).collect();
        let depth_spec = self.depth.as_ref().map(|a| a.spec);
        let (colors, depth) =
            allocate_all(device, self.label, &color_specs, depth_spec.as_ref(), width, height)?;
        Ok(Some(StagedResize {
            colors,
            depth,
            width,
            height,
        }))
    }

    pub fn apply_resize(&mut self, staged: StagedResize) {
        self.colors = staged.colors;
        self.depth = staged.depth;
        self.width = staged.width;
        self.height = staged.height;
    }

    pub fn color(&self, index: usize) -> &Attachment {
        &self.colors[index]
    }

    pub fn colors(&self) -> &[Attachment] {
        &self.colors
    }

    pub fn depth(&self) -> Option<&Attachment> {
        self.depth.as_ref()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// True when every attachment matches the target's recorded size.
    pub fn is_consistent(&self) -> bool {
        self.colors
            .iter()
            .chain(self.depth.iter())
            .all(|a| a.size() == (self.width, self.height))
    }
}

/// Attachments allocated for a pending resize, not yet swapped in.
pub struct StagedResize {
    colors: Vec<Attachment>,
    depth: Option<Attachment>,
    width: u32,
    height: u32,
}

/// Prepare a replacement for every slot, then apply them all.
///
/// The first failure is returned before any slot is modified.
pub fn replace_all<T, S, E>(
    slots: &mut [&mut T],
    mut prepare: impl FnMut(&T) -> Result<Option<S>, E>,
    mut apply: impl FnMut(&mut T, S),
) -> Result<bool, E> {
    let staged = slots
        .iter()
        .map(|slot| prepare(&**slot))
        .collect::<Result<Vec<_>, E>>()?;
    let mut changed = false;
    for (slot, staged) in slots.iter_mut().zip(staged) {
        if let Some(staged) = staged {
            apply(&mut **slot, staged);
            changed = true;
        }
    }
    Ok(changed)
}

fn allocate_all(
    device: &wgpu::Device,
    label: &str,
    colors: &[AttachmentSpec],
    depth: Option<&AttachmentSpec>,
    width: u32,
    height: u32,
) -> Result<(Vec<Attachment>, Option<Attachment>), RenderError> {
    check_completeness(&device.limits(), label, colors, depth, width, height)?;

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let color_attachments = colors
        .iter()
        .map(|spec| Attachment::allocate(device, *spec, width, height))
        .collect();
    let depth_attachment = depth.map(|spec| Attachment::allocate(device, *spec, width, height));
    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        return Err(RenderError::IncompleteTarget {
            target: label.to_string(),
            reason: error.to_string(),
        });
    }
    Ok((color_attachments, depth_attachment))
}

/// Index of each G-buffer color attachment.
pub mod gbuffer {
    pub const POSITION: usize = 0;
    pub const NORMAL: usize = 1;
    pub const ALBEDO: usize = 2;
    pub const EMISSION: usize = 3;
    pub const METALLIC_ROUGHNESS: usize = 4;
}

/// Index of each HDR target color attachment.
pub mod hdr {
    pub const COLOR: usize = 0;
    pub const BRIGHT: usize = 1;
}

pub fn gbuffer_attachments() -> [AttachmentSpec; 5] {
    use wgpu::{FilterMode::Nearest, TextureFormat as F};
    [
        AttachmentSpec::color("G-Buffer Position", F::Rgba16Float, Nearest),
        AttachmentSpec::color("G-Buffer Normal", F::Rgba16Float, Nearest),
        AttachmentSpec::color("G-Buffer Albedo", F::Rgba8Unorm, Nearest),
        AttachmentSpec::color("G-Buffer Emission", F::Rgba16Float, Nearest),
        AttachmentSpec::color("G-Buffer Metallic Roughness", F::Rg8Unorm, Nearest),
    ]
}

pub fn hdr_attachments() -> [AttachmentSpec; 2] {
    [
        AttachmentSpec::color("HDR Color", HDR_FORMAT, wgpu::FilterMode::Linear),
        AttachmentSpec::color("HDR Bright Pass", HDR_FORMAT, wgpu::FilterMode::Linear)
            .with_usage(wgpu::TextureUsages::COPY_SRC),
    ]
}

pub fn bloom_attachment(slot: usize) -> AttachmentSpec {
    let label = if slot == 0 { "Bloom Slot 0" } else { "Bloom Slot 1" };
    AttachmentSpec::color(label, HDR_FORMAT, wgpu::FilterMode::Linear)
        .with_usage(wgpu::TextureUsages::COPY_DST)
}

/// Every window-sized render target, resized together.
pub struct ResourceSet {
    pub gbuffer: RenderTarget,
    /// Lighting output; draws against the G-buffer's depth.
    pub hdr: RenderTarget,
    pub bloom: [RenderTarget; 2],
}

impl ResourceSet {
    pub fn initialize(device: &wgpu::Device, width: u32, height: u32) -> Result<Self, RenderError> {
        let gbuffer = RenderTarget::new(
            device,
            "G-Buffer",
            &gbuffer_attachments(),
            Some(AttachmentSpec::depth("G-Buffer Depth")),
            width,
            height,
        )?;
        let hdr = RenderTarget::new(device, "HDR Target", &hdr_attachments(), None, width, height)?;
        let bloom = [
            RenderTarget::new(device, "Bloom Ping", &[bloom_attachment(0)], None, width, height)?,
            RenderTarget::new(device, "Bloom Pong", &[bloom_attachment(1)], None, width, height)?,
        ];
        log::info!("Allocated render targets at {}x{}", width, height);
        Ok(Self { gbuffer, hdr, bloom })
    }

    /// Resize every tracked target. Returns whether anything was reallocated.
    ///
    /// All replacements are allocated before any target is swapped, so an
    /// error leaves every target at its previous size.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) -> Result<bool, RenderError> {
        let changed = replace_all(
            &mut self.targets_mut(),
            |target| target.prepare_resize(device, width, height),
            RenderTarget::apply_resize,
        )?;
        if changed {
            log::info!("Resized render targets to {}x{}", width, height);
        }
        Ok(changed)
    }

    pub fn size(&self) -> (u32, u32) {
        self.gbuffer.size()
    }

    pub fn targets(&self) -> [&RenderTarget; 4] {
        [&self.gbuffer, &self.hdr, &self.bloom[0], &self.bloom[1]]
    }

    fn targets_mut(&mut self) -> [&mut RenderTarget; 4] {
        let [ping, pong] = &mut self.bloom;
        [&mut self.gbuffer, &mut self.hdr, ping, pong]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::test_gpu;

    fn limits_with_bytes(bytes: u32) -> wgpu::Limits {
        wgpu::Limits {
            max_color_attachment_bytes_per_sample: bytes,
            ..wgpu::Limits::default()
        }
    }

    #[test]
    fn gbuffer_exceeds_webgpu_default_byte_budget() {
        let cost = color_bytes_per_sample(gbuffer_attachments().iter().map(|s| s.format)).unwrap();
        assert!(cost > wgpu::Limits::default().max_color_attachment_bytes_per_sample);
    }

    #[test]
    fn completeness_rejects_byte_budget_overflow() {
        let colors = gbuffer_attachments();
        let depth = AttachmentSpec::depth("depth");
        let result = check_completeness(&limits_with_bytes(0), "gbuffer", &colors, Some(&depth), 64, 64);
        assert!(matches!(result, Err(RenderError::IncompleteTarget { .. })));

        let result = check_completeness(&limits_with_bytes(128), "gbuffer", &colors, Some(&depth), 64, 64);
        assert!(result.is_ok());
    }

    #[test]
    fn completeness_rejects_zero_and_oversized_dimensions() {
        let colors = hdr_attachments();
        let limits = wgpu::Limits::default();
        assert!(check_completeness(&limits, "hdr", &colors, None, 0, 10).is_err());
        assert!(check_completeness(&limits, "hdr", &colors, None, 10, 0).is_err());
        let too_big = limits.max_texture_dimension_2d + 1;
        assert!(check_completeness(&limits, "hdr", &colors, None, too_big, 10).is_err());
        assert!(check_completeness(&limits, "hdr", &colors, None, 1280, 720).is_ok());
    }

    #[test]
    fn completeness_rejects_misplaced_depth_formats() {
        let limits = wgpu::Limits::default();
        let depth_as_color = [AttachmentSpec::depth("depth")];
        assert!(check_completeness(&limits, "bad", &depth_as_color, None, 4, 4).is_err());

        let color = AttachmentSpec::color("color", HDR_FORMAT, wgpu::FilterMode::Linear);
        assert!(check_completeness(&limits, "bad", &[], Some(&color), 4, 4).is_err());
        assert!(check_completeness(&limits, "empty", &[], None, 4, 4).is_err());
    }

    #[test]
    fn completeness_rejects_too_many_attachments() {
        let limits = wgpu::Limits {
            max_color_attachments: 4,
            max_color_attachment_bytes_per_sample: 128,
            ..wgpu::Limits::default()
        };
        assert!(check_completeness(&limits, "gbuffer", &gbuffer_attachments(), None, 4, 4).is_err());
    }

    #[test]
    fn copy_usages_follow_pass_roles() {
        let [_, bright] = hdr_attachments();
        assert!(bright.usage().contains(wgpu::TextureUsages::COPY_SRC));
        assert!(bloom_attachment(0).usage().contains(wgpu::TextureUsages::COPY_DST));
        assert!(bloom_attachment(1).usage().contains(wgpu::TextureUsages::TEXTURE_BINDING));
    }

    fn snapshot(set: &ResourceSet) -> Vec<(wgpu::TextureFormat, wgpu::FilterMode, wgpu::TextureUsages)> {
        set.targets()
            .iter()
            .flat_map(|t| t.colors().iter().chain(t.depth()))
            .map(|a| (a.texture.format(), a.spec.filter, a.texture.usage()))
            .collect()
    }

    #[test]
    fn resize_round_trip_preserves_formats_and_filters() {
        let Some(gpu) = test_gpu(4, 4) else { return };
        let mut set = match ResourceSet::initialize(&gpu.device, 1280, 720) {
            Ok(set) => set,
            Err(e) => {
                eprintln!("skipping: {e}");
                return;
            }
        };
        let before = snapshot(&set);

        assert!(set.resize(&gpu.device, 640, 360).unwrap());
        for target in set.targets() {
            assert_eq!(target.size(), (640, 360));
            assert!(target.is_consistent());
        }

        assert!(set.resize(&gpu.device, 1280, 720).unwrap());
        for target in set.targets() {
            assert_eq!(target.size(), (1280, 720));
            assert!(target.is_consistent());
            for attachment in target.colors() {
                assert_eq!(attachment.size(), (1280, 720));
            }
        }
        assert_eq!(snapshot(&set), before);
    }

    #[test]
    fn resize_is_idempotent_and_ignores_zero() {
        let Some(gpu) = test_gpu(4, 4) else { return };
        let mut set = match ResourceSet::initialize(&gpu.device, 320, 240) {
            Ok(set) => set,
            Err(e) => {
                eprintln!("skipping: {e}");
                return;
            }
        };
        assert!(!set.resize(&gpu.device, 320, 240).unwrap());
        assert!(!set.resize(&gpu.device, 0, 240).unwrap());
        assert_eq!(set.size(), (320, 240));
    }

    /// Stand-in for a render target: just the recorded size.
    struct Slot {
        size: (u32, u32),
    }

    fn resize_slots(slots: &mut [Slot], size: (u32, u32), fail_at: Option<usize>) -> Result<bool, RenderError> {
        let mut refs: Vec<&mut Slot> = slots.iter_mut().collect();
        let mut index = 0;
        replace_all(
            &mut refs,
            |slot| {
                let current = index;
                index += 1;
                if fail_at == Some(current) {
                    return Err(RenderError::IncompleteTarget {
                        target: format!("slot {current}"),
                        reason: "allocation failed".into(),
                    });
                }
                Ok((slot.size != size).then_some(size))
            },
            |slot, size| slot.size = size,
        )
    }

    #[test]
    fn failed_resize_leaves_every_target_unchanged() {
        let mut slots: Vec<Slot> = (0..4).map(|_| Slot { size: (1280, 720) }).collect();
        let result = resize_slots(&mut slots, (640, 360), Some(1));
        assert!(matches!(result, Err(RenderError::IncompleteTarget { .. })));
        assert!(slots.iter().all(|slot| slot.size == (1280, 720)));

        // The last slot failing must not leave the first three resized either
        assert!(resize_slots(&mut slots, (640, 360), Some(3)).is_err());
        assert!(slots.iter().all(|slot| slot.size == (1280, 720)));
    }

    #[test]
    fn successful_resize_moves_every_target_together() {
        let mut slots: Vec<Slot> = (0..4).map(|_| Slot { size: (1280, 720) }).collect();
        assert!(resize_slots(&mut slots, (640, 360), None).unwrap());
        assert!(slots.iter().all(|slot| slot.size == (640, 360)));
        assert!(!resize_slots(&mut slots, (640, 360), None).unwrap());
    }
}
