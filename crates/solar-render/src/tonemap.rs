//! Tone-mapping operators
//!
//! The composite shader switches on [`ToneMapOperator::as_u32`]; the
//! discriminants below must stay in the order of that switch. `apply` is
//! the CPU mirror of the shader code and is what the tests exercise.

use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum ToneMapOperator {
    Exposure = 0,
    Reinhard = 1,
    Reinhard2 = 2,
    Filmic = 3,
    AcesFilmic = 4,
    Lottes = 5,
    Uchimura = 6,
    Uncharted2 = 7,
    Unreal = 8,
    #[default]
    None = 9,
}

impl ToneMapOperator {
    pub const ALL: [ToneMapOperator; 10] = [
        Self::Exposure,
        Self::Reinhard,
        Self::Reinhard2,
        Self::Filmic,
        Self::AcesFilmic,
        Self::Lottes,
        Self::Uchimura,
        Self::Uncharted2,
        Self::Unreal,
        Self::None,
    ];

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Display name for the settings UI
    pub fn label(self) -> &'static str {
        match self {
            Self::Exposure => "Exposure",
            Self::Reinhard => "Reinhard",
            Self::Reinhard2 => "Reinhard 2",
            Self::Filmic => "Filmic",
            Self::AcesFilmic => "ACES Filmic",
            Self::Lottes => "Lottes",
            Self::Uchimura => "Uchimura",
            Self::Uncharted2 => "Uncharted 2",
            Self::Unreal => "Unreal",
            Self::None => "NONE",
        }
    }

    /// Identifier used in configuration files
    pub fn name(self) -> &'static str {
        match self {
            Self::Exposure => "exposure",
            Self::Reinhard => "reinhard",
            Self::Reinhard2 => "reinhard2",
            Self::Filmic => "filmic",
            Self::AcesFilmic => "aces_filmic",
            Self::Lottes => "lottes",
            Self::Uchimura => "uchimura",
            Self::Uncharted2 => "uncharted2",
            Self::Unreal => "unreal",
            Self::None => "none",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    /// Only the exposure operator reads the exposure value.
    pub fn uses_exposure(self) -> bool {
        self == Self::Exposure
    }

    /// Map linear HDR color to display range.
    pub fn apply(self, color: Vec3, exposure: f32) -> Vec3 {
        match self {
            Self::Exposure => Vec3::ONE - (-color * exposure).exp(),
            Self::Reinhard => color / (Vec3::ONE + color),
            Self::Reinhard2 => {
                const L_WHITE: f32 = 4.0;
                color * (Vec3::ONE + color / (L_WHITE * L_WHITE)) / (Vec3::ONE + color)
            }
            Self::Filmic => {
                let x = (color - Vec3::splat(0.004)).max(Vec3::ZERO);
                let r = (x * (6.2 * x + 0.5)) / (x * (6.2 * x + 1.7) + 0.06);
                r.powf(2.2)
            }
            Self::AcesFilmic => {
                let (a, b, c, d, e) = (2.51, 0.03, 2.43, 0.59, 0.14);
                ((color * (a * color + b)) / (color * (c * color + d) + e)).clamp(Vec3::ZERO, Vec3::ONE)
            }
            Self::Lottes => color.to_array().map(lottes).into(),
            Self::Uchimura => color.to_array().map(uchimura).into(),
            Self::Uncharted2 => {
                const W: f32 = 11.2;
                let white = uncharted2_partial(W);
                color.to_array().map(|c| uncharted2_partial(c * 2.0) / white).into()
            }
            Self::Unreal => (color / (color + Vec3::splat(0.155)) * 1.019).powf(2.2),
            Self::None => color.clamp(Vec3::ZERO, Vec3::ONE),
        }
    }
}

fn lottes(x: f32) -> f32 {
    let a = 1.6_f32;
    let d = 0.977_f32;
    let hdr_max = 8.0_f32;
    let mid_in = 0.18_f32;
    let mid_out = 0.267_f32;

    let denom = (hdr_max.powf(a * d) - mid_in.powf(a * d)) * mid_out;
    let b = (-mid_in.powf(a) + hdr_max.powf(a) * mid_out) / denom;
    let c = (hdr_max.powf(a * d) * mid_in.powf(a) - hdr_max.powf(a) * mid_in.powf(a * d) * mid_out) / denom;

    x.powf(a) / (x.powf(a * d) * b + c)
}

fn uchimura(x: f32) -> f32 {
    let (p, a, m, l, c, b) = (1.0_f32, 1.0_f32, 0.22_f32, 0.4_f32, 1.33_f32, 0.0_f32);

    let l0 = ((p - m) * l) / a;
    let s0 = m + l0;
    let s1 = m + a * l0;
    let c2 = (a * p) / (p - s1);
    let cp = -c2 / p;

    let w0 = 1.0 - smoothstep(0.0, m, x);
    let w2 = if x >= m + l0 { 1.0 } else { 0.0 };
    let w1 = 1.0 - w0 - w2;

    let t = m * (x / m).powf(c) + b;
    let s = p - (p - s1) * (cp * (x - s0)).exp();
    let linear = m + a * (x - m);

    t * w0 + linear * w1 + s * w2
}

fn uncharted2_partial(x: f32) -> f32 {
    let (a, b, c, d, e, f) = (0.15, 0.50, 0.10, 0.20, 0.02, 0.30);
    ((x * (a * x + c * b) + d * e) / (x * (a * x + b) + d * f)) - e / f
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_clamps_to_unit_range() {
        let out = ToneMapOperator::None.apply(Vec3::new(-1.0, 0.5, 7.0), 2.5);
        assert_eq!(out, Vec3::new(0.0, 0.5, 1.0));
    }

    #[test]
    fn exposure_is_monotonic_in_exposure() {
        let color = Vec3::new(0.2, 1.0, 4.0);
        let mut previous = Vec3::ZERO;
        for step in 0..=40 {
            let exposure = step as f32 * 0.25;
            let out = ToneMapOperator::Exposure.apply(color, exposure);
            assert!(out.cmpge(previous).all(), "exposure {exposure} decreased output");
            previous = out;
        }
    }

    #[test]
    fn only_exposure_operator_reads_exposure() {
        let color = Vec3::new(0.3, 1.5, 6.0);
        for op in ToneMapOperator::ALL {
            let low = op.apply(color, 0.5);
            let high = op.apply(color, 8.0);
            assert_eq!(low == high, !op.uses_exposure(), "{:?}", op);
        }
    }

    #[test]
    fn operators_are_pure() {
        let color = Vec3::new(0.7, 2.0, 12.0);
        for op in ToneMapOperator::ALL {
            assert_eq!(op.apply(color, 2.5), op.apply(color, 2.5));
        }
    }

    #[test]
    fn black_maps_to_black() {
        for op in ToneMapOperator::ALL {
            let out = op.apply(Vec3::ZERO, 2.5);
            assert!(out.abs().max_element() < 1e-3, "{:?} -> {:?}", op, out);
        }
    }

    #[test]
    fn brighter_input_never_maps_darker() {
        for op in ToneMapOperator::ALL {
            let mut previous = op.apply(Vec3::ZERO, 2.5).x;
            for step in 1..=80 {
                let out = op.apply(Vec3::splat(step as f32 * 0.1), 2.5).x;
                assert!(out + 1e-5 >= previous, "{:?} dips at {}", op, step as f32 * 0.1);
                previous = out;
            }
        }
    }

    #[test]
    fn compressive_operators_stay_below_white() {
        use ToneMapOperator::*;
        for op in [Exposure, Reinhard, AcesFilmic, None] {
            let out = op.apply(Vec3::splat(8.0), 2.5);
            assert!(out.max_element() <= 1.0 + 1e-5, "{:?} -> {:?}", op, out);
        }
    }

    #[test]
    fn indices_and_names_round_trip() {
        for (index, op) in ToneMapOperator::ALL.into_iter().enumerate() {
            assert_eq!(op.as_u32() as usize, index);
            assert_eq!(ToneMapOperator::from_index(index), Some(op));
            assert_eq!(ToneMapOperator::from_name(op.name()), Some(op));
        }
        assert_eq!(ToneMapOperator::default(), ToneMapOperator::None);
        assert_eq!(ToneMapOperator::from_name("ACES_Filmic"), Some(ToneMapOperator::AcesFilmic));
        assert_eq!(ToneMapOperator::from_name("hable"), None);
    }
}
