use bitflags::bitflags;
use num_enum::TryFromPrimitive;

use crate::Error;

/// The color profile a codec context operates in.
///
/// The profile decides how texel data is represented internally (UNORM vs.
/// log-encoded HDR), which endpoint formats the compressor may pick, and what
/// an error block decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum Profile {
    /// LDR color data in linear space.
    Ldr = 0,
    /// LDR color data with sRGB conversion on load/store.
    LdrSrgb = 1,
    /// HDR RGB channels with an LDR alpha channel.
    HdrRgbLdrA = 2,
    /// HDR data in all four channels.
    Hdr = 3,
}

impl Profile {
    /// Whether the RGB channels use the HDR (log-encoded) representation.
    pub const fn is_hdr(self) -> bool {
        matches!(self, Profile::HdrRgbLdrA | Profile::Hdr)
    }

    /// Whether the alpha channel uses the HDR representation.
    pub const fn is_hdr_alpha(self) -> bool {
        matches!(self, Profile::Hdr)
    }
}

/// The trade-off between compression speed and quality.
///
/// Presets only tune how hard the compressor searches; they never change the
/// bitstream format, and every preset produces data any ASTC decoder can
/// read. `Exhaustive` can be orders of magnitude slower than `Fastest` while
/// gaining less than a dB of PSNR on typical content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Preset {
    Fastest,
    Fast,
    #[default]
    Medium,
    Thorough,
    Exhaustive,
}

bitflags! {
    /// Optional behaviors of a compression context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u32 {
        /// Scale RGB error weights by the local alpha average, so opaque
        /// texels keep the most accuracy.
        const USE_ALPHA_WEIGHT = 1 << 0;
        /// Weight errors by inverse local variance for perceptually flatter
        /// results on smooth content.
        const USE_PERCEPTUAL = 1 << 1;
        /// Treat the input as an X+Y normal map stored in L+A form.
        const MAP_NORMAL = 1 << 2;
        /// Treat the input as RGBM-packed HDR data.
        const MAP_RGBM = 1 << 3;
    }
}

/// A codec configuration: profile, block footprint, quality preset and the
/// tuning knobs derived from them.
///
/// Build one with [`Config::new`] and hand it to [`Context::new`]; the
/// context copies the configuration and is immutable afterwards.
///
/// [`Context::new`]: crate::Context::new
#[derive(Debug, Clone)]
pub struct Config {
    pub profile: Profile,
    pub flags: Flags,
    /// Block footprint in texels. `block_z == 1` selects a 2D block.
    pub block_x: u32,
    pub block_y: u32,
    pub block_z: u32,
    /// Per-channel error weights applied during compression.
    pub cw_r_weight: f32,
    pub cw_g_weight: f32,
    pub cw_b_weight: f32,
    pub cw_a_weight: f32,
    /// Additional error weight for texels near block edges; 0 disables
    /// deblocking.
    pub b_deblock_weight: f32,
    /// Kernel radius for the averages/variances pre-pass, in texels.
    pub v_rgba_radius: u32,
    /// Kernel radius for the alpha-average pre-pass, in texels.
    pub a_scale_radius: u32,
    /// RGBM maximum-value scale factor, used with [`Flags::MAP_RGBM`].
    pub rgbm_m_scale: f32,

    // Search tuning, derived from the preset.
    pub(crate) tune_partition_limit: u32,
    pub(crate) tune_block_mode_limit: f32,
    pub(crate) tune_refinement_limit: u32,
    pub(crate) tune_candidate_limit: u32,
    pub(crate) tune_db_limit: f32,
    pub(crate) tune_partition_early_limit: f32,
    pub(crate) tune_two_plane_early_limit: f32,
}

impl Config {
    /// Creates a configuration for the given profile, block footprint and
    /// quality preset.
    ///
    /// Returns [`Error::BadBlockSize`] unless the footprint is one of the
    /// block sizes the ASTC format defines.
    pub fn new(
        profile: Profile,
        block_x: u32,
        block_y: u32,
        block_z: u32,
        preset: Preset,
    ) -> Result<Self, Error> {
        let legal = if block_z <= 1 {
            is_legal_2d_block_size(block_x, block_y)
        } else {
            is_legal_3d_block_size(block_x, block_y, block_z)
        };
        if !legal {
            return Err(Error::BadBlockSize(block_x, block_y, block_z));
        }

        let texel_count = (block_x * block_y * block_z) as f32;
        // dB limits follow block bitrate: bigger blocks cannot hit the same
        // PSNR targets, so the early-out threshold drops with texel count.
        let db_adjust = 10.0 * (texel_count / 16.0).log10();

        let (partition_limit, mode_limit, refine, candidates, db, part_early, plane2_early) =
            match preset {
                Preset::Fastest => (4, 0.25, 2, 2, 70.0, 1.0, 0.5),
                Preset::Fast => (8, 0.5, 3, 2, 85.0, 1.0, 0.5),
                Preset::Medium => (25, 0.75, 3, 3, 95.0, 1.2, 0.75),
                Preset::Thorough => (100, 0.95, 4, 4, 105.0, 2.5, 0.95),
                Preset::Exhaustive => (1024, 1.0, 4, 4, 999.0, 10.0, 0.99),
            };

        Ok(Self {
            profile,
            flags: Flags::empty(),
            block_x,
            block_y,
            block_z: block_z.max(1),
            cw_r_weight: 1.0,
            cw_g_weight: 1.0,
            cw_b_weight: 1.0,
            cw_a_weight: 1.0,
            b_deblock_weight: 0.0,
            v_rgba_radius: 0,
            a_scale_radius: 0,
            rgbm_m_scale: 0.0,
            tune_partition_limit: partition_limit,
            tune_block_mode_limit: mode_limit,
            tune_refinement_limit: refine,
            tune_candidate_limit: candidates,
            tune_db_limit: (db - db_adjust).max(40.0),
            tune_partition_early_limit: part_early,
            tune_two_plane_early_limit: plane2_early,
        })
    }

    /// Checks invariants that involve more than one field.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.cw_r_weight < 0.0
            || self.cw_g_weight < 0.0
            || self.cw_b_weight < 0.0
            || self.cw_a_weight < 0.0
        {
            return Err(Error::BadParam("channel weights must be non-negative"));
        }
        if self.cw_r_weight + self.cw_g_weight + self.cw_b_weight + self.cw_a_weight <= 0.0 {
            return Err(Error::BadParam("at least one channel weight must be positive"));
        }
        if self.b_deblock_weight < 0.0 {
            return Err(Error::BadParam("deblock weight must be non-negative"));
        }
        if self.flags.contains(Flags::MAP_RGBM) && self.rgbm_m_scale <= 0.0 {
            return Err(Error::BadParam("RGBM mode requires a positive M scale"));
        }
        if self.flags.contains(Flags::MAP_RGBM) && self.profile.is_hdr() {
            return Err(Error::BadProfile);
        }
        Ok(())
    }

    pub(crate) fn texel_count(&self) -> u32 {
        self.block_x * self.block_y * self.block_z
    }
}

/// The 2D block footprints the ASTC format defines.
const LEGAL_2D_BLOCK_SIZES: &[(u32, u32)] = &[
    (4, 4),
    (5, 4),
    (5, 5),
    (6, 5),
    (6, 6),
    (8, 5),
    (8, 6),
    (8, 8),
    (10, 5),
    (10, 6),
    (10, 8),
    (10, 10),
    (12, 10),
    (12, 12),
];

/// The 3D block footprints the ASTC format defines.
const LEGAL_3D_BLOCK_SIZES: &[(u32, u32, u32)] = &[
    (3, 3, 3),
    (4, 3, 3),
    (4, 4, 3),
    (4, 4, 4),
    (5, 4, 4),
    (5, 5, 4),
    (5, 5, 5),
    (6, 5, 5),
    (6, 6, 5),
    (6, 6, 6),
];

/// Queries if a 2D block size is a legal ASTC footprint.
pub fn is_legal_2d_block_size(x: u32, y: u32) -> bool {
    LEGAL_2D_BLOCK_SIZES.contains(&(x, y))
}

/// Queries if a 3D block size is a legal ASTC footprint.
pub fn is_legal_3d_block_size(x: u32, y: u32, z: u32) -> bool {
    LEGAL_3D_BLOCK_SIZES.contains(&(x, y, z))
}

/// A component selector for [`Swizzle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwizzleComponent {
    /// Select the red component of the source.
    R,
    /// Select the green component of the source.
    G,
    /// Select the blue component of the source.
    B,
    /// Select the alpha component of the source.
    A,
    /// The constant 0.
    Zero,
    /// The constant 1.
    One,
    /// Reconstruct a unit-vector Z from the X and Y in R and A
    /// (decompression only).
    Z,
}

/// Maps input components onto the RGBA channels the codec works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Swizzle {
    pub r: SwizzleComponent,
    pub g: SwizzleComponent,
    pub b: SwizzleComponent,
    pub a: SwizzleComponent,
}

impl Swizzle {
    /// The identity mapping.
    pub const RGBA: Swizzle = Swizzle {
        r: SwizzleComponent::R,
        g: SwizzleComponent::G,
        b: SwizzleComponent::B,
        a: SwizzleComponent::A,
    };

    /// RGB with an opaque alpha.
    pub const RGB1: Swizzle = Swizzle {
        r: SwizzleComponent::R,
        g: SwizzleComponent::G,
        b: SwizzleComponent::B,
        a: SwizzleComponent::One,
    };

    pub(crate) fn validate(&self, decompressing: bool) -> Result<(), Error> {
        // Z reconstruction only makes sense when writing decoded texels.
        let has_z = [self.r, self.g, self.b, self.a]
            .iter()
            .any(|&c| c == SwizzleComponent::Z);
        if has_z && !decompressing {
            return Err(Error::BadSwizzle);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_block_sizes() {
        assert!(is_legal_2d_block_size(4, 4));
        assert!(is_legal_2d_block_size(12, 12));
        assert!(!is_legal_2d_block_size(4, 5));
        assert!(!is_legal_2d_block_size(7, 7));
        assert!(is_legal_3d_block_size(3, 3, 3));
        assert!(is_legal_3d_block_size(6, 6, 6));
        assert!(!is_legal_3d_block_size(6, 6, 4));
    }

    #[test]
    fn bad_block_size_is_rejected() {
        let err = Config::new(Profile::Ldr, 7, 7, 1, Preset::Medium).unwrap_err();
        assert_eq!(err, Error::BadBlockSize(7, 7, 1));
    }

    #[test]
    fn swizzle_z_only_for_decompression() {
        let swz = Swizzle {
            r: SwizzleComponent::R,
            g: SwizzleComponent::G,
            b: SwizzleComponent::Z,
            a: SwizzleComponent::One,
        };
        assert!(swz.validate(true).is_ok());
        assert!(swz.validate(false).is_err());
    }
}
