// Command-line configuration and the live settings derived from it.

use std::path::PathBuf;

use clap::Parser;
use glam::Vec3;

use super::filter::FilterKind;
use super::layout::{SamplerSettings, TextureFilter};
use super::methods::Method;
use super::procedural::GeneratorOptions;
use super::sampler::RoundingRule;

/// Renders a Ptex-textured mesh with several GPU sampling methods and a CPU
/// reference, and compares them.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Quad-only OBJ mesh. Without it a cube sphere is generated.
    #[arg(long)]
    pub mesh: Option<PathBuf>,

    /// Cube-sphere cells per cube edge.
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..=64))]
    pub subdivisions: u32,

    /// Smallest per-face texture size, as log2 texels.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(0..=12))]
    pub min_res_log2: u8,

    /// Largest per-face texture size, as log2 texels.
    #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u8).range(0..=12))]
    pub max_res_log2: u8,

    /// Channels of the generated asset.
    #[arg(long, default_value_t = 4, value_parser = parse_channels)]
    pub channels: usize,

    #[arg(long, value_enum, default_value_t = Method::Nvidia)]
    pub method: Method,

    /// GPU sampler magnification and minification filter.
    #[arg(long, value_enum, default_value_t = TextureFilter::Linear)]
    pub filter: TextureFilter,

    /// Maximum anisotropy of the GPU samplers. Ignored with `--filter nearest`.
    #[arg(long, default_value_t = 16)]
    pub anisotropy: u16,

    /// Filter used by the CPU reference.
    #[arg(long, value_enum, default_value_t = FilterKind::Bilinear)]
    pub cpu_filter: FilterKind,

    /// Float to 8-bit conversion of CPU images.
    #[arg(long, value_enum, default_value_t = RoundingRule::Round)]
    pub rounding: RoundingRule,

    /// Keep dv/dx and du/dy when filtering on the CPU.
    #[arg(long)]
    pub cross_derivatives: bool,

    /// Where screenshots and raw image dumps go.
    #[arg(long, default_value = "captures")]
    pub output_dir: PathBuf,

    /// Binary viewpoint list, loaded at startup and written by `S`.
    #[arg(long)]
    pub viewpoints: Option<PathBuf>,

    /// Clear colour as `R,G,B` in [0, 1].
    #[arg(long, default_value = "0.1,0.1,0.15", value_parser = parse_color)]
    pub background: Vec3,
}

impl Args {
    pub fn generator_options(&self) -> GeneratorOptions {
        let min = self.min_res_log2.min(self.max_res_log2);
        GeneratorOptions {
            min_res_log2: min,
            max_res_log2: self.max_res_log2.max(min),
            channels: self.channels,
            ..GeneratorOptions::default()
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            method: self.method,
            background: self.background,
            cross_derivatives: self.cross_derivatives,
            rounding: self.rounding,
            cpu_filter: self.cpu_filter,
            sampler: SamplerSettings {
                filter: self.filter,
                anisotropy: self.anisotropy,
            },
        }
    }
}

fn parse_channels(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(n @ (1 | 3 | 4)) => Ok(n),
        Ok(n) => Err(format!("{n} channels unsupported, expected 1, 3 or 4")),
        Err(e) => Err(e.to_string()),
    }
}

/// `"R,G,B"` with each component in [0, 1].
pub fn parse_color(s: &str) -> Result<Vec3, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f32>().map_err(|e| format!("{p:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    let [r, g, b] = parts[..] else {
        return Err(format!("expected R,G,B, got {} components", parts.len()));
    };
    let color = Vec3::new(r, g, b);
    if color.cmplt(Vec3::ZERO).any() || color.cmpgt(Vec3::ONE).any() {
        return Err(format!("colour components must be in [0, 1], got {s}"));
    }
    Ok(color)
}

/// Settings shared by every strategy. The overlay edits the method, the CPU
/// filter, the rounding rule and the derivative flag at runtime; sampler
/// settings are fixed once the samplers exist.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    pub method:            Method,
    pub background:        Vec3,
    pub cross_derivatives: bool,
    pub rounding:          RoundingRule,
    pub cpu_filter:        FilterKind,
    pub sampler:           SamplerSettings,
}

impl Settings {
    pub fn clear_color(&self) -> wgpu::Color {
        wgpu::Color {
            r: self.background.x as f64,
            g: self.background.y as f64,
            b: self.background.z as f64,
            a: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let args = Args::parse_from(["ptex_methods"]);
        assert_eq!(args.subdivisions, 4);
        assert_eq!((args.min_res_log2, args.max_res_log2), (3, 6));
        assert_eq!(args.channels, 4);
        assert_eq!(args.method, Method::Nvidia);
        assert_eq!(args.filter, TextureFilter::Linear);
        assert_eq!(args.anisotropy, 16);
        assert_eq!(args.cpu_filter, FilterKind::Bilinear);
        assert_eq!(args.rounding, RoundingRule::Round);
        assert!(!args.cross_derivatives);
        assert_eq!(args.output_dir, PathBuf::from("captures"));
        assert_eq!(args.background, Vec3::new(0.1, 0.1, 0.15));
    }

    #[test]
    fn parses_every_method_name() {
        for (name, method) in [
            ("cpu", Method::Cpu),
            ("nvidia", Method::Nvidia),
            ("intel", Method::Intel),
            ("hybrid", Method::Hybrid),
            ("reduced-traverse", Method::ReducedTraverse),
        ] {
            let args = Args::parse_from(["ptex_methods", "--method", name]);
            assert_eq!(args.method, method);
        }
    }

    #[test]
    fn rejects_unsupported_channel_counts() {
        assert!(Args::try_parse_from(["ptex_methods", "--channels", "2"]).is_err());
        let args = Args::parse_from(["ptex_methods", "--channels", "1"]);
        assert_eq!(args.channels, 1);
    }

    #[test]
    fn background_colour_parsing() {
        assert_eq!(parse_color("1, 0.5,0").unwrap(), Vec3::new(1.0, 0.5, 0.0));
        assert!(parse_color("1,0").is_err());
        assert!(parse_color("1,0,x").is_err());
        assert!(parse_color("2,0,0").is_err());
    }

    #[test]
    fn inverted_resolution_range_is_ordered() {
        let args = Args::parse_from(["ptex_methods", "--min-res-log2", "7", "--max-res-log2", "4"]);
        let opts = args.generator_options();
        assert!(opts.min_res_log2 <= opts.max_res_log2);
    }

    #[test]
    fn settings_carry_sampler_choice() {
        let args = Args::parse_from(["ptex_methods", "--filter", "nearest", "--anisotropy", "8"]);
        let settings = args.settings();
        assert_eq!(settings.sampler.filter, TextureFilter::Nearest);
        assert_eq!(settings.sampler.effective_anisotropy(), 1);
    }
}
