// CLI entry for mstseg
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum, ValueHint};
use mstseg_lib::image_io::{self, LoadedImage, SegmentationReport};
use mstseg_lib::{
    segment, ColorSpace, MstSegmenter, SegmentationConfig, SegmentationParams, ThresholdSetting,
};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorSpaceArg {
    Rgb,
    Lab,
}

impl From<ColorSpaceArg> for ColorSpace {
    fn from(value: ColorSpaceArg) -> Self {
        match value {
            ColorSpaceArg::Rgb => ColorSpace::Rgb,
            ColorSpaceArg::Lab => ColorSpace::Lab,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "mstseg", version, about = "Minimum spanning tree image segmentation")]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(short = 'c', long = "config", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Pixel connectivity (4 or 8)
    #[arg(long = "connectivity")]
    connectivity: Option<u8>,
    /// Color distance weight
    #[arg(long = "alpha")]
    alpha: Option<f64>,
    /// Spatial distance weight
    #[arg(long = "beta")]
    beta: Option<f64>,
    /// Cut threshold: a number, auto, median, infinity or pNN
    #[arg(short = 't', long = "threshold")]
    threshold: Option<ThresholdSetting>,
    /// Regions smaller than this are merged (0 disables)
    #[arg(short = 'm', long = "min-region-size")]
    min_region_size: Option<i64>,
    /// Cap on size-ordered merges before the forced pass
    #[arg(long = "max-merges")]
    max_merges: Option<usize>,
    /// Color space distances are measured in
    #[arg(long = "color-space", value_enum)]
    color_space: Option<ColorSpaceArg>,
    /// Gaussian pre-smoothing sigma (0 disables)
    #[arg(long = "sigma")]
    smoothing_sigma: Option<f32>,
    /// Refuse images whose graph would need more bytes than this
    #[arg(long = "memory-limit")]
    memory_limit_bytes: Option<usize>,

    /// Also write this many hierarchy levels per image
    #[arg(long = "levels")]
    levels: Option<usize>,
    /// Skip the JSON report
    #[arg(long = "no-report", action = ArgAction::SetTrue)]
    no_report: bool,
    /// Output directory (defaults to each input's directory)
    #[arg(short = 'o', long = "output-dir", value_hint = ValueHint::DirPath)]
    output_dir: Option<PathBuf>,

    /// Input images
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,
}

fn build_config(cli: &Cli) -> Result<SegmentationConfig> {
    let mut cfg = match &cli.config {
        Some(path) => SegmentationConfig::load(path)?,
        None => SegmentationConfig::default(),
    };
    if let Some(v) = cli.connectivity { cfg.connectivity = v; }
    if let Some(v) = cli.alpha { cfg.alpha = v; }
    if let Some(v) = cli.beta { cfg.beta = v; }
    if let Some(v) = &cli.threshold { cfg.threshold = v.clone(); }
    if let Some(v) = cli.min_region_size { cfg.min_region_size = v; }
    if let Some(v) = cli.max_merges { cfg.max_merges = Some(v); }
    if let Some(v) = cli.color_space { cfg.color_space = v.into(); }
    if let Some(v) = cli.smoothing_sigma { cfg.smoothing_sigma = v; }
    if let Some(v) = cli.memory_limit_bytes { cfg.memory_limit_bytes = Some(v); }
    Ok(cfg)
}

fn output_path(cli: &Cli, input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let dir = cli
        .output_dir
        .clone()
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{}_{}", stem, suffix))
}

fn process_one(
    cli: &Cli,
    cfg: &SegmentationConfig,
    params: &SegmentationParams,
    input: &Path,
) -> Result<usize> {
    let started = Instant::now();
    let LoadedImage { rgb, buffer } =
        image_io::load_image(input, cfg.color_space, cfg.smoothing_sigma)?;

    let name = input.display().to_string();
    let listener = |stage: &str, fraction: f32| {
        log::info!("[{}] {} ({:.0}%)", name, stage, fraction * 100.0);
    };
    let result = segment(&buffer, params, Some(&listener), None)
        .with_context(|| format!("segmenting {}", name))?;

    let png = output_path(cli, input, "segments.png");
    image_io::save_colorized(&result, &rgb, &png)?;
    if !cli.no_report {
        let report = SegmentationReport::new(input, &result, &buffer)?;
        image_io::save_report(&report, &output_path(cli, input, "report.json"))?;
    }

    if let Some(levels) = cli.levels {
        let segmenter = MstSegmenter::new(params.clone());
        let hierarchy = segmenter
            .segment_hierarchy(&buffer, levels)
            .with_context(|| format!("building hierarchy for {}", name))?;
        for (i, level) in hierarchy.iter().enumerate() {
            let path = output_path(cli, input, &format!("level{}.png", i));
            image_io::save_colorized(level, &rgb, &path)?;
            log::info!(
                "[{}] level {} threshold {:.4}: {} regions",
                name,
                i,
                level.threshold(),
                level.region_count()
            );
        }
    }

    println!(
        "{}: {} regions, threshold {:.4}, {} merges, {}ms -> {}",
        name,
        result.region_count(),
        result.threshold(),
        result.merges_performed(),
        started.elapsed().as_millis(),
        png.display()
    );
    Ok(result.region_count())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let cfg = build_config(&cli)?;
    let params = cfg.clone().into_params().context("invalid segmentation parameters")?;

    if let Some(dir) = &cli.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    let outcomes: Vec<(PathBuf, Result<usize>)> = cli
        .inputs
        .par_iter()
        .map(|input| (input.clone(), process_one(&cli, &cfg, &params, input)))
        .collect();

    let mut failures = 0usize;
    for (input, outcome) in outcomes {
        if let Err(err) = outcome {
            failures += 1;
            eprintln!("{}: {:#}", input.display(), err);
        }
    }
    if failures > 0 {
        bail!("{} of {} images failed", failures, cli.inputs.len());
    }
    Ok(())
}
