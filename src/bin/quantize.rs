use anyhow::{Context, Result, bail};
use clap::Parser;
use rustc_hash::FxHashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use kmeans_palette_wasm::{AssignMode, Backend, CpuBackend, GpuContext, Params, quantize_bytes};

/// Reduce images to a k-color palette with box-split seeded k-means.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Input image paths; falls back to `imgPath` from --params
    inputs: Vec<PathBuf>,

    /// JSON params file (camelCase keys); flags below override it
    #[arg(long)]
    params: Option<PathBuf>,

    /// Number of palette colors
    #[arg(short = 'k', long)]
    k: Option<u32>,

    /// Lloyd iterations after box-split initialization
    #[arg(short = 'i', long)]
    iterations: Option<u32>,

    /// Assign workgroup size as X,Y
    #[arg(short = 'w', long, value_delimiter = ',', num_args = 2)]
    workgroup_size: Option<Vec<u32>>,

    /// Cluster distinct colors weighted by frequency instead of every pixel
    #[arg(short = 'u', long)]
    unique_colors: bool,

    /// Shrink so the longest side equals this before clustering
    #[arg(short = 's', long)]
    downscale: Option<u32>,

    /// Output directory
    #[arg(short = 'd', long)]
    out_dir: Option<PathBuf>,

    /// Output filename prefix (ignored when --out-dir supplied)
    #[arg(short = 'p', long, default_value = "quantized_")]
    prefix: String,

    /// Also write the palette as JSON next to each image
    #[arg(short = 'r', long)]
    report: bool,

    /// Run the kernels on the CPU instead of the GPU
    #[arg(long)]
    cpu: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn resolve_params(&self) -> Result<Params> {
        let mut params = match &self.params {
            Some(path) => Params::load(path)
                .with_context(|| format!("loading params from {}", path.display()))?,
            None => Params::default(),
        };
        if let Some(k) = self.k {
            params.k = k;
        }
        if let Some(iterations) = self.iterations {
            params.iterations = iterations;
        }
        if let Some(size) = &self.workgroup_size {
            let [x, y] = size.as_slice() else {
                bail!("--workgroup-size takes exactly two values");
            };
            params.workgroup_size = [*x, *y];
        }
        if self.unique_colors {
            params.mode = AssignMode::UniqueColors;
        }
        if self.downscale.is_some() {
            params.downscale = self.downscale;
        }
        params.validate()?;
        Ok(params)
    }

    fn out_path(&self, input: &Path) -> PathBuf {
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        match &self.out_dir {
            Some(dir) => dir.join(format!("{stem}.png")),
            None => PathBuf::from(format!("{}{stem}.png", self.prefix)),
        }
    }

    /// Output path of every input. An input whose path was already claimed
    /// by an earlier one gets an error instead of overwriting it.
    fn plan_outputs(&self, inputs: &[PathBuf]) -> Vec<Result<PathBuf>> {
        let mut claimed = FxHashSet::default();
        inputs
            .iter()
            .map(|input| {
                let out = self.out_path(input);
                if claimed.insert(out.clone()) {
                    Ok(out)
                } else {
                    Err(anyhow::anyhow!(
                        "output {} is already written by an earlier input",
                        out.display()
                    ))
                }
            })
            .collect()
    }

    fn backend(&self) -> Box<dyn Backend> {
        if self.cpu {
            return Box::new(CpuBackend);
        }
        match GpuContext::new_blocking() {
            Ok(ctx) => {
                info!(adapter = ctx.adapter_name(), "using GPU");
                Box::new(ctx)
            }
            Err(err) => {
                warn!("{err}; falling back to the CPU kernels");
                Box::new(CpuBackend)
            }
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn process(
    backend: &mut dyn Backend,
    args: &Args,
    params: &Params,
    input: &Path,
    out_path: PathBuf,
) -> Result<PathBuf> {
    let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let out = quantize_bytes(backend, &bytes, params).context("quantization failed")?;

    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&out_path, &out.png)?;
    if args.report {
        let report_path = out_path.with_extension("json");
        fs::write(&report_path, serde_json::to_string_pretty(&out.palette)?)?;
    }
    info!(
        input = %input.display(),
        colors = out.palette.len(),
        backend = backend.name(),
        "quantized"
    );
    Ok(out_path)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let params = args.resolve_params()?;

    let inputs: Vec<PathBuf> = if args.inputs.is_empty() {
        params.img_path.iter().cloned().collect()
    } else {
        args.inputs.clone()
    };
    if inputs.is_empty() {
        bail!("no input images given and no imgPath in params");
    }

    let mut backend = args.backend();
    let mut failed = 0usize;
    for (input, planned) in inputs.iter().zip(args.plan_outputs(&inputs)) {
        let result = planned.and_then(|out_path| process(backend.as_mut(), &args, &params, input, out_path));
        match result {
            Ok(out_path) => println!("Saved → {}", out_path.display()),
            Err(err) => {
                error!(input = %input.display(), "{err:#}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} images failed", inputs.len());
    }
    Ok(())
}
