use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use fragility::{
    analyze,
    annotations::ChannelTable,
    io::{write_run, SignalFile},
    L2Penalty, NormalizeMode, PerturbationType, PipelineConfig, ReferenceScheme, SolveMethod,
};

#[derive(Parser)]
#[command(name = "fragility", about = "Neural fragility of iEEG recordings")]
struct Args {
    /// Recording (safetensors with `data` [C, T], `sfreq`, optional `ch_names`)
    #[arg(long)]
    input: PathBuf,

    /// Output safetensors path
    #[arg(long)]
    output: PathBuf,

    /// JSON pipeline configuration; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Window length in samples
    #[arg(long)]
    winsize: Option<usize>,

    /// Window step in samples
    #[arg(long)]
    stepsize: Option<usize>,

    /// Autoregressive order
    #[arg(long)]
    order: Option<usize>,

    /// Ridge penalty: a number or `auto`
    #[arg(long)]
    l2penalty: Option<L2Penalty>,

    /// `pinv` or `direct`
    #[arg(long)]
    method: Option<SolveMethod>,

    /// `monopolar` or `common-average`
    #[arg(long)]
    reference: Option<ReferenceScheme>,

    /// `column` (source) or `row` (sink)
    #[arg(long)]
    perturbation: Option<PerturbationType>,

    /// Target eigenvalue modulus
    #[arg(long)]
    radius: Option<f64>,

    /// Worker threads (default: all cores)
    #[arg(long)]
    n_jobs: Option<usize>,

    /// Resample to this rate (Hz) before filtering
    #[arg(long)]
    resample_sfreq: Option<f64>,

    /// Power-line frequency (Hz) to notch, with its harmonics
    #[arg(long)]
    line_freq: Option<f64>,

    /// Band-pass lower edge in Hz (default 0.5)
    #[arg(long)]
    l_freq: Option<f64>,

    /// Band-pass upper edge in Hz (default 200, clamped under Nyquist)
    #[arg(long)]
    h_freq: Option<f64>,

    /// Skip the band-pass
    #[arg(long, conflicts_with_all = ["l_freq", "h_freq"])]
    no_filter: bool,

    /// `channel`, `window` or `global`
    #[arg(long)]
    normalize: Option<NormalizeMode>,

    /// JSON channel table; bad channels of `--subject` are excluded
    #[arg(long, requires = "subject")]
    channels_table: Option<PathBuf>,

    /// Subject id in the channel table
    #[arg(long)]
    subject: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<PipelineConfig>(&text).context("parsing pipeline config")?
        }
        None => PipelineConfig::default(),
    };
    apply_overrides(&mut cfg, &args);

    if let (Some(table), Some(subject)) = (&args.channels_table, &args.subject) {
        let table = ChannelTable::load(table)?;
        let bad = table.bad_channels(subject);
        info!("subject {subject}: excluding {} bad channels {:?}", bad.len(), bad);
        cfg.bad_channels.extend(bad);
    }

    let signal = SignalFile::load(&args.input)?.into_signal()?;
    info!(
        "loaded {} ch × {} samples @ {} Hz",
        signal.n_channels(),
        signal.n_samples(),
        signal.sfreq()
    );

    let analysis = analyze(&signal, &cfg)?;
    info!("most fragile channels:");
    for r in analysis.ranking.iter().take(5) {
        match r.mean {
            Some(m) => info!("  {:<12} {:.3}  ({} windows)", r.name, m, r.n_usable),
            None => info!("  {:<12} n/a", r.name),
        }
    }

    write_run(&analysis.run, &analysis.normalized, &args.output)?;
    info!("written → {}", args.output.display());

    Ok(())
}

fn apply_overrides(cfg: &mut PipelineConfig, args: &Args) {
    let f = &mut cfg.fragility;
    if let Some(v) = args.winsize {
        f.winsize = v;
    }
    if let Some(v) = args.stepsize {
        f.stepsize = v;
    }
    if let Some(v) = args.order {
        f.order = v;
    }
    if let Some(v) = args.l2penalty {
        f.l2penalty = v;
    }
    if let Some(v) = args.method {
        f.method = v;
    }
    if let Some(v) = args.reference {
        f.reference = v;
    }
    if let Some(v) = args.perturbation {
        f.perturbation = v;
    }
    if let Some(v) = args.radius {
        f.radius = v;
    }
    if args.n_jobs.is_some() {
        f.n_jobs = args.n_jobs;
    }

    if args.resample_sfreq.is_some() {
        cfg.resample_sfreq = args.resample_sfreq;
    }
    if args.line_freq.is_some() {
        cfg.line_freq = args.line_freq;
    }
    if args.no_filter {
        cfg.l_freq = None;
        cfg.h_freq = None;
    }
    if args.l_freq.is_some() {
        cfg.l_freq = args.l_freq;
    }
    if args.h_freq.is_some() {
        cfg.h_freq = args.h_freq;
    }
    if let Some(v) = args.normalize {
        cfg.normalize = v;
    }
}
