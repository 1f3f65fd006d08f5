mod audio;
mod cli;
mod config;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use cli::Cli;
use mastercheck::analysis::true_peak::OversamplingMode;
use mastercheck::analysis::AnalysisConfig;
use mastercheck::targets::PlaybackMode;
use mastercheck::{analyze, analyze_with_timeout, AnalysisOptions};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect mastercheck.toml / global config
    let config_path = cli.config.clone().or_else(|| {
        let local = std::path::PathBuf::from("mastercheck.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("mastercheck").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("mastercheck").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });
    if let Some(ref path) = config_path {
        if let Some(cfg) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            // Merge: config values apply only when CLI is at its default
            if cli.oversample == 4 { cli.oversample = cfg.analysis.oversample; }
            if !cli.strict { cli.strict = cfg.analysis.strict; }
            if cli.timeout == 0 { cli.timeout = cfg.analysis.timeout_seconds; }
            if cli.mode.is_none() { cli.mode = cfg.targets.mode; }
            if cli.targets.is_none() { cli.targets = cfg.targets.file; }
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    let input = cli.input.as_ref().context("Input audio file is required")?;
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    log::info!("mastercheck - mastering-readiness audio analysis");
    log::info!("Input: {}", input.display());

    let oversampling = match cli.oversample {
        4 => OversamplingMode::Legacy4x,
        8 => OversamplingMode::Upgrade8x,
        other => anyhow::bail!("Unsupported oversampling factor {other} (use 4 or 8)"),
    };

    let playback_mode = cli
        .mode
        .as_deref()
        .map(PlaybackMode::from_name)
        .transpose()
        .context("Invalid playback mode")?;

    let target_spec = cli
        .targets
        .as_ref()
        .map(|path| -> Result<serde_json::Value> {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read targets file: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Targets file is not valid JSON: {}", path.display()))
        })
        .transpose()?;

    if target_spec.is_none() && playback_mode.is_none() {
        anyhow::bail!("No target source: pass --targets and/or --mode");
    }

    // 1. Decode audio
    log::info!("Decoding audio...");
    let audio_data = audio::decode::decode_audio(input)?;

    // 2. Run the metrics pipeline
    log::info!("Analyzing audio...");
    let options = AnalysisOptions {
        job_id: cli.job_id.clone(),
        file_name: input.file_name().map(|n| n.to_string_lossy().into_owned()),
        target_spec,
        playback_mode,
        config: AnalysisConfig {
            oversampling,
            strict: cli.strict,
            ..AnalysisConfig::default()
        },
    };

    let report = if cli.timeout > 0 {
        analyze_with_timeout(audio_data, options, Duration::from_secs(cli.timeout))
    } else {
        analyze(&audio_data, &options)
    };

    let report = match report {
        Ok(report) => report,
        Err(err) => {
            let detail = err.to_report();
            log::error!("Analysis failed at {:?}: {}", detail.stage, detail.message);
            eprintln!("{}", serde_json::to_string_pretty(&detail)?);
            std::process::exit(1);
        }
    };

    log::info!(
        "Score: {:.0}/100 ({}), {} issue(s)",
        report.comparison.score.total,
        report.comparison.score.classification,
        report.comparison.issues.len()
    );
    if !report.warnings.is_empty() {
        log::warn!("Partial report: {} metric(s) degraded", report.warnings.len());
    }

    // 3. Emit JSON
    let json = serde_json::to_string_pretty(&report)?;
    match &cli.output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write output: {}", path.display()))?;
            log::info!("Done! Output: {}", path.display());
        }
        None => println!("{json}"),
    }

    Ok(())
}
