use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use release_pipeline::config::load_config;
use release_pipeline::conversion;
use release_pipeline::error::PipelineError;
use release_pipeline::preflight::check_host_tools;
use release_pipeline::run_manifest::{
    manifest_path, now_utc_compact, write_run_manifest, RunManifest,
};
use release_pipeline::{ProcessRunner, Profile, ReleasePipeline, StageCommands};

pub(crate) fn run_release(
    project_root: &Path,
    profile: Profile,
    skip_preflight: bool,
) -> Result<ExitCode> {
    let config = load_config(project_root)?;
    let commands = StageCommands::detect(&config);
    log::debug!(
        "host {} -> conversion {:?}, reveal via '{}'",
        commands.host,
        commands.conversion,
        commands.reveal_program
    );

    if skip_preflight {
        log::info!("skipping host tool preflight");
    } else {
        check_host_tools(&config, &commands).context("preflight failed")?;
    }

    let pipeline = ReleasePipeline::new(
        &ProcessRunner,
        &config,
        &commands,
        config.layout(project_root),
    );

    println!(
        "[release:{profile}] building '{}' for {}",
        config.project.binary_name, config.project.target
    );
    let started_at_utc = now_utc_compact();
    let run = pipeline.run(profile);
    let finished_at_utc = now_utc_compact();

    // The manifest never decides the outcome of the run.
    let manifest_result =
        RunManifest::from_run(&run, &commands.host.to_string(), started_at_utc, finished_at_utc)
            .and_then(|manifest| {
                write_run_manifest(&manifest_path(&run.paths.artifact_dir), &manifest)
            });
    if let Err(err) = manifest_result {
        log::warn!("{err:#}");
    }

    match &run.outcome {
        Ok(report) => {
            if let Some(warning) = &report.reveal_warning {
                println!("[release:{profile}] note: {warning}");
            }
            println!(
                "[release:{profile}] all stages passed; virtual disk at {}",
                report.paths.virtual_disk_image.display()
            );
        }
        Err(err) => report_failure(profile, err),
    }

    Ok(ExitCode::from(run.exit_code()))
}

fn report_failure(profile: Profile, err: &PipelineError) {
    eprintln!(
        "[release:{profile}] stage '{}' failed; later stages were not run",
        err.stage()
    );
    eprintln!("{err}");
}

/// Conversion stage only, in this environment. Entry point for the bridge.
pub(crate) fn convert_in_place(project_root: &Path, profile: Profile) -> Result<ExitCode> {
    let config = load_config(project_root)?;
    let paths = config.layout(project_root).paths(profile);
    println!(
        "[convert:{profile}] '{}' -> '{}'",
        paths.bootable_image.display(),
        paths.virtual_disk_image.display()
    );

    match conversion::convert(&ProcessRunner, &paths, &config.conversion) {
        Ok(outcome) => {
            println!(
                "[convert:{profile}] wrote {} ({} byte raw image)",
                paths.virtual_disk_image.display(),
                outcome.raw.output_len
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            // The host side reads the failure kind back from the exit code.
            let code = err.convert_exit_code();
            eprintln!("[convert:{profile}] {}", PipelineError::from(err));
            Ok(ExitCode::from(code))
        }
    }
}

pub(crate) fn print_paths(project_root: &Path, profile: Profile) -> Result<()> {
    let config = load_config(project_root)?;
    let paths = config.layout(project_root).paths(profile);
    let rendered =
        serde_json::to_string_pretty(&paths).context("serializing artifact paths")?;
    println!("{rendered}");
    Ok(())
}

pub(crate) fn preflight(project_root: &Path) -> Result<()> {
    let config = load_config(project_root)?;
    let commands = StageCommands::detect(&config);
    check_host_tools(&config, &commands)?;
    println!("[preflight] all required host tools found ({} host)", commands.host);
    Ok(())
}
