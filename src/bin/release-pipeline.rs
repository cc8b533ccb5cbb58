use std::process::ExitCode;

use anyhow::{bail, Result};

mod workflows;

fn usage() -> &'static str {
    "Usage:\n  release-pipeline run [debug|release] [--skip-preflight]\n  release-pipeline convert <debug|release> <project_root>\n  release-pipeline paths [debug|release]\n  release-pipeline preflight"
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match dispatch(&args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(args: &[String]) -> Result<ExitCode> {
    match args.first().map(String::as_str) {
        Some("run") => workflows::run_release_command(&args[1..]),
        Some("convert") => workflows::run_convert_command(&args[1..]),
        Some("paths") => workflows::run_paths_command(&args[1..]),
        Some("preflight") if args.len() == 1 => workflows::run_preflight_command(),
        Some("-h" | "--help" | "help") => {
            println!("{}", usage());
            Ok(ExitCode::SUCCESS)
        }
        _ => bail!(usage()),
    }
}
