//! The release pipeline: compile, add bootloader, convert, emulate, reveal.
//!
//! Stages run strictly in order and the first fatal failure stops the run.
//! Only the reveal stage may fail without failing the pipeline.

use std::fmt;

use serde::Serialize;

use crate::artifact::paths::{ArtifactLayout, ArtifactPaths, Profile};
use crate::config::{ReleaseConfig, ToolConfig};
use crate::conversion::{self, ConversionOutcome};
use crate::error::{ConversionError, PipelineError, RevealFailed};
use crate::platform::StageCommands;
use crate::process::{Cmd, CommandRunner};
use crate::qemu::QemuBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Compile,
    Bootloader,
    Convert,
    Emulate,
    Reveal,
}

impl Stage {
    pub const ORDER: [Stage; 5] = [
        Stage::Compile,
        Stage::Bootloader,
        Stage::Convert,
        Stage::Emulate,
        Stage::Reveal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::Bootloader => "bootloader",
            Self::Convert => "convert",
            Self::Emulate => "emulate",
            Self::Reveal => "reveal",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
    /// Failed, but the failure does not affect the run.
    Warned,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
}

/// Result of a successful run.
#[derive(Debug)]
pub struct PipelineReport {
    pub paths: ArtifactPaths,
    /// `None` when conversion ran across the bridge.
    pub conversion: Option<ConversionOutcome>,
    pub reveal_warning: Option<RevealFailed>,
}

/// Everything one run produced, successful or not.
#[derive(Debug)]
pub struct PipelineRun {
    pub profile: Profile,
    pub paths: ArtifactPaths,
    pub stages: Vec<StageRecord>,
    pub outcome: Result<PipelineReport, PipelineError>,
}

impl PipelineRun {
    /// 0 only when every stage through emulation succeeded.
    pub fn exit_code(&self) -> u8 {
        match &self.outcome {
            Ok(_) => 0,
            Err(err) => err.exit_code(),
        }
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        self.outcome.as_ref().err().map(PipelineError::stage)
    }
}

pub struct ReleasePipeline<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a ReleaseConfig,
    commands: &'a StageCommands,
    layout: ArtifactLayout,
}

impl<'a> ReleasePipeline<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        config: &'a ReleaseConfig,
        commands: &'a StageCommands,
        layout: ArtifactLayout,
    ) -> Self {
        Self {
            runner,
            config,
            commands,
            layout,
        }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Run every stage for `profile`.
    pub fn run(&self, profile: Profile) -> PipelineRun {
        let paths = self.layout.paths(profile);
        let mut stages = Vec::with_capacity(Stage::ORDER.len());
        let outcome = self.run_stages(profile, &paths, &mut stages);

        let recorded = stages.len();
        stages.extend(Stage::ORDER[recorded..].iter().map(|stage| StageRecord {
            stage: *stage,
            status: StageStatus::Skipped,
        }));

        PipelineRun {
            profile,
            paths,
            stages,
            outcome,
        }
    }

    fn run_stages(
        &self,
        profile: Profile,
        paths: &ArtifactPaths,
        stages: &mut Vec<StageRecord>,
    ) -> Result<PipelineReport, PipelineError> {
        let mut record = |stage: Stage, status: StageStatus| {
            stages.push(StageRecord { stage, status });
        };

        let compile = self.compile_command(profile);
        announce(profile, Stage::Compile, &compile);
        let result = self.runner.run(&compile);
        record(Stage::Compile, status_of(result.is_ok()));
        result.map_err(PipelineError::CompileFailed)?;

        let bootloader = self.bootloader_command(profile);
        announce(profile, Stage::Bootloader, &bootloader);
        let result = self.runner.run(&bootloader);
        record(Stage::Bootloader, status_of(result.is_ok()));
        result.map_err(PipelineError::BootloaderInjectionFailed)?;

        let result = self.convert_stage(profile, paths);
        record(Stage::Convert, status_of(result.is_ok()));
        let conversion = result?;

        let emulate = self.emulate_command(paths);
        announce(profile, Stage::Emulate, &emulate);
        let result = self.runner.run(&emulate);
        record(Stage::Emulate, status_of(result.is_ok()));
        result.map_err(PipelineError::EmulationLaunchFailed)?;

        let reveal = self.reveal_command(paths);
        announce(profile, Stage::Reveal, &reveal);
        let reveal_warning = match self.runner.run(&reveal) {
            Ok(()) => {
                record(Stage::Reveal, StageStatus::Succeeded);
                None
            }
            Err(cause) => {
                let warning = RevealFailed {
                    dir: paths.artifact_dir.clone(),
                    cause,
                };
                log::warn!("{warning}");
                record(Stage::Reveal, StageStatus::Warned);
                Some(warning)
            }
        };

        Ok(PipelineReport {
            paths: paths.clone(),
            conversion,
            reveal_warning,
        })
    }

    fn convert_stage(
        &self,
        profile: Profile,
        paths: &ArtifactPaths,
    ) -> Result<Option<ConversionOutcome>, ConversionError> {
        match self
            .commands
            .conversion
            .bridge_command(profile, &self.layout.project_root)
        {
            Some(bridge) => {
                announce(profile, Stage::Convert, &bridge);
                self.runner
                    .run(&bridge)
                    .map_err(|failed| ConversionError::from_bridge_failure(failed, paths))?;
                Ok(None)
            }
            None => {
                println!(
                    "[release:{profile}] convert: '{}' -> '{}'",
                    paths.bootable_image.display(),
                    paths.virtual_disk_image.display()
                );
                conversion::convert(self.runner, paths, &self.config.conversion).map(Some)
            }
        }
    }

    pub fn compile_command(&self, profile: Profile) -> Cmd {
        self.tool_command(&self.config.compile, profile)
    }

    pub fn bootloader_command(&self, profile: Profile) -> Cmd {
        self.tool_command(&self.config.bootloader, profile)
    }

    pub fn emulate_command(&self, paths: &ArtifactPaths) -> Cmd {
        QemuBuilder::from_config(&self.config.emulator)
            .raw_drive(&paths.bootable_image)
            .build()
            .current_dir(&self.layout.project_root)
    }

    pub fn reveal_command(&self, paths: &ArtifactPaths) -> Cmd {
        Cmd::new(self.commands.reveal_program.clone())
            .arg_path(&paths.artifact_dir)
            .ok_codes(self.commands.host.reveal_ok_codes())
            .inherit_stderr()
    }

    fn tool_command(&self, tool: &ToolConfig, profile: Profile) -> Cmd {
        let cmd = Cmd::new(tool.program.clone())
            .args(tool.args.iter().cloned())
            .current_dir(&self.layout.project_root);
        match profile.cargo_flag() {
            Some(flag) => cmd.arg(flag),
            None => cmd,
        }
    }
}

fn status_of(ok: bool) -> StageStatus {
    if ok {
        StageStatus::Succeeded
    } else {
        StageStatus::Failed
    }
}

fn announce(profile: Profile, stage: Stage, cmd: &Cmd) {
    println!("[release:{profile}] {stage}: `{}`", cmd.command_line());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::error::{
        StageFailed, CONVERT_EXIT_FORMAT, CONVERT_EXIT_RAW_COPY, CONVERT_EXIT_STALE_IMAGE,
    };
    use crate::platform::HostPlatform;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const COMPILE: &str = "stub-compile";
    const INJECT: &str = "stub-inject";
    const CONVERT: &str = "stub-convert";
    const EMULATE: &str = "stub-emulate";
    const REVEAL: &str = "stub-reveal";
    const BRIDGE: &str = "stub-bridge";

    /// Records every command and fails the ones given an exit code.
    ///
    /// The inject stub writes the bootable image so the native conversion
    /// has something to copy; the convert stub writes the virtual image.
    #[derive(Default)]
    struct RecordingRunner {
        calls: RefCell<Vec<Cmd>>,
        exit_codes: HashMap<&'static str, i32>,
        bootable: Option<std::path::PathBuf>,
    }

    impl RecordingRunner {
        fn failing(mut self, program: &'static str, code: i32) -> Self {
            self.exit_codes.insert(program, code);
            self
        }

        fn programs(&self) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .map(|cmd| cmd.program().to_string())
                .collect()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, cmd: &Cmd) -> Result<(), StageFailed> {
            self.calls.borrow_mut().push(cmd.clone());
            if let Some(code) = self.exit_codes.get(cmd.program()) {
                if !cmd.accepts(*code) {
                    return Err(cmd.failure(Some(*code), format!("{} failed", cmd.program())));
                }
            }
            match cmd.program() {
                INJECT => {
                    if let Some(bootable) = &self.bootable {
                        fs::write(bootable, vec![0xEB; 3000]).unwrap();
                    }
                }
                CONVERT => {
                    let out = Path::new(&cmd.get_args()[2]);
                    assert!(!out.exists(), "conversion tool must not see an existing image");
                    fs::copy(&cmd.get_args()[1], out).unwrap();
                }
                _ => {}
            }
            Ok(())
        }
    }

    fn stub_config() -> ReleaseConfig {
        let mut config = ReleaseConfig::default();
        config.compile = ToolConfig {
            program: COMPILE.to_string(),
            args: vec!["build".to_string()],
        };
        config.bootloader = ToolConfig {
            program: INJECT.to_string(),
            args: vec!["bootimage".to_string()],
        };
        config.conversion.tool = CONVERT.to_string();
        config.conversion.block_size = 4096;
        config.emulator.program = EMULATE.to_string();
        config.reveal.program = Some(REVEAL.to_string());
        config
    }

    struct Fixture {
        _temp: TempDir,
        config: ReleaseConfig,
        commands: StageCommands,
        layout: ArtifactLayout,
    }

    impl Fixture {
        fn new(config: ReleaseConfig) -> Self {
            let temp = TempDir::new().unwrap();
            let layout = config.layout(temp.path());
            for profile in Profile::ALL {
                fs::create_dir_all(layout.artifact_dir(profile)).unwrap();
            }
            let commands = StageCommands::for_host(HostPlatform::Posix, &config);
            Self {
                _temp: temp,
                config,
                commands,
                layout,
            }
        }

        fn runner(&self, profile: Profile) -> RecordingRunner {
            RecordingRunner {
                bootable: Some(self.layout.paths(profile).bootable_image),
                ..RecordingRunner::default()
            }
        }

        fn run(&self, runner: &RecordingRunner, profile: Profile) -> PipelineRun {
            ReleasePipeline::new(runner, &self.config, &self.commands, self.layout.clone())
                .run(profile)
        }
    }

    #[test]
    fn test_all_stages_run_once_in_order() {
        let fixture = Fixture::new(stub_config());
        for profile in Profile::ALL {
            let runner = fixture.runner(profile);
            let run = fixture.run(&runner, profile);

            assert_eq!(run.exit_code(), 0, "profile {profile}");
            assert_eq!(runner.programs(), [COMPILE, INJECT, CONVERT, EMULATE, REVEAL]);
            assert!(run
                .stages
                .iter()
                .all(|record| record.status == StageStatus::Succeeded));
            let report = run.outcome.unwrap();
            assert!(report.reveal_warning.is_none());
            assert!(report.paths.virtual_disk_image.is_file());
        }
    }

    #[test]
    fn test_profile_flag_reaches_compile_and_bootloader() {
        let fixture = Fixture::new(stub_config());

        let runner = fixture.runner(Profile::Release);
        fixture.run(&runner, Profile::Release);
        let calls = runner.calls.borrow();
        assert_eq!(calls[0].get_args(), ["build", "--release"]);
        assert_eq!(calls[1].get_args(), ["bootimage", "--release"]);

        let runner = fixture.runner(Profile::Debug);
        fixture.run(&runner, Profile::Debug);
        let calls = runner.calls.borrow();
        assert_eq!(calls[0].get_args(), ["build"]);
        assert_eq!(calls[1].get_args(), ["bootimage"]);
    }

    #[test]
    fn test_stages_use_explicit_working_dir() {
        let fixture = Fixture::new(stub_config());
        let runner = fixture.runner(Profile::Release);
        fixture.run(&runner, Profile::Release);
        let calls = runner.calls.borrow();
        let root = fixture.layout.project_root.as_path();
        assert_eq!(calls[0].get_current_dir(), Some(root));
        assert_eq!(calls[1].get_current_dir(), Some(root));
        assert_eq!(calls[3].get_current_dir(), Some(root));
    }

    #[test]
    fn test_compile_failure_stops_everything() {
        let fixture = Fixture::new(stub_config());
        let runner = fixture.runner(Profile::Release).failing(COMPILE, 101);
        let run = fixture.run(&runner, Profile::Release);

        assert_ne!(run.exit_code(), 0);
        assert_eq!(run.failed_stage(), Some(Stage::Compile));
        assert_eq!(runner.programs(), [COMPILE]);
        let Err(PipelineError::CompileFailed(failed)) = &run.outcome else {
            panic!("expected CompileFailed");
        };
        assert_eq!(failed.exit_code, Some(101));
        assert!(!run.paths.bootable_image.exists());
        assert!(!run.paths.raw_disk_image.exists());
        assert!(!run.paths.virtual_disk_image.exists());
        assert_eq!(run.stages[0].status, StageStatus::Failed);
        assert!(run.stages[1..]
            .iter()
            .all(|record| record.status == StageStatus::Skipped));
    }

    #[test]
    fn test_each_failing_stage_stops_later_stages() {
        for (index, program) in [COMPILE, INJECT, CONVERT, EMULATE].into_iter().enumerate() {
            let fixture = Fixture::new(stub_config());
            let runner = fixture.runner(Profile::Debug).failing(program, 1);
            let run = fixture.run(&runner, Profile::Debug);

            assert_ne!(run.exit_code(), 0, "{program}");
            assert_eq!(runner.programs().len(), index + 1, "{program}");
            assert_eq!(run.failed_stage(), Some(Stage::ORDER[index]));
        }
    }

    #[test]
    fn test_emulator_debug_exit_success_code_is_accepted() {
        let fixture = Fixture::new(stub_config());
        let runner = fixture.runner(Profile::Release).failing(EMULATE, 33);
        let run = fixture.run(&runner, Profile::Release);
        assert_eq!(run.exit_code(), 0);

        let runner = fixture.runner(Profile::Release).failing(EMULATE, 35);
        let run = fixture.run(&runner, Profile::Release);
        assert_eq!(run.failed_stage(), Some(Stage::Emulate));
        assert_eq!(runner.programs().last().map(String::as_str), Some(EMULATE));
    }

    #[test]
    fn test_emulator_boots_bootable_image_not_virtual_disk() {
        let fixture = Fixture::new(stub_config());
        let runner = fixture.runner(Profile::Release);
        let run = fixture.run(&runner, Profile::Release);
        let calls = runner.calls.borrow();
        let drive = format!("format=raw,file={}", run.paths.bootable_image.display());
        assert!(calls[3].get_args().contains(&drive));
        assert!(calls[3]
            .get_args()
            .contains(&"isa-debug-exit,iobase=0xf4,iosize=0x04".to_string()));
    }

    #[test]
    fn test_reveal_failure_does_not_change_exit_code() {
        let fixture = Fixture::new(stub_config());
        let runner = fixture.runner(Profile::Release).failing(REVEAL, 3);
        let run = fixture.run(&runner, Profile::Release);

        assert_eq!(run.exit_code(), 0);
        assert_eq!(run.failed_stage(), None);
        assert_eq!(run.stages[4].status, StageStatus::Warned);
        let report = run.outcome.unwrap();
        assert!(report.reveal_warning.is_some());
    }

    #[test]
    fn test_reveal_does_not_capture_stderr() {
        let fixture = Fixture::new(stub_config());
        let runner = fixture.runner(Profile::Release);
        fixture.run(&runner, Profile::Release);
        let calls = runner.calls.borrow();
        assert_eq!(calls[4].program(), REVEAL);
        assert!(!calls[4].captures_stderr());
        assert!(calls[3].captures_stderr());
    }

    #[test]
    fn test_pipeline_twice_regenerates_virtual_disk() {
        let fixture = Fixture::new(stub_config());
        let runner = fixture.runner(Profile::Release);
        let first = fixture.run(&runner, Profile::Release).outcome.unwrap();
        let second = fixture.run(&runner, Profile::Release).outcome.unwrap();
        assert!(!first.conversion.unwrap().removed_stale_image);
        assert!(second.conversion.unwrap().removed_stale_image);
        assert_eq!(
            fs::metadata(&second.paths.raw_disk_image).unwrap().len() % 4096,
            0
        );
    }

    #[test]
    fn test_bridged_conversion_runs_one_command() {
        let mut config = stub_config();
        config.conversion.bridge = Some(BridgeConfig {
            program: BRIDGE.to_string(),
            args: vec![],
            exe: "release-pipeline".to_string(),
        });
        let fixture = Fixture::new(config);
        let runner = fixture.runner(Profile::Debug);
        let run = fixture.run(&runner, Profile::Debug);

        assert_eq!(run.exit_code(), 0);
        assert_eq!(runner.programs(), [COMPILE, INJECT, BRIDGE, EMULATE, REVEAL]);
        let calls = runner.calls.borrow();
        assert_eq!(calls[2].get_args()[..3], ["release-pipeline", "convert", "debug"]);
        assert!(run.outcome.unwrap().conversion.is_none());
    }

    #[test]
    fn test_bridge_failure_is_a_conversion_failure() {
        let mut config = stub_config();
        config.conversion.bridge = Some(BridgeConfig {
            program: BRIDGE.to_string(),
            ..BridgeConfig::default()
        });
        let fixture = Fixture::new(config);
        let runner = fixture.runner(Profile::Release).failing(BRIDGE, 1);
        let run = fixture.run(&runner, Profile::Release);

        assert!(matches!(
            run.outcome,
            Err(PipelineError::ConversionFailed(ConversionError::BridgeFailed(_)))
        ));
        assert_eq!(runner.programs(), [COMPILE, INJECT, BRIDGE]);
    }

    #[test]
    fn test_bridged_failure_keeps_conversion_kind() {
        let mut config = stub_config();
        config.conversion.bridge = Some(BridgeConfig {
            program: BRIDGE.to_string(),
            ..BridgeConfig::default()
        });
        let fixture = Fixture::new(config);

        let runner = fixture
            .runner(Profile::Release)
            .failing(BRIDGE, i32::from(CONVERT_EXIT_STALE_IMAGE));
        let run = fixture.run(&runner, Profile::Release);
        let Err(PipelineError::ConversionFailed(ConversionError::StaleImageDeletionFailed {
            path,
            reason,
        })) = &run.outcome
        else {
            panic!("expected StaleImageDeletionFailed, got {:?}", run.outcome);
        };
        assert_eq!(path, &run.paths.virtual_disk_image);
        assert!(reason.contains("stub-bridge failed"), "{reason}");
        assert_eq!(run.exit_code(), 4);

        let runner = fixture
            .runner(Profile::Release)
            .failing(BRIDGE, i32::from(CONVERT_EXIT_FORMAT));
        let run = fixture.run(&runner, Profile::Release);
        let Err(PipelineError::ConversionFailed(ConversionError::FormatConversionFailed(failed))) =
            &run.outcome
        else {
            panic!("expected FormatConversionFailed, got {:?}", run.outcome);
        };
        assert_eq!(failed.exit_code, Some(43));

        let runner = fixture
            .runner(Profile::Release)
            .failing(BRIDGE, i32::from(CONVERT_EXIT_RAW_COPY));
        let run = fixture.run(&runner, Profile::Release);
        assert!(matches!(
            run.outcome,
            Err(PipelineError::ConversionFailed(ConversionError::RawCopyFailed { .. }))
        ));
        assert_eq!(runner.programs(), [COMPILE, INJECT, BRIDGE]);
    }
}
