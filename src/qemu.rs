//! QEMU command construction for the emulate stage.
//!
//! The kernel signals its own test outcome by writing to the `isa-debug-exit`
//! port; QEMU then exits with `(value << 1) | 1`.

use std::path::{Path, PathBuf};

use crate::config::EmulatorConfig;
use crate::process::Cmd;

/// How serial output is handled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SerialOutput {
    /// Write serial to a file path.
    File(PathBuf),
    /// Serial goes to the orchestrator's terminal.
    #[default]
    Stdio,
    /// No serial device.
    None,
}

/// `isa-debug-exit` device placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugExit {
    pub iobase: u16,
    pub iosize: u16,
}

/// Builder for QEMU commands.
#[derive(Debug, Clone, Default)]
pub struct QemuBuilder {
    program: String,
    raw_drive: Option<PathBuf>,
    debug_exit: Option<DebugExit>,
    serial_output: SerialOutput,
    extra_args: Vec<String>,
    ok_codes: Vec<i32>,
}

impl QemuBuilder {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            ok_codes: vec![0],
            ..Default::default()
        }
    }

    /// Builder preconfigured from `[emulator]`.
    pub fn from_config(config: &EmulatorConfig) -> Self {
        Self::new(&config.program)
            .debug_exit(DebugExit {
                iobase: config.iobase,
                iosize: config.iosize,
            })
            .serial_output(SerialOutput::Stdio)
            .extra_args(&config.extra_args)
            .ok_codes(&config.success_exit_codes)
    }

    /// Boot `path` as a raw-format drive.
    pub fn raw_drive(mut self, path: &Path) -> Self {
        self.raw_drive = Some(path.to_path_buf());
        self
    }

    pub fn debug_exit(mut self, device: DebugExit) -> Self {
        self.debug_exit = Some(device);
        self
    }

    pub fn serial_output(mut self, output: SerialOutput) -> Self {
        self.serial_output = output;
        self
    }

    pub fn extra_args(mut self, args: &[String]) -> Self {
        self.extra_args.extend(args.iter().cloned());
        self
    }

    pub fn ok_codes(mut self, codes: &[i32]) -> Self {
        self.ok_codes = codes.to_vec();
        self
    }

    pub fn build(self) -> Cmd {
        let mut cmd = Cmd::new(self.program).ok_codes(&self.ok_codes);

        if let Some(drive) = &self.raw_drive {
            cmd = cmd.args([
                "-drive".to_string(),
                format!("format=raw,file={}", drive.display()),
            ]);
        }

        if let Some(exit) = self.debug_exit {
            cmd = cmd.args([
                "-device".to_string(),
                format!(
                    "isa-debug-exit,iobase={:#x},iosize={:#04x}",
                    exit.iobase, exit.iosize
                ),
            ]);
        }

        match &self.serial_output {
            SerialOutput::File(path) => {
                cmd = cmd.args(["-serial".to_string(), format!("file:{}", path.display())]);
            }
            SerialOutput::Stdio => {
                cmd = cmd.args(["-serial", "stdio"]);
            }
            SerialOutput::None => {}
        }

        cmd.args(self.extra_args)
    }
}
