use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::EmulatorConfig;

/// Environment variable overriding the directory that holds the emulator binaries.
pub const EMULATOR_DIR_ENV: &str = "EMUEXEC_QEMU_DIR";

/// One request to run the target binary under an emulator.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub binary: &'a Path,
    pub architecture: &'a str,
    /// Single argument for the target; empty means no argument.
    pub option: &'a str,
}

/// Trait implemented by instruction-set emulation backends.
///
/// Backends only build commands; spawning, timing, and teardown are owned by the
/// runner so every backend gets the same process discipline.
pub trait EmulationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Path (or bare name resolved through `PATH`) of the emulator for `architecture`.
    fn emulator_path(&self, architecture: &str) -> PathBuf;

    /// Plain invocation of the target.
    fn command(&self, invocation: &Invocation<'_>) -> Command;

    /// Invocation with syscall tracing enabled; the trace is read from stderr.
    fn trace_command(&self, invocation: &Invocation<'_>) -> Command;
}

/// Architecture name to qemu user-mode target suffix.
pub fn default_targets() -> BTreeMap<String, String> {
    [
        ("x86", "i386"),
        ("i386", "i386"),
        ("x86_64", "x86_64"),
        ("arm", "arm"),
        ("armeb", "armeb"),
        ("aarch64", "aarch64"),
        ("mips", "mips"),
        ("mipsel", "mipsel"),
        ("mips64", "mips64"),
        ("mips64el", "mips64el"),
        ("ppc", "ppc"),
        ("ppc64", "ppc64"),
        ("ppc64le", "ppc64le"),
        ("m68k", "m68k"),
        ("sparc", "sparc"),
        ("sparc64", "sparc64"),
        ("sh4", "sh4"),
        ("riscv32", "riscv32"),
        ("riscv64", "riscv64"),
    ]
    .into_iter()
    .map(|(arch, target)| (arch.to_string(), target.to_string()))
    .collect()
}

/// qemu user-mode emulation (`qemu-<target>`), tracing via `-strace`.
#[derive(Debug, Clone)]
pub struct QemuUserBackend {
    dir: Option<PathBuf>,
    library_root: Option<PathBuf>,
    targets: BTreeMap<String, String>,
}

impl QemuUserBackend {
    pub fn new(config: &EmulatorConfig) -> Self {
        let dir = env::var_os(EMULATOR_DIR_ENV).map(PathBuf::from).or_else(|| config.dir.clone());
        Self { dir, library_root: config.library_root.clone(), targets: config.targets.clone() }
    }

    /// Override the `-L` prefix used to resolve the target's dynamic loader and libraries.
    pub fn with_library_root(mut self, root: Option<PathBuf>) -> Self {
        if root.is_some() {
            self.library_root = root;
        }
        self
    }

    /// Emulator binary name, e.g. `qemu-mipsel`.
    pub fn emulator_name(&self, architecture: &str) -> String {
        let target = self.targets.get(architecture).map(String::as_str).unwrap_or(architecture);
        format!("qemu-{target}")
    }

    fn base_command(&self, invocation: &Invocation<'_>, trace: bool) -> Command {
        let mut cmd = Command::new(self.emulator_path(invocation.architecture));
        // The target sees a minimal environment; PATH is kept so the emulator can be found.
        cmd.env_clear();
        if let Some(path) = env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        if let Some(root) = &self.library_root {
            cmd.arg("-L").arg(root);
        }
        if trace {
            cmd.arg("-strace");
        }
        cmd.arg(invocation.binary);
        if !invocation.option.is_empty() {
            cmd.arg(invocation.option);
        }
        cmd
    }
}

impl EmulationBackend for QemuUserBackend {
    fn name(&self) -> &'static str {
        "qemu-user"
    }

    fn emulator_path(&self, architecture: &str) -> PathBuf {
        let name = self.emulator_name(architecture);
        match &self.dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    fn command(&self, invocation: &Invocation<'_>) -> Command {
        self.base_command(invocation, false)
    }

    fn trace_command(&self, invocation: &Invocation<'_>) -> Command {
        self.base_command(invocation, true)
    }
}
