//! Fake user-mode emulators for integration tests.
//!
//! The fake `qemu-<target>` scripts accept the same argument shape as the real
//! ones (`[-L root] [-strace] binary [option]`). A "compatible" emulator runs the
//! target file as a shell script; a "rejecting" one prints the loader error qemu
//! emits for a foreign ELF image.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use emuexec_core::config::EmulatorConfig;
use emuexec_core::services::emulator::QemuUserBackend;

pub fn write_executable(path: &Path, body: &str) {
    fs::write(path, body).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

/// Emulator that runs the target as a shell script and logs one fake syscall when tracing.
pub fn compatible_emulator(dir: &Path, target: &str) -> PathBuf {
    let path = dir.join(format!("qemu-{target}"));
    write_executable(
        &path,
        r#"#!/bin/sh
trace=0
while [ $# -gt 0 ]; do
  case "$1" in
    -L) shift 2 ;;
    -strace) trace=1; shift ;;
    *) break ;;
  esac
done
bin="$1"
shift
if [ "$trace" = 1 ]; then
  echo "4242 execve(\"$bin\",{\"$bin\",NULL}) = 0" >&2
fi
exec /bin/sh "$bin" "$@"
"#,
    );
    path
}

/// Emulator that refuses every binary the way qemu does for a foreign architecture.
pub fn rejecting_emulator(dir: &Path, target: &str) -> PathBuf {
    let path = dir.join(format!("qemu-{target}"));
    write_executable(
        &path,
        &format!(
            "#!/bin/sh\necho \"qemu-{target}: $*: Invalid ELF image for this architecture\" >&2\nexit 1\n"
        ),
    );
    path
}

/// A "binary" for the fake emulators: a shell script body.
pub fn target(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write target");
    path
}

pub fn backend(emulator_dir: &Path) -> QemuUserBackend {
    QemuUserBackend::new(&EmulatorConfig {
        dir: Some(emulator_dir.to_path_buf()),
        ..EmulatorConfig::default()
    })
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Compatible emulator that records how many emulators are alive whenever one starts.
///
/// Each run holds a marker in `<state>/live` for a short while; the number of markers
/// seen at start is appended to `<state>/counts`, one line per run.
pub fn counting_emulator(dir: &Path, target: &str, state: &Path) -> PathBuf {
    fs::create_dir_all(state.join("live")).expect("state dir");
    let path = dir.join(format!("qemu-{target}"));
    write_executable(
        &path,
        &format!(
            r#"#!/bin/sh
state="{state}"
while [ $# -gt 0 ]; do
  case "$1" in
    -L) shift 2 ;;
    -strace) shift ;;
    *) break ;;
  esac
done
bin="$1"
shift
touch "$state/live/$$"
ls "$state/live" | wc -l >> "$state/counts"
sleep 0.2
rm -f "$state/live/$$"
exec /bin/sh "$bin" "$@"
"#,
            state = state.display()
        ),
    );
    path
}

/// Per-run live counts written by [`counting_emulator`].
pub fn live_counts(state: &Path) -> Vec<usize> {
    fs::read_to_string(state.join("counts"))
        .unwrap_or_default()
        .lines()
        .map(|line| line.trim().parse().expect("count"))
        .collect()
}
