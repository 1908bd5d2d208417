#![cfg(unix)]

mod support;

use std::io;
use std::os::unix::process::CommandExt as _;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use emuexec_core::config::{EmulatorConfig, EngineConfig};
use emuexec_core::model::FileStatus;
use emuexec_core::policy::{ExecutionPolicy, EMULATOR_ERROR_RETURN_CODE};
use emuexec_core::services::analyzer::{
    analyze_firmware, AnalyzerError, AnalyzerSettings, FileAnalyzer, FirmwareFile,
};
use emuexec_core::services::emulator::{EmulationBackend, Invocation, QemuUserBackend};
use support::{
    backend, compatible_emulator, counting_emulator, live_counts, rejecting_emulator, strings,
    target,
};
use tempfile::tempdir;

const TIMEOUT: Duration = Duration::from_secs(5);

fn settings(workers: usize) -> AnalyzerSettings {
    AnalyzerSettings {
        trace_timeout: TIMEOUT,
        max_concurrent_emulations: workers,
        ..AnalyzerSettings::default()
    }
}

fn file(path: PathBuf, uid: &str, archs: &[&str]) -> FirmwareFile {
    FirmwareFile { path, uid: uid.to_string(), candidate_architectures: strings(archs) }
}

#[test]
fn busybox_runs_under_mips_but_not_x86() {
    let temp = tempdir().unwrap();
    compatible_emulator(temp.path(), "mips");
    rejecting_emulator(temp.path(), "i386");
    let bin = target(temp.path(), "busybox-mips", "echo 'BusyBox v1.36 multi-call binary.'\n");
    let backend = backend(temp.path());
    let policy = ExecutionPolicy::default();
    let analyzer = FileAnalyzer::new(&backend, &policy, settings(4)).unwrap();

    let files = vec![file(bin, "busybox-uid", &["mips", "x86"])];
    let results = analyzer.analyze(&files, &[], &strings(&["--help", ""]), TIMEOUT);

    let record = &results["busybox-uid"];
    assert_eq!(record.status, FileStatus::Complete);
    assert!(record.executable);
    assert_eq!(record.architecture_results.len(), 2);

    let mips = &record.architecture_results["mips"];
    assert!(mips.executable);
    assert_eq!(mips.attempts.len(), 2);
    for attempt in &mips.attempts {
        assert_eq!(attempt.return_code, 0);
        assert!(!attempt.stdout.is_empty());
    }

    let x86 = &record.architecture_results["x86"];
    assert!(!x86.executable);
    assert!(x86.attempts.iter().all(|a| a.return_code == EMULATOR_ERROR_RETURN_CODE));
    assert_eq!(record.executable_architectures(), vec!["mips"]);
}

#[test]
fn segfaulting_binary_still_counts_as_executable() {
    let temp = tempdir().unwrap();
    compatible_emulator(temp.path(), "mips");
    compatible_emulator(temp.path(), "arm");
    let bin = target(temp.path(), "crasher", "kill -SEGV $$\n");
    let backend = backend(temp.path());
    let policy = ExecutionPolicy::default();
    let analyzer = FileAnalyzer::new(&backend, &policy, settings(2)).unwrap();

    let files = vec![file(bin, "crash", &["mips", "arm"])];
    let results = analyzer.analyze(&files, &[], &strings(&["-h", "--version"]), TIMEOUT);

    let record = &results["crash"];
    assert!(record.executable);
    for arch in record.architecture_results.values() {
        assert!(arch.executable);
        assert!(arch.attempts.iter().all(|a| a.return_code == 139));
    }
}

#[test]
fn result_shape_is_candidates_by_options() {
    let temp = tempdir().unwrap();
    let archs = ["mips", "mipsel", "arm", "aarch64"];
    for arch in archs {
        compatible_emulator(temp.path(), arch);
    }
    let bin = target(temp.path(), "tool", "exit 1\n");
    let backend = backend(temp.path());
    let policy = ExecutionPolicy::default();
    let mut s = settings(3);
    s.trace_enabled = false;
    let analyzer = FileAnalyzer::new(&backend, &policy, s).unwrap();

    let options = strings(&["-h", "--help", "-help", "--version", ""]);
    let results = analyzer.analyze(&[file(bin, "t", &archs)], &[], &options, TIMEOUT);

    let record = &results["t"];
    assert_eq!(record.architecture_results.len(), archs.len());
    for arch in archs {
        let result = &record.architecture_results[arch];
        assert_eq!(result.attempts.len(), options.len());
        assert!(result.trace.is_empty());
    }
}

#[test]
fn zero_candidates_yield_an_empty_complete_record() {
    let temp = tempdir().unwrap();
    let bin = target(temp.path(), "blob", "exit 0\n");
    let backend = backend(temp.path());
    let policy = ExecutionPolicy::default();
    let analyzer = FileAnalyzer::new(&backend, &policy, settings(1)).unwrap();

    let results = analyzer.analyze(&[file(bin, "blob", &[])], &[], &strings(&[""]), TIMEOUT);

    let record = &results["blob"];
    assert_eq!(record.status, FileStatus::Complete);
    assert!(record.architecture_results.is_empty());
    assert!(!record.executable);
}

#[test]
fn blank_candidate_name_is_malformed() {
    let temp = tempdir().unwrap();
    compatible_emulator(temp.path(), "mips");
    let bin = target(temp.path(), "blob", "exit 0\n");
    let backend = backend(temp.path());
    let policy = ExecutionPolicy::default();
    let analyzer = FileAnalyzer::new(&backend, &policy, settings(1)).unwrap();

    let results =
        analyzer.analyze(&[file(bin, "blob", &["mips", " "])], &[], &strings(&[""]), TIMEOUT);
    assert!(results["blob"].architecture_results.is_empty());
    assert!(!results["blob"].executable);
}

#[test]
fn default_candidates_apply_only_to_files_without_hints() {
    let temp = tempdir().unwrap();
    compatible_emulator(temp.path(), "mips");
    compatible_emulator(temp.path(), "arm");
    let bin = target(temp.path(), "tool", "exit 0\n");
    let backend = backend(temp.path());
    let policy = ExecutionPolicy::default();
    let analyzer = FileAnalyzer::new(&backend, &policy, settings(2)).unwrap();

    let files = vec![file(bin.clone(), "hinted", &["arm"]), file(bin, "plain", &[])];
    let results = analyzer.analyze(&files, &strings(&["mips"]), &strings(&[""]), TIMEOUT);

    assert_eq!(results["hinted"].architecture_results.keys().collect::<Vec<_>>(), vec!["arm"]);
    assert_eq!(results["plain"].architecture_results.keys().collect::<Vec<_>>(), vec!["mips"]);
}

#[test]
fn every_distinct_uid_gets_exactly_one_record() {
    let temp = tempdir().unwrap();
    compatible_emulator(temp.path(), "mips");
    let backend = backend(temp.path());
    let policy = ExecutionPolicy::default();
    let analyzer = FileAnalyzer::new(&backend, &policy, settings(2)).unwrap();

    let mut files = Vec::new();
    for i in 0..8 {
        let bin = target(temp.path(), &format!("bin{i}"), &format!("exit {}\n", i % 2));
        files.push(file(bin, &format!("uid{i}"), &["mips"]));
    }
    // Repeated uid with a different path: the first occurrence wins.
    files.push(file(temp.path().join("elsewhere"), "uid0", &["mips"]));

    let results = analyzer.analyze(&files, &[], &strings(&["-h"]), TIMEOUT);
    assert_eq!(results.len(), 8);
    assert!(results["uid0"].path.ends_with("bin0"));
    assert!(results.values().all(|r| r.status.is_complete() && r.executable));
}

#[test]
fn analysis_is_idempotent_for_deterministic_programs() {
    let temp = tempdir().unwrap();
    compatible_emulator(temp.path(), "mips");
    rejecting_emulator(temp.path(), "arm");
    let bin = target(temp.path(), "tool", "echo \"arg=$1\"\nexit 4\n");
    let backend = backend(temp.path());
    let policy = ExecutionPolicy::default();
    let analyzer = FileAnalyzer::new(&backend, &policy, settings(2)).unwrap();

    let files = vec![file(bin, "tool", &["mips", "arm"])];
    let options = strings(&["--help", ""]);
    let first = analyzer.analyze(&files, &[], &options, TIMEOUT);
    let second = analyzer.analyze(&files, &[], &options, TIMEOUT);

    let (a, b) = (&first["tool"], &second["tool"]);
    assert_eq!(a.executable, b.executable);
    for (arch, result) in &a.architecture_results {
        let other = &b.architecture_results[arch];
        assert_eq!(result.executable, other.executable);
        let codes = |r: &emuexec_core::model::ArchitectureResult| {
            r.attempts.iter().map(|a| (a.return_code, a.stdout.clone())).collect::<Vec<_>>()
        };
        assert_eq!(codes(result), codes(other));
    }
}

#[test]
fn live_emulations_never_exceed_the_worker_count() {
    let temp = tempdir().unwrap();
    let state = temp.path().join("state");
    let archs = ["mips", "arm", "ppc"];
    for arch in archs {
        counting_emulator(temp.path(), arch, &state);
    }
    let backend = backend(temp.path());
    let policy = ExecutionPolicy::default();
    let analyzer = FileAnalyzer::new(&backend, &policy, settings(2)).unwrap();

    let files: Vec<FirmwareFile> = (0..3)
        .map(|i| {
            let name = format!("svc{i}");
            file(target(temp.path(), &name, "exit 0\n"), &name, &archs)
        })
        .collect();
    let results = analyzer.analyze(&files, &[], &strings(&["-h", ""]), TIMEOUT);
    assert_eq!(results.len(), 3);
    assert!(results.values().all(|r| r.executable));

    // Two option runs plus one traced run per file and architecture.
    let counts = live_counts(&state);
    assert_eq!(counts.len(), 3 * archs.len() * 3);
    let peak = counts.iter().copied().max().unwrap();
    assert!(peak >= 1);
    assert!(peak <= 2, "saw {peak} emulators alive at once: {counts:?}");
}

/// Backend that fails in controlled ways for two reserved architecture names.
///
/// `exhausted` fails every spawn with EAGAIN; `broken` panics while building the
/// command. Everything else goes to the fake qemu emulators.
struct FaultyBackend {
    inner: QemuUserBackend,
}

impl FaultyBackend {
    fn build(&self, invocation: &Invocation<'_>, traced: bool) -> Command {
        match invocation.architecture {
            "exhausted" => {
                let mut cmd = Command::new("/bin/sh");
                // SAFETY: the hook only constructs an error value.
                unsafe {
                    cmd.pre_exec(|| Err(io::Error::from_raw_os_error(libc::EAGAIN)));
                }
                cmd
            }
            "broken" => panic!("no command for {}", invocation.architecture),
            _ if traced => self.inner.trace_command(invocation),
            _ => self.inner.command(invocation),
        }
    }
}

impl EmulationBackend for FaultyBackend {
    fn name(&self) -> &'static str {
        "faulty"
    }

    fn emulator_path(&self, architecture: &str) -> PathBuf {
        self.inner.emulator_path(architecture)
    }

    fn command(&self, invocation: &Invocation<'_>) -> Command {
        self.build(invocation, false)
    }

    fn trace_command(&self, invocation: &Invocation<'_>) -> Command {
        self.build(invocation, true)
    }
}

#[test]
fn resource_exhaustion_marks_only_that_file_incomplete() {
    let temp = tempdir().unwrap();
    compatible_emulator(temp.path(), "mips");
    let bin = target(temp.path(), "tool", "echo ok\n");
    let backend = FaultyBackend { inner: backend(temp.path()) };
    let policy = ExecutionPolicy::default();
    let analyzer = FileAnalyzer::new(&backend, &policy, settings(2)).unwrap();

    let files = vec![
        file(bin.clone(), "starved", &["mips", "exhausted"]),
        file(bin, "sibling", &["mips"]),
    ];
    let results = analyzer.analyze(&files, &[], &strings(&["--help", ""]), TIMEOUT);
    assert_eq!(results.len(), 2);

    let starved = &results["starved"];
    match &starved.status {
        FileStatus::Incomplete { reason } => assert!(reason.contains("exhausted"), "{reason}"),
        other => panic!("expected incomplete, got {other:?}"),
    }
    assert!(starved.architecture_results.is_empty());
    assert!(!starved.executable);

    let sibling = &results["sibling"];
    assert_eq!(sibling.status, FileStatus::Complete);
    assert!(sibling.executable);
}

#[test]
fn panicking_task_is_recorded_as_incomplete() {
    let temp = tempdir().unwrap();
    compatible_emulator(temp.path(), "mips");
    let bin = target(temp.path(), "tool", "exit 0\n");
    let backend = FaultyBackend { inner: backend(temp.path()) };
    let policy = ExecutionPolicy::default();
    let analyzer = FileAnalyzer::new(&backend, &policy, settings(2)).unwrap();

    let files = vec![file(bin.clone(), "crashy", &["broken"]), file(bin, "sibling", &["mips"])];
    let results = analyzer.analyze(&files, &[], &strings(&[""]), TIMEOUT);
    assert_eq!(results.len(), 2);

    assert_eq!(
        results["crashy"].status,
        FileStatus::Incomplete { reason: "analysis task produced no result".into() }
    );
    assert_eq!(results["sibling"].status, FileStatus::Complete);
    assert!(results["sibling"].executable);
}

#[test]
fn zero_workers_is_rejected() {
    let temp = tempdir().unwrap();
    let backend = backend(temp.path());
    let policy = ExecutionPolicy::default();
    let err = FileAnalyzer::new(&backend, &policy, settings(0)).err().expect("must fail");
    assert!(matches!(err, AnalyzerError::NoWorkers));
}

#[test]
fn analyze_firmware_uses_config_defaults() {
    let temp = tempdir().unwrap();
    compatible_emulator(temp.path(), "mips");
    let bin = target(temp.path(), "init", "echo hi\n");
    let config = EngineConfig {
        default_architectures: strings(&["mips"]),
        options: strings(&["--version"]),
        timeout_secs: 5,
        max_concurrent_emulations: 2,
        emulator: EmulatorConfig {
            dir: Some(temp.path().to_path_buf()),
            ..EmulatorConfig::default()
        },
        ..EngineConfig::default()
    };
    let backend = backend(temp.path());

    let files = vec![file(bin, "init", &[])];
    let result = analyze_firmware(&config, &backend, &files, true).expect("analysis");
    assert!(result.parent_flag);
    assert_eq!(result.files.len(), 1);
    assert_eq!(result.executable_count(), 1);
    assert_eq!(result.files["init"].architecture_results["mips"].attempts.len(), 1);
}
