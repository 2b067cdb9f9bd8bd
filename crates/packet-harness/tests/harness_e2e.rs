#![cfg(all(unix, not(target_arch = "wasm32")))]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;
use packet_harness::exec::shell_quote;
use packet_harness::{
    run, run_trial, trial_rng, ConfigOptions, TestConfig, Toolchain, DEFAULT_TRIAL_TIMEOUT,
};

const DESCRIPTOR: &str = r#"{
    "arch": "v73",
    "instructions": {
        "A2_add": { "syntax": "Rd32=add(Rs32,Rt32)", "attrs": "" },
        "A2_addi": { "syntax": "Rd32=add(Rs32,#s16)", "attrs": "" },
        "S2_asl_i_r": { "syntax": "Rd32=asl(Rs32,#u5)", "attrs": "" },
        "C2_cmpeq": { "syntax": "Pd4=cmp.eq(Rs32,Rt32)", "attrs": "" }
    }
}"#;

/// "Compiles" by copying the input to the `-o` path.
const FAKE_CC: &str = r#"#!/bin/sh
out=""
last=""
while [ $# -gt 0 ]; do
    case "$1" in
        -o) out="$2"; shift 2 ;;
        *) last="$1"; shift ;;
    esac
done
exec cp "$last" "$out"
"#;

/// Dumps the "executable" as its register state. The candidate's behavior is chosen by the
/// name of the QEMU binary it was pointed at.
const FAKE_LLDB: &str = r#"#!/bin/sh
exe="$4"
case "${LLDB_HEXAGON_QEMU_PATH:-}" in
    *slow*) echo "starting"; exec sleep 30 ;;
    *diverge*) echo "r00 = 0xdeadbeef" ;;
    *flaky*)
        marker="$(dirname "$exe")/flaky_seen"
        if [ ! -f "$marker" ]; then
            : > "$marker"
            cat "$exe"
            echo "Process 1 resuming, run"
            exit 0
        fi
        ;;
esac
echo "(lldb) register read r0"
echo "Done!"
cat "$exe"
"#;

struct Fixture {
    root: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("scratch")).unwrap();
        fs::write(root.path().join("iset.json"), DESCRIPTOR).unwrap();
        let fixture = Fixture { root };
        fixture.script("hexagon-clang", FAKE_CC);
        fixture.script("hexagon-lldb", FAKE_LLDB);
        for name in ["qemu-good", "qemu-slow", "qemu-diverge", "qemu-flaky"] {
            fixture.script(name, "#!/bin/sh\nexit 0\n");
        }
        fixture
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, body).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn config(&self, candidate: &str, command_timeout: Duration) -> TestConfig {
        TestConfig::from_options(ConfigOptions {
            iset_path: self.path("iset.json"),
            arch: None,
            iters_per_case: 3,
            packets_per_case: 2,
            max_insts_per_packet: 3,
            cflags: None,
            template_path: None,
            output_dir: self.path("out"),
            scratch_root: Some(self.path("scratch")),
            toolchain: Toolchain {
                cc: self.path("hexagon-clang"),
                lldb: self.path("hexagon-lldb"),
                sim: self.path("hexagon-sim"),
            },
            candidate_qemu: self.path(candidate),
            reference_qemu: None,
            command_timeout,
            trial_timeout: DEFAULT_TRIAL_TIMEOUT,
            verif_exe: PathBuf::from("packet-verif"),
            seed: 0x5eed,
        })
        .unwrap()
    }
}

fn entries(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(read) => read.map(|entry| entry.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn identical_engines_always_pass() {
    let fixture = Fixture::new();
    let cfg = Arc::new(fixture.config("qemu-good", Duration::from_secs(20)));

    let report = run(Arc::clone(&cfg), 2, 2, ProgressBar::hidden()).await.unwrap();

    assert_eq!(report.trials, 2);
    assert_eq!(report.passes, 2);
    assert!(report.passed());
    assert!(report.failures.is_empty());
    assert_eq!(report.timeouts, 0);
    assert_eq!(report.packets_executed, 2 * 2 * 3);
    assert!(report.stats.total() >= 4);
    assert!(entries(&fixture.path("scratch")).is_empty());
    assert!(!fixture.path("out").exists());
}

#[tokio::test(flavor = "current_thread")]
async fn candidate_timeout_is_archived() {
    let fixture = Fixture::new();
    let cfg = Arc::new(fixture.config("qemu-slow", Duration::from_millis(500)));

    let report = run(cfg, 1, 1, ProgressBar::hidden()).await.unwrap();

    assert_eq!(report.passes, 0);
    assert!(!report.passed());
    assert_eq!(report.timeouts, 1);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert!(failure.timed_out);
    assert!(failure.dir.starts_with(fixture.path("out")));

    let timeout = fs::read_to_string(failure.dir.join("timeout_new.txt")).unwrap();
    assert!(timeout.contains("timed out"));
    assert!(timeout.contains("starting"));
    assert!(failure.dir.join("output_base.txt").exists());
    assert!(failure.dir.join("repro.sh").exists());
    assert!(entries(&fixture.path("scratch")).is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn stuck_trial_is_abandoned_in_scratch() {
    let fixture = Fixture::new();
    let mut cfg = fixture.config("qemu-slow", Duration::from_secs(20));
    cfg.trial_timeout = Duration::from_secs(1);

    let report = run(Arc::new(cfg), 1, 1, ProgressBar::hidden()).await.unwrap();

    assert_eq!(report.trials, 1);
    assert_eq!(report.passes, 0);
    assert!(!report.passed());
    assert_eq!(report.timeouts, 1);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert!(failure.timed_out);
    assert!(failure.dir.is_dir());
    assert!(failure.dir.starts_with(fixture.path("scratch")));
    let name = failure.dir.file_name().unwrap().to_string_lossy();
    assert!(name.starts_with("pkt_"), "{name}");
    assert_eq!(entries(&fixture.path("scratch")), vec![failure.dir.clone()]);
    assert!(!fixture.path("out").exists());
}

#[tokio::test(flavor = "current_thread")]
async fn mismatch_is_archived_with_patched_repro() {
    let fixture = Fixture::new();
    let cfg = Arc::new(fixture.config("qemu-diverge", Duration::from_secs(20)));

    let report = run(cfg, 1, 1, ProgressBar::hidden()).await.unwrap();

    assert_eq!(report.passes, 0);
    assert_eq!(report.timeouts, 0);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert!(!failure.timed_out);

    let dir = &failure.dir;
    for name in [
        "out.S",
        "test_case.tmpl",
        "test_case_script.lldb",
        "test_packets",
        "output_base.txt",
        "output_new.txt",
        "output_base_err.txt",
        "output_new_err.txt",
    ] {
        assert!(dir.join(name).exists(), "missing {name}");
    }

    let base = fs::read_to_string(dir.join("output_base.txt")).unwrap();
    let new = fs::read_to_string(dir.join("output_new.txt")).unwrap();
    assert!(!base.contains("(lldb)"));
    assert!(!base.contains("Done!"));
    assert!(new.starts_with(" r0 = 0xdeadbeef\n"));

    let repro = fs::read_to_string(dir.join("repro.sh")).unwrap();
    assert!(repro.starts_with(&format!(
        "#!/bin/bash\nDIR={}\n",
        shell_quote(&dir.to_string_lossy())
    )));
    assert!(!repro.contains("__FILL_IN_DIR__"));
    assert!(repro.contains("LLDB_HEXAGON_QEMU_PATH="));
    let mode = fs::metadata(dir.join("repro.sh")).unwrap().permissions().mode();
    assert_ne!(mode & 0o111, 0);
}

#[tokio::test(flavor = "current_thread")]
async fn benign_debugger_race_is_retried_once() {
    let fixture = Fixture::new();
    let cfg = fixture.config("qemu-flaky", Duration::from_secs(20));
    let dir = fixture.path("scratch").join("pkt_flaky");
    fs::create_dir_all(&dir).unwrap();

    let outcome = run_trial(&cfg, 0, &mut trial_rng(cfg.seed, 0), &dir)
        .await
        .unwrap();

    assert!(outcome.passed);
    assert!(outcome.retried);
    assert!(!outcome.timed_out);
    assert_eq!(outcome.compile_attempts, 1);
    assert_eq!(outcome.packets, 2);
    assert!(!dir.exists());
}

#[tokio::test(flavor = "current_thread")]
async fn same_seed_same_program() {
    let fixture = Fixture::new();
    let cfg = fixture.config("qemu-diverge", Duration::from_secs(20));

    let mut programs = Vec::new();
    for name in ["a", "b"] {
        let dir = fixture.path("scratch").join(name);
        fs::create_dir_all(&dir).unwrap();
        let outcome = run_trial(&cfg, 5, &mut trial_rng(cfg.seed, 5), &dir)
            .await
            .unwrap();
        assert!(!outcome.passed);
        programs.push(fs::read_to_string(dir.join("out.S")).unwrap());
    }
    assert_eq!(programs[0], programs[1]);
}
