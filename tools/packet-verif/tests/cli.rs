#![cfg(all(unix, not(target_arch = "wasm32")))]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use packet_gen::SECTION_NAMES;
use packet_harness::exec::shell_quote;
use predicates::prelude::*;

const DESCRIPTOR: &str = r#"{
    "arch": "v73",
    "instructions": {
        "A2_add": { "syntax": "Rd32=add(Rs32,Rt32)", "attrs": "" },
        "A2_addi": { "syntax": "Rd32=add(Rs32,#s16)", "attrs": "" },
        "S2_asl_i_r": { "syntax": "Rd32=asl(Rs32,#u5)", "attrs": "" }
    }
}"#;

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

const FAKE_LLDB: &str = r#"#!/bin/sh
case "${LLDB_HEXAGON_QEMU_PATH:-}" in
    *broken*) echo "r00 = 0x00000bad" ;;
esac
cat "$4"
"#;

fn packet_verif() -> Command {
    let mut cmd = Command::cargo_bin("packet-verif").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("PACKET_VERIF_QEMU")
        .env_remove("PACKET_VERIF_ISET")
        .env_remove("PACKET_VERIF_TOOLCHAIN");
    cmd
}

fn executable(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

fn toolchain(root: &Path) -> PathBuf {
    let dir = root.join("toolchain");
    fs::create_dir_all(&dir).unwrap();
    executable(&dir.join("hexagon-clang"), FAKE_CC);
    executable(&dir.join("hexagon-lldb"), FAKE_LLDB);
    executable(&root.join("qemu-good"), "#!/bin/sh\nexit 0\n");
    executable(&root.join("qemu-broken"), "#!/bin/sh\nexit 0\n");
    fs::write(root.join("iset.json"), DESCRIPTOR).unwrap();
    fs::create_dir_all(root.join("scratch")).unwrap();
    fs::create_dir_all(root.join("stats")).unwrap();
    dir
}

fn run_args(root: &Path, qemu: &str) -> Vec<String> {
    let path = |name: &str| root.join(name).display().to_string();
    vec![
        "run".into(),
        "-n".into(),
        "2".into(),
        "-j".into(),
        "2".into(),
        "-p".into(),
        "2".into(),
        "-i".into(),
        "2".into(),
        "-q".into(),
        path(qemu),
        "-t".into(),
        path("iset.json"),
        "--toolchain-path".into(),
        path("toolchain"),
        "--scratch-dir".into(),
        path("scratch"),
        "--stats-dir".into(),
        path("stats"),
        "-o".into(),
        path("failures"),
        "--seed".into(),
        "0x1234".into(),
        "-l".into(),
        "0".into(),
    ]
}

fn stats_files(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("verif_stats_") && name.ends_with(".json"))
        })
        .collect()
}

#[test]
fn help_lists_subcommands() {
    packet_verif()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("combine-stats"))
        .stdout(predicate::str::contains("subst"))
        .stdout(predicate::str::contains("normalize"));
}

#[test]
fn run_with_identical_engines_passes() {
    let tmp = tempfile::tempdir().unwrap();
    toolchain(tmp.path());

    packet_verif()
        .args(run_args(tmp.path(), "qemu-good"))
        .arg("-e")
        .assert()
        .success()
        .stdout(predicate::str::contains("Comparing:"))
        .stdout(predicate::str::contains("BASE: "))
        .stdout(predicate::str::contains("hexagon-sim"))
        .stdout(predicate::str::contains("2 passes out of 2 runs"))
        .stdout(predicate::str::contains("packets/sec"));

    let stats = stats_files(&tmp.path().join("stats"));
    assert_eq!(stats.len(), 1);
    let text = fs::read_to_string(&stats[0]).unwrap();
    assert!(text.starts_with("{\n    \"inst_counts\": {"));
    assert!(!tmp.path().join("failures").exists());
}

#[test]
fn failing_run_sets_exit_code_only_when_asked() {
    let tmp = tempfile::tempdir().unwrap();
    toolchain(tmp.path());

    packet_verif()
        .args(run_args(tmp.path(), "qemu-broken"))
        .assert()
        .success()
        .stdout(predicate::str::contains("0 passes out of 2 runs"));

    packet_verif()
        .args(run_args(tmp.path(), "qemu-broken"))
        .arg("-e")
        .assert()
        .failure();

    let archived: Vec<PathBuf> = fs::read_dir(tmp.path().join("failures"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(archived.len(), 4);
    for dir in &archived {
        let repro = fs::read_to_string(dir.join("repro.sh")).unwrap();
        assert!(repro.contains(&format!("DIR={}", shell_quote(&dir.to_string_lossy()))));
    }
}

#[test]
fn missing_toolchain_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    executable(&tmp.path().join("qemu-good"), "#!/bin/sh\nexit 0\n");
    fs::write(tmp.path().join("iset.json"), DESCRIPTOR).unwrap();

    packet_verif()
        .args(run_args(tmp.path(), "qemu-good"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("locate toolchain"));
}

#[test]
fn combine_stats_sums_counts() {
    let tmp = tempfile::tempdir().unwrap();
    let a = tmp.path().join("a.json");
    let b = tmp.path().join("b.json");
    let out = tmp.path().join("combined.json");
    fs::write(&a, r#"{"inst_counts": {"A2_add": 3, "J2_jump": 1}}"#).unwrap();
    fs::write(&b, r#"{"inst_counts": {"A2_add": 2, "S2_asl_i_r": 4}}"#).unwrap();

    packet_verif()
        .arg("combine-stats")
        .arg(&a)
        .arg(&b)
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    assert_eq!(
        fs::read_to_string(&out).unwrap(),
        "{\n    \"inst_counts\": {\n        \"A2_add\": 5,\n        \"J2_jump\": 1,\n        \"S2_asl_i_r\": 4\n    }\n}\n"
    );
}

#[test]
fn combine_stats_rejects_bad_input() {
    let tmp = tempfile::tempdir().unwrap();
    let bad = tmp.path().join("bad.json");
    fs::write(&bad, "not json").unwrap();

    packet_verif()
        .arg("combine-stats")
        .arg(&bad)
        .arg("-o")
        .arg(tmp.path().join("out.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("combine statistics"));
}

#[test]
fn subst_renders_sections_with_directory_template() {
    let tmp = tempfile::tempdir().unwrap();
    for name in SECTION_NAMES {
        fs::write(tmp.path().join(name), format!("<{name}>")).unwrap();
    }
    let mut template = String::from("start $gpr_init ${test_packets} $$end\n");
    let mut expected = String::from("start <gpr_init> <test_packets> $end\n");
    for name in SECTION_NAMES {
        template.push_str(&format!("${name}\n"));
        expected.push_str(&format!("<{name}>\n"));
    }
    fs::write(tmp.path().join("test_case.tmpl"), template).unwrap();

    packet_verif().arg("subst").arg(tmp.path()).assert().success();

    assert_eq!(
        fs::read_to_string(tmp.path().join("out_repro.S")).unwrap(),
        expected
    );
}

#[test]
fn subst_rejects_templates_missing_sections() {
    let tmp = tempfile::tempdir().unwrap();
    for name in SECTION_NAMES {
        fs::write(tmp.path().join(name), format!("<{name}>")).unwrap();
    }
    fs::write(tmp.path().join("test_case.tmpl"), "main:\n    $gpr_init\n").unwrap();

    packet_verif()
        .arg("subst")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing required section"));
    assert!(!tmp.path().join("out_repro.S").exists());
}

#[test]
fn subst_reports_missing_sections() {
    let tmp = tempfile::tempdir().unwrap();
    packet_verif()
        .arg("subst")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("read sections"));
}

#[test]
fn normalize_rewrites_in_place() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("base_output.txt");
    fs::write(
        &file,
        "(lldb) register read r0\n       r00 = 0x00000001\n\nDone!\nProcess 7 exited with status = 0\n",
    )
    .unwrap();

    packet_verif().arg("normalize").arg(&file).assert().success();

    assert_eq!(fs::read_to_string(&file).unwrap(), "        r0 = 0x00000001");
}
