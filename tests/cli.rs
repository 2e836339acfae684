//! End-to-end runs of the loopcraft binary.

mod common;

use std::ffi::OsStr;

use common::{RANK_K_SCRIPT, SGEMM_KERNEL, SGEMM_SCRIPT, loopcraft, temp_file};

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_print_round_trips_kernel() {
    let kernel = temp_file(".lc", SGEMM_KERNEL);
    let output = loopcraft([OsStr::new("print"), kernel.path().as_os_str()]);
    assert!(output.status.success(), "{}", stderr(&output));

    let printed = stdout(&output);
    assert!(printed.starts_with("proc rank_k_reduce_6x16(K: size, C: f32[6, 16] @ DRAM"));

    let again = temp_file(".lc", &printed);
    let output = loopcraft([OsStr::new("print"), again.path().as_os_str()]);
    assert_eq!(stdout(&output), printed);
}

#[test]
fn test_schedule_prints_scheduled_kernel() {
    let kernel = temp_file(".lc", SGEMM_KERNEL);
    let script = temp_file(".sched", RANK_K_SCRIPT);
    let output = loopcraft([
        OsStr::new("schedule"),
        kernel.path().as_os_str(),
        script.path().as_os_str(),
    ]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.starts_with("proc rank_k_reduce_6x16_scheduled("));
    assert!(text.contains("C_reg: f32[6, 2, 8] @ AVX2;"));
}

#[test]
fn test_schedule_json_outcome() {
    let kernel = temp_file(".lc", SGEMM_KERNEL);
    let script = temp_file(".sched", "split(\"j\", 8, [\"jo\", \"ji\"], perfect = true)\n");
    let output = loopcraft([
        OsStr::new("schedule"),
        kernel.path().as_os_str(),
        script.path().as_os_str(),
        OsStr::new("--json"),
    ]);
    assert!(output.status.success(), "{}", stderr(&output));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["reference"]["name"], "rank_k_reduce_6x16");
    assert_eq!(json["trace"][0]["step"]["op"], "split");
    assert_eq!(json["trace"].as_array().map(Vec::len), Some(1));
}

#[test]
fn test_verify_sgemm() {
    let kernel = temp_file(".lc", SGEMM_KERNEL);
    let script = temp_file(".sched", SGEMM_SCRIPT);
    let output = loopcraft([
        OsStr::new("verify"),
        kernel.path().as_os_str(),
        script.path().as_os_str(),
        OsStr::new("--size"),
        OsStr::new("K=4"),
        OsStr::new("--seed"),
        OsStr::new("3"),
    ]);
    assert!(output.status.success(), "{}{}", stdout(&output), stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("C: max |diff| = 0"));
    assert!(text.contains("ok: `sgemm_6x16_avx2` matches `rank_k_reduce_6x16`"));
}

#[test]
fn test_failed_step_is_reported_at_its_line() {
    let kernel = temp_file(".lc", SGEMM_KERNEL);
    let script = temp_file(
        ".sched",
        "# tile j\nsplit(\"j\", 8, [\"jo\", \"ji\"], perfect = true)\nunroll(\"for k in _:_\")\n",
    );
    let output = loopcraft([
        OsStr::new("schedule"),
        kernel.path().as_os_str(),
        script.path().as_os_str(),
    ]);
    assert!(!output.status.success());
    let report = stderr(&output);
    assert!(report.contains("[NotConstantBound]"), "{report}");
    assert!(report.contains("step 1 `unroll` failed"), "{report}");
    assert!(report.contains("unroll(\"for k in _:_\")"), "{report}");
}

#[test]
fn test_script_syntax_error() {
    let kernel = temp_file(".lc", SGEMM_KERNEL);
    let script = temp_file(".sched", "split(\"j\", 8 [\"jo\", \"ji\"])\n");
    let output = loopcraft([
        OsStr::new("schedule"),
        kernel.path().as_os_str(),
        script.path().as_os_str(),
    ]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("[ParseError]"));
}

#[test]
fn test_missing_file() {
    let output = loopcraft(["print", "/nonexistent/kernel.lc"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("cannot read /nonexistent/kernel.lc"));
}
