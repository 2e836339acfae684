//! The 6x16 AVX2 sgemm micro-kernel, scheduled end to end.

mod common;

use std::collections::BTreeMap;

use common::{RANK_K_SCRIPT, SGEMM_SCRIPT, sgemm_reference};
use loopcraft::{Schedule, VerifyOptions, parse_script, verify};
use loopcraft_eval::{Args, Interpreter};
use loopcraft_ir::{MemorySpace, Stmt};

fn options(k: i64, seed: u64) -> VerifyOptions {
    VerifyOptions {
        sizes: BTreeMap::from([("K".to_owned(), k)]),
        seed,
        tolerance: 0.0,
    }
}

fn schedule(text: &str) -> Schedule {
    parse_script(text).expect("demo script parses").schedule
}

#[test]
fn test_rank_k_schedule_preserves_results() {
    let (reference, catalog) = sgemm_reference();
    let outcome = schedule(RANK_K_SCRIPT).apply(&reference, &catalog).unwrap();
    assert_eq!(outcome.scheduled.name, "rank_k_reduce_6x16_scheduled");
    for (k, seed) in [(1, 0), (4, 1), (9, 2)] {
        let report = verify(&reference, &outcome.scheduled, &catalog, &options(k, seed)).unwrap();
        assert!(report.passed(), "K = {k}: {report:?}");
    }
}

#[test]
fn test_rank_k_schedule_hoists_loads_and_stores() {
    let (reference, catalog) = sgemm_reference();
    let outcome = schedule(RANK_K_SCRIPT).apply(&reference, &catalog).unwrap();
    let top = &outcome.scheduled.body.stmts;

    // C_reg: f32[6, 2, 8] @ AVX2, then the load nest, the k loop and the store nest
    let Stmt::Alloc(c_reg) = &top[0] else {
        panic!("expected the register tile first, found {}", top[0]);
    };
    assert_eq!(c_reg.name, "C_reg");
    assert_eq!(c_reg.mem, MemorySpace::Avx2);
    assert_eq!(
        c_reg.shape.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
        ["6", "2", "8"]
    );
    assert_eq!(top.len(), 4);
    let loop_vars: Vec<&str> = top[1..]
        .iter()
        .map(|s| s.as_loop().map(|l| l.var.as_str()).unwrap_or("?"))
        .collect();
    assert_eq!(loop_vars, ["i", "k", "i"]);

    let text = outcome.scheduled.to_string();
    assert_eq!(text.matches("for k in seq(K)").count(), 1);
    assert!(text.contains("C_reg[i, jo, ji] = C[i, 8 * jo + ji];"));
    assert!(text.contains("C[i, 8 * jo + ji] = C_reg[i, jo, ji];"));
}

#[test]
fn test_sgemm_schedule_uses_avx2_templates() {
    let (reference, catalog) = sgemm_reference();
    let outcome = schedule(SGEMM_SCRIPT).apply(&reference, &catalog).unwrap();
    let text = outcome.scheduled.to_string();

    assert_eq!(outcome.scheduled.name, "sgemm_6x16_avx2");
    for template in [
        "mm256_loadu_ps(",
        "mm256_broadcast_ss(",
        "mm256_fmadd_ps(",
        "mm256_storeu_ps(",
    ] {
        assert!(text.contains(template), "missing {template} in\n{text}");
    }
    // every loop but k is unrolled or replaced
    assert!(!text.contains("for i "), "{text}");
    assert!(!text.contains("for jo "), "{text}");
    assert!(!text.contains("for ji "), "{text}");
    assert_eq!(text.matches("for k in seq(K)").count(), 1);
    assert_eq!(text.matches("mm256_storeu_ps(").count(), 12);
    assert!(text.contains("mm256_storeu_ps(C[5, 8:16], C_reg[5, 1, 0:8]);"), "{text}");
}

#[test]
fn test_sgemm_matches_naive_matmul_exactly() {
    let (reference, catalog) = sgemm_reference();
    let outcome = schedule(SGEMM_SCRIPT).apply(&reference, &catalog).unwrap();

    let sizes = BTreeMap::from([("K".to_owned(), 5)]);
    let fill = |decl: &loopcraft_ir::BufferDecl, i: usize| match decl.name.as_str() {
        "A" => (i % 7) as f64 * 0.25 - 0.5,
        "B" => (i % 5) as f64 * 0.125 + 0.1,
        _ => (i % 3) as f64,
    };
    let inputs = Args::for_proc(&reference, &sizes, fill).unwrap();

    let mut scheduled = inputs.clone();
    Interpreter::with_templates(&catalog)
        .run(&outcome.scheduled, &mut scheduled)
        .unwrap();

    // naive matmul in k order, each update rounded once to f32
    let a = &inputs.buffers["A"];
    let b = &inputs.buffers["B"];
    let c0 = &inputs.buffers["C"];
    let c = &scheduled.buffers["C"];
    for i in 0..6i64 {
        for j in 0..16i64 {
            let mut acc = c0.get(&[i, j]).unwrap();
            for k in 0..5i64 {
                acc = (acc + a.get(&[i, k]).unwrap() * b.get(&[k, j]).unwrap()) as f32 as f64;
            }
            assert_eq!(c.get(&[i, j]).unwrap(), acc, "C[{i}, {j}]");
        }
    }
}

#[test]
fn test_sgemm_verifies_for_several_depths() {
    let (reference, catalog) = sgemm_reference();
    let outcome = schedule(SGEMM_SCRIPT).apply(&reference, &catalog).unwrap();
    for (k, seed) in [(1, 11), (3, 12), (16, 13)] {
        let report = verify(&reference, &outcome.scheduled, &catalog, &options(k, seed)).unwrap();
        assert!(report.passed(), "K = {k}: {report:?}");
        assert_eq!(report.max_abs_diff(), 0.0);
    }
}

#[test]
fn test_every_intermediate_kernel_preserves_results() {
    let (reference, catalog) = sgemm_reference();
    let outcome = schedule(SGEMM_SCRIPT).apply(&reference, &catalog).unwrap();
    for (index, entry) in outcome.trace.iter().enumerate() {
        let report = verify(&reference, &entry.kernel, &catalog, &options(3, index as u64)).unwrap();
        assert!(report.passed(), "after step {index} `{}`: {report:?}", entry.step);
    }
}
