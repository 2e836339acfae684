//! Scheduling scenarios on small kernels.

mod common;

use std::collections::{BTreeMap, BTreeSet};

use loopcraft::{Schedule, VerifyOptions, verify};
use loopcraft_eval::{Args, Interpreter};
use loopcraft_ir::select::{SelectError, Selector, resolve};
use loopcraft_ir::{Proc, Stmt, parse_proc, validate};
use loopcraft_passes::{ScheduleError, TemplateCatalog, simplify};

const RANK_K: &str = "proc rank_k(K: size, C: f32[6, 16] @ DRAM, A: f32[6, K] @ DRAM, B: f32[K, 16] @ DRAM) {
  for i in par(6) {
    for j in par(16) {
      for k in par(K) {
        C[i, j] += A[i, k] * B[k, j];
      }
    }
  }
}";

fn loop_nest(proc: &Proc) -> Vec<String> {
    let mut vars = Vec::new();
    let mut stmts = &proc.body.stmts;
    while let [Stmt::Loop(l)] = stmts.as_slice() {
        vars.push(l.var.clone());
        stmts = &l.body.stmts;
    }
    vars
}

#[test]
fn test_split_and_reorder_matches_naive_matmul() {
    let reference = parse_proc(RANK_K).unwrap();
    let catalog = TemplateCatalog::new();
    let outcome = Schedule::new()
        .split("j", 8, ["jo", "ji"], true)
        .reorder("ji", "k")
        .apply(&reference, &catalog)
        .unwrap();
    assert_eq!(loop_nest(&outcome.scheduled), ["i", "jo", "k", "ji"]);

    // small integers keep every product and sum exact in f32
    let sizes = BTreeMap::from([("K".to_owned(), 4)]);
    let mut args = Args::for_proc(&reference, &sizes, |decl, i| match decl.name.as_str() {
        "A" => (i % 5) as f64 - 2.0,
        "B" => (i % 3) as f64 + 1.0,
        _ => 0.0,
    })
    .unwrap();
    let a = args.buffers["A"].clone();
    let b = args.buffers["B"].clone();
    Interpreter::new().run(&outcome.scheduled, &mut args).unwrap();

    let c = &args.buffers["C"];
    for i in 0..6i64 {
        for j in 0..16i64 {
            let expected: f64 = (0..4i64)
                .map(|k| a.get(&[i, k]).unwrap() * b.get(&[k, j]).unwrap())
                .sum();
            assert_eq!(c.get(&[i, j]), Some(expected), "C[{i}, {j}]");
        }
    }
}

#[test]
fn test_illegal_reorder_fails_with_dependency_violation() {
    let reference = parse_proc(
        "proc shift(A: f32[5, 5] @ DRAM) {
          for i in seq(4) { for j in seq(4) { A[i + 1, j] = A[i, j + 1] + 1.0; } }
        }",
    )
    .unwrap();
    let err = Schedule::new()
        .rename("shift_reordered")
        .reorder("i", "j")
        .apply(&reference, &TemplateCatalog::new())
        .unwrap_err();
    assert_eq!(err.step_index, 1);
    assert!(matches!(err.source, ScheduleError::DependencyViolation { .. }));
    assert_eq!(err.last_good.name, "shift_reordered");
    assert_eq!(err.last_good.body, reference.body);
}

#[test]
fn test_staging_round_trip_preserves_results() {
    let reference = parse_proc(RANK_K).unwrap();
    let catalog = TemplateCatalog::new();
    let outcome = Schedule::new()
        .stage_assn("C_reg", "C[_] += _")
        .reorder("j", "k")
        .reorder("i", "k")
        .lift_alloc("C_reg:_", 2, false)
        .fission_after("C_reg = _ #0", 2)
        .fission_after("C_reg[_] += _ #0", 2)
        .par_to_seq("k")
        .lift_alloc("C_reg:_", 1, false)
        .fission_after("for i in _:_ #0", 1)
        .fission_after("for i in _:_ #1", 1)
        .apply(&reference, &catalog)
        .unwrap();
    for (k, seed) in [(1, 3), (2, 4), (6, 5)] {
        let options = VerifyOptions {
            sizes: BTreeMap::from([("K".to_owned(), k)]),
            seed,
            tolerance: 0.0,
        };
        let report = verify(&reference, &outcome.scheduled, &catalog, &options).unwrap();
        assert!(report.passed(), "K = {k}: {report:?}");
    }
}

#[test]
fn test_selector_ordinals_enumerate_matches_once() {
    let proc = Schedule::new()
        .split("j", 8, ["jo", "ji"], true)
        .unroll("jo")
        .apply(&parse_proc(RANK_K).unwrap(), &TemplateCatalog::new())
        .unwrap()
        .scheduled;

    let mut seen = BTreeSet::new();
    for k in 0..2 {
        let selector = Selector::parse(&format!("for ji in _:_ #{k}")).unwrap();
        let first = resolve(&proc, &selector).unwrap();
        assert_eq!(resolve(&proc, &selector).unwrap(), first);
        assert!(seen.insert(format!("{first:?}")));
    }
    assert!(matches!(
        resolve(&proc, &Selector::parse("for ji in _:_ #2").unwrap()),
        Err(SelectError::NotFound { .. })
    ));
    assert!(matches!(
        resolve(&proc, &Selector::parse("for ji in _:_").unwrap()),
        Err(SelectError::Ambiguous { count: 2, .. })
    ));
}

#[test]
fn test_simplify_is_idempotent_on_scheduled_kernel() {
    let (reference, catalog) = common::sgemm_reference();
    let outcome = Schedule::new()
        .split("j", 8, ["jo", "ji"], true)
        .split("i", 4, ["io", "ii"], false)
        .unroll("jo")
        .apply(&reference, &catalog)
        .unwrap();
    let once = simplify(&outcome.scheduled);
    assert_eq!(simplify(&once), once);
}

const SCALE: &str = "proc scale(N: size, y: f32[N] @ DRAM, x: f64[N] @ DRAM, w: f64[N] @ DRAM) {
  for i in seq(N) {
    y[i] = x[i] * w[i];
  }
}";

fn n_options(n: i64, seed: u64) -> VerifyOptions {
    VerifyOptions {
        sizes: BTreeMap::from([("N".to_owned(), n)]),
        seed,
        tolerance: 0.0,
    }
}

#[test]
fn test_bind_expr_keeps_mixed_precision_results() {
    let reference = parse_proc(SCALE).unwrap();
    let catalog = TemplateCatalog::new();
    let outcome = Schedule::new()
        .bind_expr("t", "x[i]")
        .bind_expr("u", "_ * w[_]")
        .apply(&reference, &catalog)
        .unwrap();
    let text = outcome.scheduled.to_string();
    assert!(text.contains("t: f64 @ DRAM;"), "{text}");
    assert!(text.contains("u: f64 @ DRAM;"), "{text}");
    assert!(text.contains("y[i] = u;"), "{text}");

    let report = verify(&reference, &outcome.scheduled, &catalog, &n_options(16, 3)).unwrap();
    assert!(report.passed(), "{report:?}");
}

#[test]
fn test_simplify_removes_dead_temporary_and_stays_valid() {
    let reference = parse_proc(
        "proc f(N: size, x: f32[N] @ DRAM) {
          for i in seq(N) { t: f32 @ DRAM; t = x[i]; t += 1.0; x[i] = x[i] * 2.0; }
        }",
    )
    .unwrap();
    let catalog = TemplateCatalog::new();
    let outcome = Schedule::new().simplify().apply(&reference, &catalog).unwrap();
    assert_eq!(validate(&outcome.scheduled, None), Ok(()));
    assert!(!outcome.scheduled.to_string().contains("t ="));

    let report = verify(&reference, &outcome.scheduled, &catalog, &n_options(7, 1)).unwrap();
    assert!(report.passed(), "{report:?}");
}
