//! Randomized semantic preservation checks.

mod common;

use std::collections::BTreeMap;

use loopcraft::{Schedule, VerifyOptions, verify};
use loopcraft_ir::parse_proc;
use loopcraft_passes::TemplateCatalog;
use proptest::prelude::*;

const MIXED: &str = "proc mixed(N: size, y: f32[N] @ DRAM, x: f64[N] @ DRAM, w: f64[N] @ DRAM, s: i32[N] @ DRAM) {
  for i in seq(N) {
    y[i] = x[i] * w[i] + s[i];
    s[i] = s[i] * 3;
  }
}";

fn options(k: i64, seed: u64) -> VerifyOptions {
    VerifyOptions {
        sizes: BTreeMap::from([("K".to_owned(), k)]),
        seed,
        tolerance: 0.0,
    }
}

fn check(schedule: Schedule, k: i64, seed: u64) -> Result<(), TestCaseError> {
    let (reference, catalog) = common::sgemm_reference();
    let outcome = schedule
        .apply(&reference, &catalog)
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    let report = verify(&reference, &outcome.scheduled, &catalog, &options(k, seed))
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    prop_assert!(report.passed(), "{:?}\n{}", report, outcome.scheduled);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_imperfect_split_of_reduction(factor in 1i64..7, k in 1i64..9, seed in any::<u64>()) {
        let schedule = Schedule::new()
            .split("k", factor, ["ko", "ki"], false)
            .simplify();
        check(schedule, k, seed)?;
    }

    #[test]
    fn prop_tiling_and_reorder(
        tile in prop::sample::select(vec![1i64, 2, 4, 8, 16]),
        k in 1i64..5,
        seed in any::<u64>(),
    ) {
        let schedule = Schedule::new()
            .split("j", tile, ["jo", "ji"], true)
            .reorder("ji", "k")
            .reorder("jo", "k")
            .par_to_seq("k")
            .simplify();
        check(schedule, k, seed)?;
    }

    #[test]
    fn prop_staged_register_tile(k in 1i64..6, seed in any::<u64>()) {
        let schedule: Schedule = common::RANK_K_SCRIPT.parse().map_err(|e| TestCaseError::fail(format!("{e}")))?;
        check(schedule, k, seed)?;
    }

    #[test]
    fn prop_bind_then_simplify_on_mixed_types(
        expr in prop::sample::select(vec!["x[i]", "w[i]", "s[i] #0", "x[_] * w[_]", "_ * w[_] + s[_]"]),
        n in 1i64..20,
        seed in any::<u64>(),
    ) {
        let reference = parse_proc(MIXED).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let catalog = TemplateCatalog::new();
        let outcome = Schedule::new()
            .bind_expr("t", expr)
            .simplify()
            .apply(&reference, &catalog)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let options = VerifyOptions {
            sizes: BTreeMap::from([("N".to_owned(), n)]),
            seed,
            tolerance: 0.0,
        };
        let report = verify(&reference, &outcome.scheduled, &catalog, &options)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert!(report.passed(), "{:?}\n{}", report, outcome.scheduled);
    }
}
