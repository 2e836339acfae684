//! Common test utilities for integration tests.

use std::io::Write;
use std::process::{Command, Output};

use loopcraft::KernelFile;
use loopcraft_ir::Proc;
use loopcraft_passes::TemplateCatalog;
use loopcraft_platforms::Platform;
use tempfile::NamedTempFile;

pub const SGEMM_KERNEL: &str = include_str!("../../demos/sgemm.lc");
pub const RANK_K_SCRIPT: &str = include_str!("../../demos/rank_k.sched");
pub const SGEMM_SCRIPT: &str = include_str!("../../demos/sgemm_avx2.sched");

/// The reference kernel of `demos/sgemm.lc` and the AVX2 catalog.
#[allow(dead_code)]
pub fn sgemm_reference() -> (Proc, TemplateCatalog) {
    let file = KernelFile::parse(SGEMM_KERNEL).expect("demo kernel parses");
    let catalog = file.catalog(Platform::Avx2).expect("catalog loads");
    let kernel = file
        .checked_kernel(None, &catalog)
        .expect("demo kernel is well formed")
        .clone();
    (kernel, catalog)
}

/// Write `text` to a temporary file with the given suffix.
#[allow(dead_code)]
pub fn temp_file(suffix: &str, text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::with_suffix(suffix).expect("Failed to create temp file");
    file.write_all(text.as_bytes()).expect("Failed to write temp file");
    file
}

/// Run the loopcraft binary.
#[allow(dead_code)]
pub fn loopcraft<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_loopcraft"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute loopcraft")
}
