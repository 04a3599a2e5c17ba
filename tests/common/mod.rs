#![allow(dead_code)]

use std::process::Command;

use bufkern::config::BackendConfig;
use bufkern::lower::{KernelSpec, LoweringOptions};
use bufkern::{Backing, BufferView, Element};
use tempfile::TempDir;

pub struct TestOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Emit C for `specs`, compile it together with `harness` and run the result.
pub fn compile_and_run_with_harness(
    specs: &[KernelSpec],
    options: &LoweringOptions,
    harness: &str,
) -> TestOutput {
    let kernels = bufkern::compile_to_c(specs, options).expect("C emission failed");
    run_c_sources(&kernels, harness)
}

/// Compile `kernels` followed by `harness` as one translation unit and run
/// the result. The harness sees the kernels' struct declarations.
pub fn run_c_sources(kernels: &str, harness: &str) -> TestOutput {
    let dir = TempDir::new().expect("failed to create temp dir");
    let source_path = dir.path().join("harness.c");
    let bin_path = dir.path().join("test_bin");
    std::fs::write(&source_path, format!("{kernels}\n{harness}")).expect("failed to write harness");

    bufkern::native::build_executable(&BackendConfig::from_env(), &[source_path.as_path()], &bin_path)
        .expect("C build failed");

    let output = Command::new(&bin_path)
        .output()
        .expect("failed to execute binary");
    TestOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    }
}

pub fn assert_c_harness(
    specs: &[KernelSpec],
    options: &LoweringOptions,
    harness: &str,
    expected: &str,
) {
    let result = compile_and_run_with_harness(specs, options, harness);
    assert_eq!(result.exit_code, 0, "harness failed: {}", result.stderr);
    assert_eq!(result.stdout.trim(), expected);
}

/// Deterministic values for a buffer of `n` elements, seeded by `seed`.
pub fn sample_values<T: Element>(n: usize, seed: u64) -> Vec<T> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..n)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let v = ((state >> 33) % 19) as f64 - 9.0;
            T::from_f64(v)
        })
        .collect()
}

pub fn view<'a, T: Element>(backing: &'a Backing<T>, dims: &[usize]) -> BufferView<'a, T> {
    BufferView::contiguous(backing, dims.to_vec()).expect("shape does not match backing")
}

/// Shapes exercised per rank, including an empty one.
pub fn shapes_for_rank(rank: usize) -> Vec<Vec<usize>> {
    match rank {
        0 => vec![vec![]],
        1 => vec![vec![0], vec![1], vec![5]],
        2 => vec![vec![2, 3], vec![3, 0], vec![1, 4]],
        _ => vec![vec![2, 3, 2], vec![1, 1, 3], vec![2, 0, 2]],
    }
}
