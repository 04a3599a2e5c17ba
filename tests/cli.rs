use std::process::Command;

const REFERENCE: &str = include_str!("reference/dot_product_float64_1.c");

fn bufkern(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_bufkern"))
        .args(args)
        .output()
        .expect("failed to run bufkern")
}

#[test]
fn test_emit_c_defaults_reproduce_reference() {
    let out = bufkern(&["emit-c", "--no-empty-guard"]);
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), format!("{REFERENCE}\n"));
}

#[test]
fn test_emit_c_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dot.c");
    let out = bufkern(&["emit-c", "--no-empty-guard", "-o", path.to_str().unwrap()]);
    assert!(out.status.success());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), REFERENCE);
}

#[test]
fn test_emit_ir_shows_loop() {
    let out = bufkern(&[
        "emit-ir",
        "--name",
        "norm2",
        "--operands",
        "x",
        "--combiner",
        "x * x",
        "--dtype",
        "f32",
        "--rank",
        "2",
    ]);
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.starts_with("fn norm2(x: buffer<f32, 2>) -> f32 {"));
    assert!(text.contains("for i: index in 0..len(x) {"));
}

#[test]
fn test_manifest_for_map_kernel() {
    let out = bufkern(&[
        "manifest",
        "--name",
        "scale",
        "--operands",
        "v",
        "--combiner",
        "3 * v",
        "--map",
        "--dtype",
        "i64",
    ]);
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("\"output\": \"map\""));
    assert!(text.contains("\"dtype\": \"int64\""));
}

#[test]
fn test_parse_error_has_caret() {
    let out = bufkern(&["emit-c", "--combiner", "a * (b"]);
    assert!(!out.status.success());
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("combiner:1:"));
    assert!(err.contains("error[parse]"));
    assert!(err.contains("    a * (b"));
}

#[test]
fn test_unknown_operand_rejected() {
    let out = bufkern(&["emit-c", "--operands", "a", "--combiner", "a * b"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("error[lower]"));
}

#[test]
fn test_unknown_command() {
    let out = bufkern(&["frobnicate"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown command 'frobnicate'"));
}

#[test]
fn test_emit_llvm_opt_level() {
    let out = bufkern(&["emit-llvm", "--opt-level", "1"]);
    if cfg!(feature = "llvm") {
        assert!(out.status.success());
        assert!(String::from_utf8_lossy(&out.stdout).contains("define"));
    } else {
        assert!(!out.status.success());
        assert!(String::from_utf8_lossy(&out.stderr).contains("requires the 'llvm' feature"));
    }
    let out = bufkern(&["emit-llvm", "--opt-level", "4"]);
    assert!(!out.status.success());
}
