use std::path::PathBuf;
use std::process;

use bufkern::config::BackendConfig;
use bufkern::error::{format_with_source, KernelError};
use bufkern::lower::{KernelOutput, KernelSpec, LoweringOptions};
use bufkern::{ElementType, ReduceOp};

struct Options {
    name: String,
    operands: Vec<String>,
    combiner: String,
    output: KernelOutput,
    dtype: ElementType,
    rank: usize,
    lowering: LoweringOptions,
    #[cfg_attr(not(feature = "llvm"), allow(dead_code))]
    opt_level: u8,
    output_path: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            name: "dot_product".to_string(),
            operands: vec!["a".to_string(), "b".to_string()],
            combiner: "a * b".to_string(),
            output: KernelOutput::Reduce(ReduceOp::Sum),
            dtype: ElementType::F64,
            rank: 1,
            lowering: LoweringOptions::default(),
            opt_level: 2,
            output_path: None,
        }
    }
}

fn print_usage() {
    eprintln!("Usage: bufkern <command> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  emit-c      print C source for the kernel");
    eprintln!("  emit-ir     print the lowered loop IR");
    eprintln!("  emit-llvm   print LLVM IR (object file if -o ends in .o)");
    eprintln!("  build       build a shared library and manifest into -o DIR");
    eprintln!("  manifest    print the JSON manifest");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --name NAME            kernel name (default dot_product)");
    eprintln!("  --operands a,b         operand buffer names (default a,b)");
    eprintln!("  --combiner EXPR        elementwise combiner (default \"a * b\")");
    eprintln!("  --reduce OP            sum | product | max | min (default sum)");
    eprintln!("  --map                  write combined elements to an output buffer");
    eprintln!("  --dtype T              i32 | i64 | f32 | f64 (default f64)");
    eprintln!("  --rank N               buffer rank (default 1)");
    eprintln!("  --no-empty-guard       omit the zero-length early return");
    eprintln!("  --opt-level=N          LLVM optimization level 0-3 (default 2)");
    eprintln!("  -o PATH                output file or directory");
}

fn fail(e: &KernelError, combiner: &str) -> ! {
    eprintln!("{}", format_with_source(e, "combiner", combiner));
    process::exit(1);
}

fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> &'a str {
    *i += 1;
    match args.get(*i) {
        Some(v) => v,
        None => {
            eprintln!("error: {flag} requires an argument");
            process::exit(1);
        }
    }
}

fn parse_options(args: &[String]) -> Options {
    let mut opts = Options::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--name" => opts.name = value(args, &mut i, "--name").to_string(),
            "--operands" => {
                opts.operands = value(args, &mut i, "--operands")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "--combiner" => opts.combiner = value(args, &mut i, "--combiner").to_string(),
            "--reduce" => {
                let op = value(args, &mut i, "--reduce");
                match ReduceOp::parse(op) {
                    Ok(op) => opts.output = KernelOutput::Reduce(op),
                    Err(e) => {
                        eprintln!("{e}");
                        process::exit(1);
                    }
                }
            }
            "--map" => opts.output = KernelOutput::Map,
            "--dtype" => {
                let name = value(args, &mut i, "--dtype");
                match ElementType::parse(name) {
                    Ok(dtype) => opts.dtype = dtype,
                    Err(e) => {
                        eprintln!("{e}");
                        process::exit(1);
                    }
                }
            }
            "--rank" => {
                let raw = value(args, &mut i, "--rank");
                match raw.parse::<usize>() {
                    Ok(rank) => opts.rank = rank,
                    Err(_) => {
                        eprintln!("error: --rank must be a non-negative integer, got '{raw}'");
                        process::exit(1);
                    }
                }
            }
            "--no-empty-guard" => opts.lowering.empty_guard = false,
            s if s.starts_with("--opt-level=") => {
                let val = &s["--opt-level=".len()..];
                match val.parse::<u8>() {
                    Ok(v) if v <= 3 => opts.opt_level = v,
                    _ => {
                        eprintln!("error: --opt-level must be 0, 1, 2, or 3");
                        process::exit(1);
                    }
                }
            }
            "-o" => opts.output_path = Some(PathBuf::from(value(args, &mut i, "-o"))),
            other => {
                eprintln!("error: unknown option '{other}'");
                process::exit(1);
            }
        }
        i += 1;
    }
    opts
}

fn write_or_print(text: &str, path: &Option<PathBuf>) {
    match path {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("error: cannot write '{}': {e}", path.display());
                process::exit(1);
            }
            eprintln!("wrote {}", path.display());
        }
        None => println!("{text}"),
    }
}

fn main() {
    pretty_env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() {
        print_usage();
        process::exit(1);
    }

    let command = args[0].as_str();
    match command {
        "--help" | "-h" => {
            print_usage();
            return;
        }
        "--version" | "-V" => {
            println!("bufkern {}", env!("CARGO_PKG_VERSION"));
            return;
        }
        "emit-c" | "emit-ir" | "emit-llvm" | "build" | "manifest" => {}
        other => {
            eprintln!("error: unknown command '{other}'");
            print_usage();
            process::exit(1);
        }
    }

    let opts = parse_options(&args[1..]);
    let operands: Vec<&str> = opts.operands.iter().map(String::as_str).collect();
    let spec = match KernelSpec::from_source(
        &opts.name,
        opts.dtype,
        opts.rank,
        &operands,
        &opts.combiner,
        opts.output,
    ) {
        Ok(spec) => spec,
        Err(e) => fail(&e, &opts.combiner),
    };
    let specs = [spec];

    match command {
        "emit-c" => match bufkern::compile_to_c(&specs, &opts.lowering) {
            Ok(source) => write_or_print(&source, &opts.output_path),
            Err(e) => fail(&e, &opts.combiner),
        },
        "emit-ir" => match bufkern::lower(&specs, &opts.lowering) {
            Ok(module) => write_or_print(&module.to_string(), &opts.output_path),
            Err(e) => fail(&e, &opts.combiner),
        },
        "manifest" => {
            let library = format!("{}{}", opts.name, BackendConfig::from_env().shared_library_suffix);
            let json = bufkern::manifest::generate_json(&specs, &library);
            write_or_print(json.trim_end(), &opts.output_path);
        }
        "build" => {
            let dir = opts.output_path.clone().unwrap_or_else(|| PathBuf::from("."));
            let config = BackendConfig::from_env();
            match bufkern::build_library(&specs, &opts.lowering, &config, &dir, &opts.name) {
                Ok(out) => {
                    eprintln!(
                        "built {} -> {} (manifest {})",
                        out.source.display(),
                        out.library.display(),
                        out.manifest.display()
                    );
                }
                Err(e) => fail(&e, &opts.combiner),
            }
        }
        // emit-llvm
        _ => emit_llvm(&specs, &opts),
    }
}

#[cfg(feature = "llvm")]
fn emit_llvm(specs: &[KernelSpec], opts: &Options) {
    use bufkern::codegen::llvm::{emit_object, JitOptions};

    let jit = JitOptions {
        opt_level: opts.opt_level,
    };
    let module = match bufkern::lower(specs, &opts.lowering) {
        Ok(module) => module,
        Err(e) => fail(&e, &opts.combiner),
    };
    match &opts.output_path {
        Some(path) if path.extension().is_some_and(|ext| ext == "o") => {
            if let Err(e) = emit_object(&module, path, &jit) {
                fail(&e, &opts.combiner);
            }
            eprintln!("wrote {}", path.display());
        }
        path => match bufkern::codegen::llvm::emit_llvm_ir(&module, &jit) {
            Ok(ir) => write_or_print(ir.trim_end(), path),
            Err(e) => fail(&e, &opts.combiner),
        },
    }
}

#[cfg(not(feature = "llvm"))]
fn emit_llvm(_specs: &[KernelSpec], _opts: &Options) {
    eprintln!("error: emit-llvm requires the 'llvm' feature");
    process::exit(1);
}
