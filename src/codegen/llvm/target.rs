use inkwell::module::Module;
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::{
    CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetMachine,
};

use crate::error::KernelError;

pub(crate) fn opt_level_to_inkwell(level: u8) -> inkwell::OptimizationLevel {
    match level {
        0 => inkwell::OptimizationLevel::None,
        1 => inkwell::OptimizationLevel::Less,
        2 => inkwell::OptimizationLevel::Default,
        _ => inkwell::OptimizationLevel::Aggressive,
    }
}

pub fn initialize_native() -> crate::error::Result<()> {
    Target::initialize_native(&InitializationConfig::default())
        .map_err(|e| KernelError::codegen_error(format!("failed to initialize native target: {e}")))
}

/// Target machine for the host CPU.
pub fn create_target_machine(opt_level: u8) -> crate::error::Result<TargetMachine> {
    initialize_native()?;
    let triple = TargetMachine::get_default_triple();
    let target = Target::from_triple(&triple)
        .map_err(|e| KernelError::codegen_error(format!("failed to get target: {e}")))?;
    let cpu = TargetMachine::get_host_cpu_name();
    let features = TargetMachine::get_host_cpu_features();
    target
        .create_target_machine(
            &triple,
            &cpu.to_string(),
            &features.to_string(),
            opt_level_to_inkwell(opt_level),
            RelocMode::PIC,
            CodeModel::Default,
        )
        .ok_or_else(|| KernelError::codegen_error("failed to create target machine"))
}

pub fn optimize_module(
    module: &Module,
    machine: &TargetMachine,
    opt_level: u8,
) -> crate::error::Result<()> {
    let passes = format!("default<O{}>", opt_level.min(3));
    let opts = PassBuilderOptions::create();
    module
        .run_passes(&passes, machine, opts)
        .map_err(|e| KernelError::codegen_error(format!("pass pipeline failed: {e}")))?;
    Ok(())
}

pub fn write_object_file(
    module: &Module,
    path: &std::path::Path,
    opt_level: u8,
) -> crate::error::Result<()> {
    let machine = create_target_machine(opt_level)?;
    if opt_level > 0 {
        optimize_module(module, &machine, opt_level)?;
    }
    machine
        .write_to_file(module, FileType::Object, path)
        .map_err(|e| KernelError::codegen_error(format!("failed to write object file: {e}")))
}
