use std::fs::{self, File};
use std::io::{self, BufWriter, Write};

use anyhow::{Context, Result};
use clap::Parser;
use log::*;
use serde::Serialize;

use m68k_core::bus::Address;
use m68k_core::bus::ram::RamBus;
use m68k_core::cpu_m68k::cpu::Breakpoint;
use m68k_core::cpu_m68k::snapshot::{CpuSnapshot, TraceRecord};
use m68k_core::cpu_m68k::{
    CpuConfig, CpuM68k, CpuModel, ExecutionState, FidelityMode, FpuModel,
};
use m68k_core::debuggable::{Debuggable, render_properties};
use m68k_core::tickable::Ticks;

#[derive(Parser)]
#[command(about = "Runs a raw 680x0 binary image on the CPU core", long_about = None)]
struct Args {
    /// Binary image to load
    image: String,

    /// Cycle budget
    #[arg(short, long, default_value_t = 1_000_000)]
    cycles: Ticks,

    /// Load address of the image
    #[arg(long, value_parser = parse_address, default_value = "0")]
    load_addr: Address,

    /// RAM size in bytes
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    ram: usize,

    /// CPU configuration as JSON, overrides the model flags
    #[arg(long)]
    config: Option<String>,

    #[arg(long, default_value_t = CpuModel::M68000)]
    model: CpuModel,

    #[arg(long, default_value_t = FidelityMode::Fast)]
    mode: FidelityMode,

    #[arg(long)]
    fpu: Option<FpuModel>,

    #[arg(long)]
    mmu: bool,

    /// Force 32-bit addressing on models that also do 24-bit
    #[arg(long)]
    addr32: bool,

    /// Start at this PC instead of the reset vector
    #[arg(long, value_parser = parse_address)]
    pc: Option<Address>,

    /// Stop at this address
    #[arg(long, value_parser = parse_address)]
    breakpoint: Vec<Address>,

    /// Include an instruction trace in the output
    #[arg(long)]
    trace: bool,

    /// Print the processor state tree to stderr when done
    #[arg(long)]
    state: bool,

    /// Output file, stdout if omitted
    #[arg(short, long)]
    output: Option<String>,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct RunReport {
    state: ExecutionState,
    cycles: Ticks,
    bus_cycles: Ticks,
    snapshot: CpuSnapshot,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    trace: Vec<TraceRecord>,
}

fn parse_address(s: &str) -> Result<Address> {
    let s = s.trim();
    let v = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix('$')) {
        Address::from_str_radix(hex, 16)?
    } else {
        s.parse()?
    };
    Ok(v)
}

fn build_config(args: &Args) -> Result<CpuConfig> {
    if let Some(path) = args.config.as_deref() {
        let config = serde_json::from_reader(File::open(path).context("Cannot open config")?)?;
        return Ok(config);
    }

    let mut config = CpuConfig::for_model(args.model)
        .with_mode(args.mode)
        .with_fpu(args.fpu)
        .with_mmu(args.mmu);
    if args.addr32 {
        config = config.with_address_space_24(false);
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .init();

    let config = build_config(&args)?;
    config.validate()?;

    let image = fs::read(&args.image).with_context(|| format!("Cannot read {}", args.image))?;
    let mut bus = RamBus::new(args.ram, config.address_mask());
    bus.load(args.load_addr, &image)?;
    info!(
        "Loaded {} bytes at {:08X}, running {} on {}",
        image.len(),
        args.load_addr,
        config.model,
        config.mode
    );

    let mut cpu = CpuM68k::new(bus, config)?;
    cpu.reset()?;
    if let Some(pc) = args.pc {
        cpu.set_pc(pc)?;
    }
    for &addr in &args.breakpoint {
        cpu.set_breakpoint(Breakpoint::Execution(addr));
    }
    cpu.enable_trace(args.trace);

    let ran = cpu.run(args.cycles)?;
    match cpu.state() {
        ExecutionState::Halted => warn!("CPU halted at {:08X}", cpu.get_pc()),
        _ if cpu.breakpoint_hit.get_clear() => info!("Breakpoint at {:08X}", cpu.get_pc()),
        _ => (),
    }
    info!("Ran {} cycles ({} on the bus)", ran, cpu.bus.cycles());
    if args.state {
        let mut text = String::new();
        render_properties(&cpu.get_debug_properties(), &mut text)?;
        eprint!("{}", text);
    }

    let report = RunReport {
        state: cpu.state(),
        cycles: cpu.cycles,
        bus_cycles: cpu.bus.cycles(),
        snapshot: cpu.snapshot(),
        trace: cpu.take_trace(),
    };

    let mut out: Box<dyn Write> = match args.output.as_deref() {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };
    serde_json::to_writer_pretty(&mut out, &report)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses() {
        assert_eq!(parse_address("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_address("$FF").unwrap(), 0xFF);
        assert_eq!(parse_address("4096").unwrap(), 4096);
        assert!(parse_address("0xZZ").is_err());
    }

    #[test]
    fn flags_to_config() {
        let args = Args::parse_from([
            "runner", "img.bin", "--model", "68030", "--mode", "jit", "--addr32", "--fpu", "68882",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.model, CpuModel::M68030);
        assert_eq!(config.mode, FidelityMode::Jit);
        assert_eq!(config.fpu, Some(FpuModel::M68882));
        assert!(!config.address_space_24);
        assert!(config.validate().is_ok());
    }
}
