use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ls8_emu::{loader, Cpu};

#[derive(Parser, Debug)]
#[command(name = "ls8")]
#[command(about = "Run an LS-8 program", long_about = None)]
struct Args {
    /// Program source file, one binary byte literal per line
    program: PathBuf,

    /// Print the final machine state after the program halts
    #[arg(long)]
    dump: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let image = loader::load_file(&args.program)
        .with_context(|| format!("loading {}", args.program.display()))?;

    let mut cpu = Cpu::new();
    cpu.load(&image)?;
    cpu.run().context("execution aborted")?;

    for value in cpu.output() {
        println!("{value}");
    }

    if args.dump {
        let state = &cpu.state;
        println!("pc:   {:#04x}", state.program_counter());
        println!(
            "flag: {}",
            state
                .flag()
                .map_or_else(|| "unset".to_owned(), |f| format!("{f:?}"))
        );
        for (idx, value) in state.registers().as_slice().iter().enumerate() {
            println!("r{idx}:   {value:#04x}");
        }
    }

    Ok(())
}
