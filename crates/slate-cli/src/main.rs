//! SlateScript command-line tool
//!
//! Runs a compiled `.ssasm` program and prints its return value. Exit
//! codes: 0 on success, 1 on usage errors (from clap), 2 on runtime errors.

use anyhow::Context;
use clap::Parser;
use slate_runtime::Session;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "slate")]
#[command(about = "SlateScript virtual machine", long_about = None)]
#[command(version)]
struct Cli {
    /// Compiled program (.ssasm)
    program: PathBuf,

    /// Print the instruction listing instead of executing
    #[arg(long)]
    disassemble: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let mut session = Session::new();
    session
        .load(&cli.program)
        .with_context(|| format!("failed to load {}", cli.program.display()))?;

    if cli.disassemble {
        let program = session
            .program()
            .expect("program loaded one line above");
        let heading = cli
            .program
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "program".to_string());
        print!("{}", slate_bytecode::disassemble(program, &heading));
        return Ok(());
    }

    let result = session.run()?;
    println!("{}", session.vm().heap().value_to_string(result));
    Ok(())
}
