//! The register-allocating compiler binary. Takes a JSON-encoded Jack class
//! AST and an optional output stage, and prints that stage's result.
//!
//! Run with `--help` for more info.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use jackreg::back::emit_class;
use jackreg::front::ast::Class;
use jackreg::middle::{allocate, flatten_class};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// A JSON-encoded `front::ast::Class` (see `front::ast` for the schema).
    file: PathBuf,
    /// Which stage's output to print.
    #[arg(value_enum, short, long, default_value_t = Output::Asm)]
    out: Output,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Output {
    /// The parsed AST, echoed back as pretty JSON.
    Ast,
    /// The flattened IR, before register allocation.
    Ir,
    /// The allocated IR, after register allocation.
    Allocated,
    /// The resulting Hack assembly.
    Asm,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let class: Class = serde_json::from_str(&text).context("parsing class JSON")?;

    match args.out {
        Output::Ast => println!("{}", serde_json::to_string_pretty(&class)?),
        Output::Ir => println!("{:#?}", flatten_class(&class)),
        Output::Allocated => println!("{:#?}", allocate(&flatten_class(&class))),
        Output::Asm => println!("{}", emit_class(&allocate(&flatten_class(&class)))),
    }

    Ok(())
}
