use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueHint};
use flatjit_compiler::CompilationHost;
use flatjit_compiler_mir::PrettyPrint;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "flatjit - Inspect value-object scalarization plans and call-site adapters",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the scalarization plan of one method, or of every method
    Plan {
        #[command(flatten)]
        inputs: Inputs,

        /// Method to plan, as `Holder.name`
        #[arg(short, long)]
        method: Option<String>,
    },
    /// Print the code a boxed caller runs around a call to a method
    Adapter {
        #[command(flatten)]
        inputs: Inputs,

        /// Method to call, as `Holder.name`
        #[arg(short, long)]
        method: String,

        /// Treat the call as an unresolved virtual call
        #[arg(long)]
        virtual_call: bool,
    },
}

#[derive(Args, Debug)]
struct Inputs {
    /// Type and method metadata (JSON)
    #[arg(long, value_hint = ValueHint::FilePath)]
    metadata: PathBuf,

    /// Compiler configuration (TOML)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
}

impl Inputs {
    fn load(&self) -> Result<CompilationHost> {
        CompilationHost::from_files(&self.metadata, self.config.as_deref())
            .with_context(|| format!("Failed to load '{}'", self.metadata.display()))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Plan { inputs, method } => {
            let host = inputs.load()?;
            let plans = match method {
                Some(method) => vec![host.plan(&method)?],
                None => host.plan_all()?,
            };
            for plan in plans {
                print!("{}", plan.pretty_print(0));
            }
        }
        Command::Adapter {
            inputs,
            method,
            virtual_call,
        } => {
            let host = inputs.load()?;
            let adapter = host
                .adapter(&method, !virtual_call)
                .with_context(|| format!("Failed to build the adapter for '{method}'"))?;
            print!("{}", adapter.pretty_print(0));
        }
    }

    Ok(())
}
