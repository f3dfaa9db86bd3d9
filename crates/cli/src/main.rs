//! orderer CLI entry point.

use clap::Parser;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "orderer")]
#[command(about = "A multi-channel ordering node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<commands::Commands>,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(cmd) => {
            if let Err(e) = commands::run(cmd) {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("orderer - A multi-channel ordering node");
            println!("Run 'orderer --help' for usage information.");
        }
    }
}
