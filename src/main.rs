use std::process;

use clap::Parser;

use filemaster::cli::Cli;
use filemaster::error::UserError;

fn main() {
    // Translate Ctrl-C into a clean abort. Nothing needs to be rolled back;
    // partial state is durable by design through the atomic stores and the
    // cache write log.
    let _ = ctrlc::set_handler(|| {
        eprintln!("Operation interrupted.");
        process::exit(1);
    });

    let cli = Cli::parse();

    match filemaster::run(cli) {
        Ok(()) => {}
        Err(e) if e.downcast_ref::<UserError>().is_some() => {
            eprintln!("error: {e}");
            process::exit(2);
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(3);
        }
    }
}
