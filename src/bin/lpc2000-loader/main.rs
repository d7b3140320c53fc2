use std::process;

use clap::Parser;

mod cli;
mod commands;
mod exit_codes;
mod logging;
mod output;

fn main() {
    logging::init_tracing();

    let cli = cli::Cli::parse();

    let exit_code = match cli.command {
        cli::Command::Program(args) => {
            let mut out = output::make_for_program(&args);
            let code = commands::program::run(args, &mut *out);
            out.finish();
            code
        }
        cli::Command::Verify(args) => {
            let mut out = output::make_for_verify(&args);
            let code = commands::verify::run(args, &mut *out);
            out.finish();
            code
        }
        cli::Command::Erase(args) => {
            let mut out = output::make_for_erase(&args);
            let code = commands::erase::run(args, &mut *out);
            out.finish();
            code
        }
        cli::Command::BlankCheck(args) => {
            let mut out = output::make_simple(args.json);
            let code = commands::blank_check::run(args, &mut *out);
            out.finish();
            code
        }
        cli::Command::Identify(args) => {
            let mut out = output::make_simple(args.json);
            let code = commands::identify::run(args, &mut *out);
            out.finish();
            code
        }
        cli::Command::BootVersion(args) => {
            let mut out = output::make_simple(args.json);
            let code = commands::boot_version::run(args, &mut *out);
            out.finish();
            code
        }
        cli::Command::List(args) => {
            let mut out = output::make_simple(args.json);
            let code = commands::list::run(args, &mut *out);
            out.finish();
            code
        }
    };

    process::exit(exit_code);
}
