use lpc2000_loader::api;

use crate::cli;
use crate::commands::{ask_confirmation, fail, open_session};
use crate::exit_codes;
use crate::output::{Event, Reporter};

pub fn run(args: cli::EraseArgs, out: &mut dyn Reporter) -> i32 {
    if args.json && !args.yes {
        out.emit(Event::Error {
            code: exit_codes::EXIT_ABORTED,
            message: "erase is destructive; pass --yes with --json".to_string(),
        });
        return exit_codes::EXIT_ABORTED;
    }

    let mut session = match open_session(&args.connection, out) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let confirm = || args.yes || ask_confirmation("Are you sure you want to erase the chip?");

    let r = api::erase_chip(&mut session, args.connection.crystal_khz, confirm, |ev| {
        out.emit(Event::Operation(ev))
    });

    match r {
        Ok(()) => exit_codes::EXIT_OK,
        Err(e) => fail(out, &e),
    }
}
