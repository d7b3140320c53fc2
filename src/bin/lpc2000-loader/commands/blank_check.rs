use lpc2000_loader::api;

use crate::cli;
use crate::commands::{fail, open_session};
use crate::exit_codes;
use crate::output::{Event, Reporter};

pub fn run(args: cli::BlankCheckArgs, out: &mut dyn Reporter) -> i32 {
    let mut session = match open_session(&args.connection, out) {
        Ok(s) => s,
        Err(code) => return code,
    };

    match api::blank_check(&mut session, args.connection.crystal_khz, |ev| {
        out.emit(Event::Operation(ev))
    }) {
        Ok(blank) => {
            out.emit(Event::BlankResult(blank));
            exit_codes::EXIT_OK
        }
        Err(e) => fail(out, &e),
    }
}
