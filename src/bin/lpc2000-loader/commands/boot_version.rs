use lpc2000_loader::api;

use crate::cli;
use crate::commands::{fail, open_session};
use crate::exit_codes;
use crate::output::{Event, Reporter};

pub fn run(args: cli::BootVersionArgs, out: &mut dyn Reporter) -> i32 {
    let mut session = match open_session(&args.connection, out) {
        Ok(s) => s,
        Err(code) => return code,
    };

    match api::read_boot_version(&mut session, args.connection.crystal_khz, |ev| {
        out.emit(Event::Operation(ev))
    }) {
        Ok(version) => {
            out.emit(Event::BootVersion(version));
            exit_codes::EXIT_OK
        }
        Err(e) => fail(out, &e),
    }
}
