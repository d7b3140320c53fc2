use lpc2000_loader::api::{self, FlashError};
use lpc2000_loader::{hex, lpc2000, operation::OperationEvent};

use crate::cli;
use crate::commands::{ask_confirmation, fail, open_session};
use crate::exit_codes;
use crate::output::{Event, Reporter};

pub fn run(args: cli::ProgramArgs, out: &mut dyn Reporter) -> i32 {
    if args.json && !args.yes {
        out.emit(Event::Error {
            code: exit_codes::EXIT_ABORTED,
            message: "programming erases the chip; pass --yes with --json".to_string(),
        });
        return exit_codes::EXIT_ABORTED;
    }

    let mut image = match hex::load_image(&args.hex) {
        Ok(image) => image,
        Err(e) => return fail(out, &FlashError::InvalidHex { source: e }),
    };
    out.emit(Event::Operation(OperationEvent::HexLoaded {
        bytes: image.len(),
        blocks: image.len().div_ceil(lpc2000::BLOCK_SIZE),
    }));

    let mut session = match open_session(&args.connection, out) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let confirm =
        || args.yes || ask_confirmation("About to erase and reprogram the chip. Continue?");

    let r = api::program_image(
        &mut session,
        &mut image,
        args.connection.crystal_khz,
        confirm,
        |ev| out.emit(Event::Operation(ev)),
    );

    match r {
        Ok(()) => exit_codes::EXIT_OK,
        Err(e) => fail(out, &e),
    }
}
