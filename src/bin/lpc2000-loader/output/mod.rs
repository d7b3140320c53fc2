use lpc2000_loader::operation::OperationEvent;

use crate::cli;

pub mod human;
pub mod json;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub verbose: bool,
    pub quiet: bool,
    pub json_timestamps: bool,
    pub json_progress: JsonProgressMode,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            quiet: false,
            json_timestamps: false,
            json_progress: JsonProgressMode::Blocks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonProgressMode {
    Blocks,
    Percent,
    None,
}

#[derive(Debug, Clone)]
pub enum Event {
    Operation(OperationEvent),
    ListPorts(Vec<String>),
    Identity(String),
    BootVersion(String),
    BlankResult(bool),
    Error { code: i32, message: String },
    HintAmbiguousPorts,
}

pub trait Reporter {
    fn emit(&mut self, event: Event);
    fn finish(&mut self);
}

fn json_progress_mode(arg: cli::JsonProgressArg) -> JsonProgressMode {
    match arg {
        cli::JsonProgressArg::Blocks => JsonProgressMode::Blocks,
        cli::JsonProgressArg::Percent => JsonProgressMode::Percent,
        cli::JsonProgressArg::None => JsonProgressMode::None,
    }
}

pub fn make_for_program(args: &cli::ProgramArgs) -> Box<dyn Reporter> {
    let opts = OutputOptions {
        verbose: args.verbose,
        quiet: args.quiet,
        json_timestamps: args.json_timestamps,
        json_progress: json_progress_mode(args.json_progress),
    };
    if args.json {
        Box::new(json::JsonOutput::new(opts))
    } else {
        Box::new(human::HumanOutput::new(opts))
    }
}

pub fn make_for_verify(args: &cli::VerifyArgs) -> Box<dyn Reporter> {
    let opts = OutputOptions {
        verbose: args.verbose,
        quiet: args.quiet,
        json_timestamps: args.json_timestamps,
        json_progress: json_progress_mode(args.json_progress),
    };
    if args.json {
        Box::new(json::JsonOutput::new(opts))
    } else {
        Box::new(human::HumanOutput::new(opts))
    }
}

pub fn make_for_erase(args: &cli::EraseArgs) -> Box<dyn Reporter> {
    let opts = OutputOptions {
        verbose: args.verbose,
        ..OutputOptions::default()
    };
    if args.json {
        Box::new(json::JsonOutput::new(opts))
    } else {
        Box::new(human::HumanOutput::new(opts))
    }
}

pub fn make_simple(json: bool) -> Box<dyn Reporter> {
    let opts = OutputOptions::default();
    if json {
        Box::new(json::JsonOutput::new(opts))
    } else {
        Box::new(human::HumanOutput::new(opts))
    }
}
