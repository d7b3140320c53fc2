use std::io::{IsTerminal, Write};

use lpc2000_loader::operation::OperationEvent;

use crate::output::{Event, OutputOptions, Reporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Quiet,
    Verbose,
    Progress,
}

pub struct HumanOutput {
    opts: OutputOptions,
    is_tty: bool,
    progress_active: bool,
    last_percent: Option<u64>,
    detected: Vec<String>,
}

impl HumanOutput {
    pub fn new(opts: OutputOptions) -> Self {
        Self {
            opts,
            is_tty: std::io::stderr().is_terminal(),
            progress_active: false,
            last_percent: None,
            detected: Vec::new(),
        }
    }

    fn mode(&self) -> Mode {
        if self.opts.quiet {
            Mode::Quiet
        } else if self.opts.verbose {
            Mode::Verbose
        } else {
            Mode::Progress
        }
    }

    fn finish_line(&mut self) {
        if self.progress_active {
            eprintln!();
            self.progress_active = false;
        }
    }

    fn println(&mut self, msg: &str) {
        if self.mode() == Mode::Quiet {
            return;
        }
        self.finish_line();
        eprintln!("{msg}");
    }

    fn progress_update(&mut self, verb: &str, percent: u64, i: usize, n: usize, offset: usize) {
        if self.mode() != Mode::Progress {
            return;
        }

        if self.is_tty {
            eprint!("\r  {verb} {percent:3}% ({i}/{n}) @ 0x{offset:06X}");
            let _ = std::io::stderr().flush();
            self.progress_active = true;
            self.last_percent = Some(percent);
            return;
        }

        let last = self.last_percent.unwrap_or(0);
        if percent == 0 || percent == 100 || percent >= last + 10 {
            self.last_percent = Some(percent);
            self.println(&format!("  {verb} {percent:3}% ({i}/{n})"));
        }
    }

    pub(crate) fn ambiguous_help_lines(detected: &[String]) -> Vec<String> {
        detected
            .iter()
            .enumerate()
            .map(|(i, name)| format!("[{i}] {name}"))
            .collect()
    }

    fn print_ambiguous_help(&mut self) {
        if self.mode() == Mode::Quiet {
            return;
        }

        let lines = Self::ambiguous_help_lines(&self.detected);
        if lines.is_empty() {
            return;
        }

        self.println("");
        self.println("Detected ports:");
        for line in lines {
            self.println(&line);
        }
        self.println("\nHint: pass --port <name>, or run `lpc2000-loader list`.");
    }

    fn on_operation_event(&mut self, ev: OperationEvent) {
        match ev {
            OperationEvent::DiscoverStart => {
                if self.mode() != Mode::Quiet {
                    self.println("discover serial ports...");
                }
            }
            OperationEvent::PortDetected { index, name } => {
                self.detected.push(name.clone());
                if self.mode() == Mode::Verbose {
                    self.println(&format!("port[{index}]: {name}"));
                }
            }
            OperationEvent::DiscoverDone { count } => {
                if self.mode() == Mode::Progress && count > 0 {
                    self.println(&format!("found {count} port(s)"));
                }
            }
            OperationEvent::PortSelected { name } => {
                if self.mode() != Mode::Quiet {
                    self.println(&format!("port: {name}"));
                }
            }
            OperationEvent::HexLoaded { bytes, blocks } => {
                if self.mode() != Mode::Quiet {
                    self.println(&format!("firmware loaded: {bytes} bytes ({blocks} blocks)"));
                }
            }
            OperationEvent::Connected => {
                if self.mode() != Mode::Quiet {
                    self.println("synchronized");
                }
            }
            OperationEvent::CrystalSet { khz } => {
                if self.mode() == Mode::Verbose {
                    self.println(&format!("crystal: {khz} kHz"));
                }
            }
            OperationEvent::EchoDisabled => {
                if self.mode() == Mode::Verbose {
                    self.println("echo disabled");
                }
            }
            OperationEvent::EraseStart => {
                if self.mode() != Mode::Quiet {
                    self.println("erasing chip...");
                }
            }
            OperationEvent::EraseDone => {
                if self.mode() != Mode::Quiet {
                    self.println("chip erased");
                }
            }
            OperationEvent::ProgramBlock {
                index,
                total,
                offset,
            } => {
                if self.mode() == Mode::Verbose {
                    self.println(&format!(
                        "program block {}/{} @ 0x{offset:06X}",
                        index + 1,
                        total
                    ));
                } else {
                    let percent = ((index + 1) as u64 * 100).saturating_div(total.max(1) as u64);
                    self.progress_update("programming", percent, index + 1, total, offset);
                }
            }
            OperationEvent::VerifyBlock {
                index,
                total,
                offset,
            } => {
                if self.mode() == Mode::Verbose {
                    self.println(&format!(
                        "verify block {}/{} @ 0x{offset:06X}",
                        index + 1,
                        total
                    ));
                } else {
                    let percent = ((index + 1) as u64 * 100).saturating_div(total.max(1) as u64);
                    self.progress_update("verifying", percent, index + 1, total, offset);
                }
            }
            OperationEvent::Done => {
                self.finish_line();
                if self.mode() == Mode::Progress {
                    self.println("done");
                }
            }
        }
    }
}

impl Reporter for HumanOutput {
    fn emit(&mut self, event: Event) {
        match event {
            Event::Operation(ev) => self.on_operation_event(ev),
            Event::ListPorts(ports) => emit_list_ports(&ports, self),
            Event::Identity(label) => self.println(&format!("chip: {label}")),
            Event::BootVersion(version) => self.println(&format!("boot code ver {version}")),
            Event::BlankResult(blank) => {
                if blank {
                    self.println("chip IS blank");
                } else {
                    self.println("chip IS NOT blank");
                }
            }
            Event::Error { code: _, message } => {
                self.finish_line();
                eprintln!("error: {message}");
            }
            Event::HintAmbiguousPorts => self.print_ambiguous_help(),
        }
    }

    fn finish(&mut self) {
        self.finish_line();
    }
}

fn emit_list_ports(ports: &[String], out: &mut HumanOutput) {
    if ports.is_empty() {
        out.println("No serial ports found");
        return;
    }

    for (i, name) in ports.iter().enumerate() {
        out.println(&format!("[{i}] {name}"));
    }
}
