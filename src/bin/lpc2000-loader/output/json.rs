use std::collections::BTreeMap;
use std::time::Instant;

use lpc2000_loader::operation::OperationEvent;

use crate::output::{Event, JsonProgressMode, OutputOptions, Reporter};

#[derive(serde::Serialize)]
pub struct JsonEvent {
    schema: u32,
    event: &'static str,
    #[serde(flatten)]
    fields: BTreeMap<&'static str, serde_json::Value>,
}

impl JsonEvent {
    pub fn status(event: &'static str) -> Self {
        Self {
            schema: 1,
            event,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_u64(mut self, k: &'static str, v: u64) -> Self {
        self.fields.insert(k, serde_json::Value::from(v));
        self
    }

    pub fn with_str(mut self, k: &'static str, v: &str) -> Self {
        self.fields.insert(k, serde_json::Value::from(v));
        self
    }

    pub fn with_value(mut self, k: &'static str, v: serde_json::Value) -> Self {
        self.fields.insert(k, v);
        self
    }
}

pub struct JsonOutput {
    opts: OutputOptions,
    start: Instant,
    last_percent: Option<u64>,
}

impl JsonOutput {
    pub fn new(opts: OutputOptions) -> Self {
        Self {
            opts,
            start: Instant::now(),
            last_percent: None,
        }
    }

    pub(crate) fn render_event_json(&mut self, ev: JsonEvent) -> String {
        let mut ev = ev;
        if self.opts.json_timestamps {
            ev.fields.insert(
                "t_ms",
                serde_json::Value::from(self.start.elapsed().as_millis() as u64),
            );
        }
        serde_json::to_string(&ev).unwrap_or_else(|_| "{}".to_string())
    }

    fn json_event(&mut self, ev: JsonEvent) {
        println!("{}", self.render_event_json(ev));
    }

    fn error_event(&mut self, code: i32, msg: &str) {
        self.json_event(
            JsonEvent::status("error")
                .with_u64("code", code as u64)
                .with_str("message", msg),
        );

        if self.opts.verbose {
            eprintln!("error: {msg}");
        }
    }

    /// Progress throttle: in percent mode a block event goes out only when
    /// it changes the integer percentage (first and last always do).
    pub(crate) fn should_emit_block(&mut self, index: usize, total: usize) -> bool {
        match self.opts.json_progress {
            JsonProgressMode::Blocks => true,
            JsonProgressMode::None => false,
            JsonProgressMode::Percent => {
                let total_u64 = total.max(1) as u64;
                let percent = ((index + 1) as u64).saturating_mul(100) / total_u64;
                let should_emit = index == 0
                    || index + 1 == total
                    || self.last_percent.map(|p| p != percent).unwrap_or(true);
                if should_emit {
                    self.last_percent = Some(percent);
                }
                should_emit
            }
        }
    }

    fn emit_operation(&mut self, ev: OperationEvent) {
        if let OperationEvent::ProgramBlock { index, total, .. }
        | OperationEvent::VerifyBlock { index, total, .. } = &ev
        {
            if !self.should_emit_block(*index, *total) {
                return;
            }
        }

        self.json_event(operation_event_to_json(ev));
    }
}

impl Reporter for JsonOutput {
    fn emit(&mut self, event: Event) {
        match event {
            Event::Operation(ev) => self.emit_operation(ev),
            Event::ListPorts(ports) => self.json_event(list_to_json(&ports)),
            Event::Identity(label) => {
                self.json_event(JsonEvent::status("identify").with_str("chip", &label));
            }
            Event::BootVersion(version) => {
                self.json_event(JsonEvent::status("boot_version").with_str("version", &version));
            }
            Event::BlankResult(blank) => {
                self.json_event(
                    JsonEvent::status("blank_check").with_u64("blank", u64::from(blank)),
                );
            }
            Event::Error { code, message } => self.error_event(code, &message),
            Event::HintAmbiguousPorts => {}
        }
    }

    fn finish(&mut self) {}
}

pub fn list_to_json(ports: &[String]) -> JsonEvent {
    JsonEvent::status("list")
        .with_u64("count", ports.len() as u64)
        .with_value(
            "ports",
            serde_json::Value::Array(
                ports
                    .iter()
                    .map(|p| serde_json::Value::from(p.clone()))
                    .collect(),
            ),
        )
}

pub fn operation_event_to_json(ev: OperationEvent) -> JsonEvent {
    match ev {
        OperationEvent::DiscoverStart => JsonEvent::status("discover_start"),
        OperationEvent::PortDetected { index, name } => JsonEvent::status("port_detected")
            .with_u64("index", index as u64)
            .with_str("port", &name),
        OperationEvent::DiscoverDone { count } => {
            JsonEvent::status("discover_done").with_u64("count", count as u64)
        }
        OperationEvent::PortSelected { name } => {
            JsonEvent::status("port_selected").with_str("port", &name)
        }
        OperationEvent::HexLoaded { bytes, blocks } => JsonEvent::status("hex_loaded")
            .with_u64("bytes", bytes as u64)
            .with_u64("blocks", blocks as u64),
        OperationEvent::Connected => JsonEvent::status("synchronized"),
        OperationEvent::CrystalSet { khz } => {
            JsonEvent::status("crystal_set").with_u64("khz", u64::from(khz))
        }
        OperationEvent::EchoDisabled => JsonEvent::status("echo_disabled"),
        OperationEvent::EraseStart => JsonEvent::status("erase_start"),
        OperationEvent::EraseDone => JsonEvent::status("erase_done"),
        OperationEvent::ProgramBlock {
            index,
            total,
            offset,
        } => JsonEvent::status("program_block")
            .with_u64("i", index as u64)
            .with_u64("n", total as u64)
            .with_u64("offset", offset as u64),
        OperationEvent::VerifyBlock {
            index,
            total,
            offset,
        } => JsonEvent::status("verify_block")
            .with_u64("i", index as u64)
            .with_u64("n", total as u64)
            .with_u64("offset", offset as u64),
        OperationEvent::Done => JsonEvent::status("done"),
    }
}
