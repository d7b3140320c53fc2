use lpc2000_loader::operation::OperationEvent;

use super::human::HumanOutput;
use super::json::JsonOutput;
use super::{JsonProgressMode, OutputOptions};

#[test]
fn json_event_has_schema_and_event() {
    let ev = super::json::operation_event_to_json(OperationEvent::HexLoaded {
        bytes: 12,
        blocks: 3,
    });
    let v = serde_json::to_value(&ev).unwrap();
    assert_eq!(v.get("schema").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(v.get("event").and_then(|v| v.as_str()), Some("hex_loaded"));
    assert_eq!(v.get("bytes").and_then(|v| v.as_u64()), Some(12));
    assert_eq!(v.get("blocks").and_then(|v| v.as_u64()), Some(3));
}

#[test]
fn json_program_block_carries_offset() {
    let ev = super::json::operation_event_to_json(OperationEvent::ProgramBlock {
        index: 2,
        total: 4,
        offset: 1024,
    });
    let v = serde_json::to_value(&ev).unwrap();
    assert_eq!(v.get("event").and_then(|v| v.as_str()), Some("program_block"));
    assert_eq!(v.get("i").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(v.get("n").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(v.get("offset").and_then(|v| v.as_u64()), Some(1024));
}

#[test]
fn json_timestamps_add_t_ms() {
    let mut out = JsonOutput::new(OutputOptions {
        json_timestamps: true,
        ..OutputOptions::default()
    });
    let rendered = out.render_event_json(super::json::JsonEvent::status("done"));
    let v: serde_json::Value = serde_json::from_str(&rendered).unwrap();
    assert!(v.get("t_ms").and_then(|v| v.as_u64()).is_some());
}

#[test]
fn json_list_includes_port_names() {
    let ev = super::json::list_to_json(&["/dev/ttyUSB0".to_string(), "/dev/ttyUSB1".to_string()]);
    let v = serde_json::to_value(&ev).unwrap();
    assert_eq!(v.get("count").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(
        v.get("ports").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );
}

#[test]
fn ambiguous_help_includes_ports() {
    let detected = vec!["/dev/ttyUSB0".to_string(), "/dev/ttyS3".to_string()];
    let lines = HumanOutput::ambiguous_help_lines(&detected);
    assert!(lines.iter().any(|l| l.contains("/dev/ttyUSB0")));
    assert!(lines.iter().any(|l| l.contains("/dev/ttyS3")));
}

#[test]
fn percent_mode_throttles_block_events() {
    let mut out = JsonOutput::new(OutputOptions {
        json_progress: JsonProgressMode::Percent,
        ..OutputOptions::default()
    });
    let emitted = (0..500)
        .filter(|&i| out.should_emit_block(i, 500))
        .count();
    // One event per percent step, not one per block.
    assert!(emitted <= 101, "emitted {emitted}");
    assert!(out.should_emit_block(499, 500));
}

#[test]
fn none_mode_suppresses_block_events() {
    let mut out = JsonOutput::new(OutputOptions {
        json_progress: JsonProgressMode::None,
        ..OutputOptions::default()
    });
    assert!(!out.should_emit_block(0, 10));
    assert!(!out.should_emit_block(9, 10));
}
