// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::process::{Command, Output};

fn regbench(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_regbench"))
        .args(args)
        .output()
        .expect("Failed to execute command")
}

#[test]
fn test_list_names_every_demo() {
    let output = regbench(&["list"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in [
        "miniblink", "timer-irq", "pwm", "usart-echo", "dma-rx", "i2c-eeprom", "adc-timer", "flash",
    ] {
        assert!(stdout.contains(name), "{} missing from: {}", name, stdout);
    }
}

#[test]
fn test_run_miniblink_passes() {
    let output = regbench(&["run", "miniblink"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("PASS miniblink"), "Stdout: {}", stdout);
}

#[test]
fn test_json_report() {
    let output = regbench(&["run", "usart-echo", "--json"]);
    assert_eq!(output.status.code(), Some(0));

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("Failed to parse JSON");
    assert_eq!(json["status"], "pass");
    assert_eq!(json["demo"], "usart-echo");
    assert_eq!(json["chip"], "stm32f103");
    assert_eq!(json["uart"]["usart1"], "hello regbench\r\n");
    assert_eq!(json["gate_violations"], 0);
    assert!(json["register_writes"].as_u64().unwrap() > 0);
    // USART1 is device interrupt 37.
    assert!(json["dispatched"]["53"].as_u64().unwrap() > 0);
}

#[test]
fn test_snapshot_written() {
    let path = std::env::temp_dir().join(format!("regbench-snapshot-{}.json", std::process::id()));
    let output = regbench(&["run", "dac", "--snapshot", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0));

    let text = std::fs::read_to_string(&path).expect("Snapshot not written");
    let snapshot: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert!(snapshot.is_object());
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_missing_peripheral_is_a_config_error() {
    let output = regbench(&["run", "adc", "--board", "f3discovery"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("adc1"), "Stderr: {}", stderr);
}

#[test]
fn test_unknown_demo_and_board() {
    assert_eq!(regbench(&["run", "no-such-demo"]).status.code(), Some(2));
    assert_eq!(
        regbench(&["run", "miniblink", "--board", "no-such-board"]).status.code(),
        Some(2)
    );
}

#[test]
fn test_step_bound_stops_a_stuck_wait() {
    // msleep cannot finish inside a 10-step bound.
    let output = regbench(&["run", "systick-blink", "--max-steps", "10"]);
    assert_eq!(output.status.code(), Some(3));
}
