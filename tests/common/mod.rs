//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use keithley_daq::adapters::MockTransport;
use keithley_daq::config::SmuConfig;
use keithley_daq::instrument::SmuController;
use std::io::Write;
use tempfile::NamedTempFile;

/// Voltage-source configuration with no settling and a short read timeout.
pub fn config_yaml(compliance: f64) -> String {
    format!(
        r#"
Device:
  Configuration:
    Port: /dev/ttyUSB0
    Baudrate: 57600
    Source: V
    Measure: A
    TriggerCount: 10
    TriggerDelay: 0
    RangeSource: auto
    AutoRangeSource: "ON"
    ComplianceSource: {compliance}
    RangeMeasure: auto
    AutoRangeMeasure: "ON"
    ComplianceMeasure: 0.0001
    SettlingTime: 0
    WaitRead: 0
    ReadTimeout: 0.2
"#
    )
}

pub fn config(compliance: f64) -> SmuConfig {
    SmuConfig::from_yaml_str(&config_yaml(compliance)).unwrap()
}

pub fn write_config(compliance: f64) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(config_yaml(compliance).as_bytes()).unwrap();
    file
}

/// Controller on `link` with the setup commands already cleared from its log.
pub fn controller(compliance: f64, link: &MockTransport) -> SmuController<MockTransport> {
    let smu = SmuController::new(config(compliance), link.clone()).unwrap();
    link.clear_log();
    smu
}

/// Source levels commanded so far, in order.
pub fn levels(link: &MockTransport) -> Vec<f64> {
    link.sent_commands()
        .iter()
        .filter_map(|c| c.strip_prefix(":SOUR:VOLT:LEV "))
        .map(|v| v.parse().unwrap())
        .collect()
}
