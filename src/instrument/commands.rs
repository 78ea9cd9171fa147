//! SCPI vocabulary of the 2400 series.
//!
//! Every string the controller sends is built here, so the exact wire text
//! can be checked without an instrument.

use crate::config::{RangeSetting, SmuConfig};
use crate::units::Function;

/// Reset to power-on defaults.
pub const RESET: &str = "*RST";
/// Turn the source output on.
pub const OUTPUT_ON: &str = ":OUTPUT ON";
/// Turn the source output off.
pub const OUTPUT_OFF: &str = ":OUTPUT OFF";
/// Query the statistic selected on calculation channel 3.
pub const CALC_DATA_QUERY: &str = ":CALC3:DATA?";
/// Query the whole trace buffer.
pub const TRACE_DATA_QUERY: &str = ":TRAC:DATA?";

/// Clear the buffer, re-arm feed-on-next-trigger and trigger.
pub const SAMPLE: [&str; 4] = [
    ":TRAC:FEED:CONT NEV",
    ":TRAC:CLE",
    ":TRAC:FEED:CONT NEXT",
    ":INIT",
];

/// Statistic computed over the trace buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    /// Arithmetic mean.
    Mean,
    /// Standard deviation.
    StdDev,
}

impl Statistic {
    fn scpi(self) -> &'static str {
        match self {
            Statistic::Mean => "MEAN",
            Statistic::StdDev => "SDEV",
        }
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "ON"
    } else {
        "OFF"
    }
}

/// Output on or off.
pub fn output(on: bool) -> &'static str {
    if on {
        OUTPUT_ON
    } else {
        OUTPUT_OFF
    }
}

/// Set the source level.
pub fn source_level(source: Function, value: f64) -> String {
    format!(":SOUR:{}:LEV {}", source, value)
}

/// Upper end of the sense range for the source function.
pub fn source_upper_range(source: Function, value: f64) -> String {
    format!(":SENS:{}:RANG:UPP {}", source, value)
}

/// Sense autorange switch.
pub fn measure_autorange(on: bool) -> String {
    format!(":SENS:RANG:AUTO {}", on_off(on))
}

/// Select the statistic on calculation channel 3.
pub fn select_statistic(statistic: Statistic) -> String {
    format!(":CALC3:FORM {}", statistic.scpi())
}

/// Commands that bring a reset instrument to the configured state.
pub fn setup_sequence(config: &SmuConfig) -> Vec<String> {
    let source = config.source;
    let measure = config.measure;

    let mut commands = vec![
        RESET.to_string(),
        ":SYST:BEEP:STAT OFF".to_string(),
        ":SOUR:CLE:IMM".to_string(),
        format!(":SOUR:FUNC:MODE {}", source),
        format!(":SOUR:{}:MODE FIX", source),
        format!(":SOUR:{}:RANG:AUTO {}", source, on_off(config.auto_range_source)),
        format!(":SOUR:{}:PROT:LEV {}", source, config.compliance_source),
    ];
    if let (false, RangeSetting::Fixed(range)) = (config.auto_range_source, config.range_source) {
        commands.push(format!(":SOUR:{}:RANG {}", source, range));
    }

    commands.extend([
        format!(":SENS:FUNC \"{}\"", measure),
        format!(":SENS:{}:PROT:LEV {}", measure, config.compliance_measure),
        format!(":SENS:{}:RANG:AUTO {}", measure, on_off(config.auto_range_measure)),
    ]);
    if let (false, RangeSetting::Fixed(range)) = (config.auto_range_measure, config.range_measure) {
        commands.push(format!(":SENS:{}:RANG {}", measure, range));
    }

    commands.extend([
        ":TRAC:FEED:CONT NEV".to_string(),
        ":TRAC:FEED SENS".to_string(),
        format!(":TRAC:POIN {}", config.trigger_count),
        ":TRAC:CLE".to_string(),
        ":TRAC:FEED:CONT NEXT".to_string(),
        ":FORM:DATA ASC".to_string(),
        ":FORM:ELEM VOLT,CURR".to_string(),
        format!(":TRIG:COUN {}", config.trigger_count),
        format!(":TRIG:DEL {}", config.trigger_delay),
    ]);

    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(extra: &str) -> SmuConfig {
        let yaml = format!(
            r#"
Device:
  Configuration:
    Port: /dev/ttyUSB0
    Baudrate: 9600
    Source: V
    Measure: A
    TriggerCount: 10
    TriggerDelay: 0.05
    ComplianceSource: 100
    ComplianceMeasure: 0.0001
    SettlingTime: 0
    WaitRead: 0
{extra}
"#
        );
        SmuConfig::from_yaml_str(&yaml).unwrap()
    }

    #[test]
    fn test_setup_sequence_autorange() {
        let commands = setup_sequence(&config(
            "    RangeSource: auto\n    AutoRangeSource: true\n    RangeMeasure: auto\n    AutoRangeMeasure: true",
        ));
        assert_eq!(
            commands,
            vec![
                "*RST",
                ":SYST:BEEP:STAT OFF",
                ":SOUR:CLE:IMM",
                ":SOUR:FUNC:MODE VOLT",
                ":SOUR:VOLT:MODE FIX",
                ":SOUR:VOLT:RANG:AUTO ON",
                ":SOUR:VOLT:PROT:LEV 100",
                ":SENS:FUNC \"CURR\"",
                ":SENS:CURR:PROT:LEV 0.0001",
                ":SENS:CURR:RANG:AUTO ON",
                ":TRAC:FEED:CONT NEV",
                ":TRAC:FEED SENS",
                ":TRAC:POIN 10",
                ":TRAC:CLE",
                ":TRAC:FEED:CONT NEXT",
                ":FORM:DATA ASC",
                ":FORM:ELEM VOLT,CURR",
                ":TRIG:COUN 10",
                ":TRIG:DEL 0.05",
            ]
        );
    }

    #[test]
    fn test_setup_sequence_fixed_ranges() {
        let commands = setup_sequence(&config(
            "    RangeSource: 200\n    AutoRangeSource: \"OFF\"\n    RangeMeasure: 0.001\n    AutoRangeMeasure: \"OFF\"",
        ));
        let source_range = commands.iter().position(|c| c == ":SOUR:VOLT:RANG 200").unwrap();
        let compliance = commands.iter().position(|c| c == ":SOUR:VOLT:PROT:LEV 100").unwrap();
        assert_eq!(source_range, compliance + 1);
        assert!(commands.contains(&":SOUR:VOLT:RANG:AUTO OFF".to_string()));
        assert!(commands.contains(&":SENS:CURR:RANG 0.001".to_string()));
    }

    #[test]
    fn test_level_and_statistic_commands() {
        assert_eq!(source_level(Function::Voltage, -2.5), ":SOUR:VOLT:LEV -2.5");
        assert_eq!(source_level(Function::Current, 0.0), ":SOUR:CURR:LEV 0");
        assert_eq!(select_statistic(Statistic::Mean), ":CALC3:FORM MEAN");
        assert_eq!(select_statistic(Statistic::StdDev), ":CALC3:FORM SDEV");
        assert_eq!(measure_autorange(false), ":SENS:RANG:AUTO OFF");
        assert_eq!(source_upper_range(Function::Voltage, 21.0), ":SENS:VOLT:RANG:UPP 21");
        assert_eq!(output(true), ":OUTPUT ON");
    }
}
