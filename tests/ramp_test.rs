mod common;

use common::{controller, levels};
use keithley_daq::adapters::MockTransport;
use keithley_daq::error::SmuError;

fn assert_strictly_increasing(values: &[f64]) {
    assert!(values.windows(2).all(|w| w[0] < w[1]), "not increasing: {values:?}");
}

fn assert_strictly_decreasing(values: &[f64]) {
    assert!(values.windows(2).all(|w| w[0] > w[1]), "not decreasing: {values:?}");
}

#[test]
fn test_ramp_up_from_zero() {
    let link = MockTransport::new();
    let mut smu = controller(10.0, &link);

    smu.ramp(3.0, 1.0, "V").unwrap();
    assert_eq!(levels(&link), vec![1.0, 2.0, 3.0]);
    assert_eq!(link.level(), 3.0);
}

#[test]
fn test_ramp_down_to_lower_level() {
    let link = MockTransport::new().with_level(5.0);
    let mut smu = controller(10.0, &link);

    smu.ramp(2.0, 1.0, "V").unwrap();
    assert_eq!(levels(&link), vec![4.0, 3.0, 2.0]);
}

#[test]
fn test_ramp_negative_polarity() {
    let link = MockTransport::new();
    let mut smu = controller(-10.0, &link);

    smu.ramp(-3.0, 1.0, "V").unwrap();
    assert_eq!(levels(&link), vec![-1.0, -2.0, -3.0]);

    smu.ramp(0.0, 1.0, "V").unwrap();
    let back: Vec<f64> = levels(&link).split_off(3);
    assert_eq!(back, vec![-2.0, -1.0, 0.0]);
}

#[test]
fn test_ramp_within_one_step_sets_target_directly() {
    let link = MockTransport::new().with_level(2.5);
    let mut smu = controller(10.0, &link);

    smu.ramp(3.0, 1.0, "V").unwrap();
    assert_eq!(levels(&link), vec![3.0]);
}

#[test]
fn test_noisy_readings_never_reverse_the_ramp() {
    let link = MockTransport::new();
    let mut smu = controller(10.0, &link);
    for reading in ["0,0", "0.8,0", "2.4,0", "3.3,0", "4.5,0"] {
        link.push_response(reading);
    }

    smu.ramp(5.0, 1.0, "V").unwrap();
    let commanded = levels(&link);
    assert_strictly_increasing(&commanded);
    assert_eq!(commanded.first(), Some(&1.0));
    assert_eq!(commanded.last(), Some(&5.0));
    assert_eq!(link.level(), 5.0);
}

#[test]
fn test_noisy_down_ramp_is_monotonic() {
    let link = MockTransport::new();
    let mut smu = controller(-10.0, &link);
    for reading in ["0,0", "-1.2,0", "-1.9,0", "-3.5,0"] {
        link.push_response(reading);
    }

    smu.ramp(-4.0, 1.0, "V").unwrap();
    let commanded = levels(&link);
    assert_strictly_decreasing(&commanded);
    assert_eq!(commanded.last(), Some(&-4.0));
}

#[test]
fn test_ramp_in_millivolts() {
    let link = MockTransport::new();
    let mut smu = controller(10.0, &link);

    smu.ramp(1500.0, 500.0, "mV").unwrap();
    let commanded = levels(&link);
    assert!((commanded[0] - 0.5).abs() < 1e-9);
    assert!((link.level() - 1.5).abs() < 1e-9);
}

#[test]
fn test_rejected_step_rolls_back_to_zero() {
    let link = MockTransport::new();
    let mut smu = controller(4.0, &link);

    let err = smu.ramp(6.0, 1.0, "V").unwrap_err();
    match err {
        SmuError::RampFailed { target, source } => {
            assert_eq!(target, 6.0);
            assert!(matches!(*source, SmuError::OutOfBounds { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(link.last_command().unwrap(), ":SOUR:VOLT:LEV 0");
    assert_eq!(link.level(), 0.0);
    assert_strictly_increasing(&levels(&link)[..3]);
}

#[test]
fn test_rejected_final_set_rolls_back_to_zero() {
    let link = MockTransport::new();
    let mut smu = controller(3.0, &link);

    let err = smu.ramp(3.0, 1.0, "V").unwrap_err();
    assert!(matches!(err, SmuError::RampFailed { .. }));
    assert_eq!(levels(&link), vec![1.0, 2.0, 0.0]);
}

#[test]
fn test_read_failure_zeroes_and_returns_the_original_error() {
    let link = MockTransport::new().with_level(2.0);
    let mut smu = controller(10.0, &link);
    link.set_muted(true);

    let err = smu.ramp(5.0, 1.0, "V").unwrap_err();
    assert!(matches!(err, SmuError::Timeout { .. }));
    assert_eq!(link.last_command().unwrap(), ":SOUR:VOLT:LEV 0");
}

#[test]
fn test_invalid_step_sends_nothing() {
    let link = MockTransport::new();
    let mut smu = controller(10.0, &link);

    for step in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        assert!(matches!(
            smu.ramp(3.0, step, "V"),
            Err(SmuError::InvalidRampStep(_))
        ));
    }
    assert!(link.sent_commands().is_empty());
}

#[test]
fn test_unknown_unit_sends_nothing() {
    let link = MockTransport::new();
    let mut smu = controller(10.0, &link);

    assert!(matches!(
        smu.ramp(3.0, 1.0, "kV"),
        Err(SmuError::UnknownUnit { .. })
    ));
    assert!(link.sent_commands().is_empty());
}

#[test]
fn test_non_numeric_reading_aborts_before_any_step() {
    let link = MockTransport::new();
    let mut smu = controller(10.0, &link);
    link.push_response("nan,0");

    let err = smu.ramp(9.0, 1.0, "V").unwrap_err();
    assert!(matches!(err, SmuError::MalformedResponse(_)));
    assert_eq!(levels(&link), vec![0.0]);
    assert_eq!(link.level(), 0.0);
}

#[test]
fn test_non_numeric_reading_mid_ramp_zeroes_the_source() {
    let link = MockTransport::new();
    let mut smu = controller(10.0, &link);
    link.push_response("0,0");
    link.push_response("inf,0");

    let err = smu.ramp(9.0, 1.0, "V").unwrap_err();
    assert!(matches!(err, SmuError::MalformedResponse(_)));
    assert_eq!(levels(&link), vec![1.0, 0.0]);
    assert_eq!(link.last_command().unwrap(), ":SOUR:VOLT:LEV 0");
}
