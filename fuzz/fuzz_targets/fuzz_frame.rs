#![no_main]
use libfuzzer_sys::fuzz_target;
use saw_core::{ColumnLayout, FuzzyEngine, normalize};

fuzz_target!(|input: (Vec<u16>, f64, f64)| {
    let (frame, current, delta) = input;
    let layout = ColumnLayout::standard();
    if let Ok(reading) = normalize(&layout, &frame, 0) {
        let f = FuzzyEngine::canonical_with_resolution(0.1).infer(reading.motor_current_a, 0.0);
        assert!((-3.0..=3.0).contains(&f));
    }
    let f = FuzzyEngine::canonical_with_resolution(0.1).infer(current, delta);
    assert!((-3.0..=3.0).contains(&f));
});
