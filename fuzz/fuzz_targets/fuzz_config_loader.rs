#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    if let Ok(cfg) = saw_config::load_toml(data) {
        if cfg.validate().is_ok() {
            // A config that validates must also build a register layout.
            let layout = saw_core::ColumnLayout::new(cfg.layout.columns.clone());
            assert!(layout.is_ok(), "validated layout rejected: {layout:?}");
        }
    }
});
