#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Service config and experiment files: errors are fine, panics are not.
    if let Ok(cfg) = reactor_config::load_toml(data) {
        let _ = cfg.validate();
    }
    if let Ok(exp) = reactor_config::load_experiment_toml(data) {
        let _ = exp.to_toml_string();
    }
});
