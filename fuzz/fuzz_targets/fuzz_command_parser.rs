#![no_main]
use libfuzzer_sys::fuzz_target;
use libfuzzer_sys::arbitrary::{self, Arbitrary};
use reactor_core::bridge::parse;
use reactor_core::bus::{
    TOPIC_CALIBRATION, TOPIC_EXPERIMENT, TOPIC_PUMP_AUTO, TOPIC_PUMP_MANUAL,
};

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    topic: u8,
    payload: &'a str,
}

const TOPICS: [&str; 5] = [
    TOPIC_PUMP_MANUAL,
    TOPIC_PUMP_AUTO,
    TOPIC_EXPERIMENT,
    TOPIC_CALIBRATION,
    "reactor/unknown",
];

fuzz_target!(|input: Input<'_>| {
    let topic = TOPICS[usize::from(input.topic) % TOPICS.len()];
    if let Ok(reactor_core::Command::ManualDose { pump_id, steps, .. }) = parse(topic, input.payload) {
        assert!(steps != Some(0), "zero-step manual dose accepted for pump {pump_id}");
    }
});
