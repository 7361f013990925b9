//! Presence and shutdown behaviour of the full loop.
//!
//! Verifies that:
//! - `run()` announces online first and offline last, then disconnects
//! - the offline announcement also happens when the reactor is just dropped
//! - the last-will registered on connect is the offline payload
//! - a failing bus only costs cycles; the loop recovers once it clears
//! - a stop still lands promptly after every command sender is gone

use reactor_core::bus::TOPIC_STATUS;
use reactor_core::mocks::{RecordingBus, ScriptedAdc, ScriptedPump};
use reactor_core::{ControllerCfg, MemoryStore, Outbound, Presence, Reactor};
use std::time::{Duration, Instant};

fn build(bus: &RecordingBus) -> (Reactor, reactor_core::CommandSender) {
    build_with(bus, Duration::from_millis(5))
}

fn build_with(bus: &RecordingBus, cycle: Duration) -> (Reactor, reactor_core::CommandSender) {
    let adc = ScriptedAdc::new();
    for c in 1..=3 {
        adc.set_voltage(c, 0.0);
    }
    Reactor::builder()
        .with_config(ControllerCfg {
            cycle,
            recovery_delay: cycle,
            ..ControllerCfg::default()
        })
        .with_adc(adc)
        .with_pump(1, ScriptedPump::new())
        .with_store(MemoryStore::new())
        .with_bus(bus.clone())
        .build()
        .unwrap()
}

#[test]
fn run_announces_presence_on_both_ends() {
    let bus = RecordingBus::new();
    let (mut reactor, _tx) = build(&bus);
    let stop = reactor.stop_handle();

    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(60));
        stop.stop();
    });
    reactor.run().unwrap();
    stopper.join().unwrap();

    let msgs = bus.messages();
    assert_eq!(msgs.first(), Some(&Outbound::Presence(Presence::Online)));
    assert_eq!(msgs.last(), Some(&Outbound::Presence(Presence::Offline)));
    assert!(!bus.on_topic(TOPIC_STATUS).is_empty());
    assert_eq!(
        bus.last_will(),
        Some(Outbound::Presence(Presence::Offline))
    );
    assert!(!bus.is_connected());
    assert_eq!(bus.disconnects(), 1);

    // dropping after a clean stop does not announce twice
    drop(reactor);
    assert_eq!(bus.disconnects(), 1);
}

#[test]
fn dropping_a_started_reactor_goes_offline() {
    let bus = RecordingBus::new();
    let (mut reactor, _tx) = build(&bus);
    reactor.start().unwrap();
    reactor.run_cycle().unwrap();
    drop(reactor);

    assert_eq!(
        bus.messages().last(),
        Some(&Outbound::Presence(Presence::Offline))
    );
    assert_eq!(bus.disconnects(), 1);
}

#[test]
fn commands_sent_while_sleeping_are_applied() {
    let bus = RecordingBus::new();
    let (mut reactor, tx) = build(&bus);
    let stop = reactor.stop_handle();

    let producer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        tx.submit(
            reactor_core::bus::TOPIC_CALIBRATION,
            r#"{"command": "start", "compartment": 3}"#,
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(40));
        stop.stop();
    });
    reactor.run().unwrap();
    producer.join().unwrap();

    assert_eq!(reactor.experiment().calibration_mode(), Some(3));
    assert!(!bus.on_topic(reactor_core::bus::TOPIC_CALIBRATION_RAW).is_empty());
}

#[test]
fn stop_before_run_still_cycles_presence() {
    let bus = RecordingBus::new();
    let (mut reactor, _tx) = build(&bus);
    reactor.stop_handle().stop();
    reactor.run().unwrap();
    assert_eq!(
        bus.messages(),
        vec![
            Outbound::Presence(Presence::Online),
            Outbound::Presence(Presence::Offline)
        ]
    );
}

#[test]
fn run_keeps_going_through_bus_failures() {
    let bus = RecordingBus::new();
    let (mut reactor, _tx) = build(&bus);
    let stop = reactor.stop_handle();

    let flaky = bus.clone();
    let driver = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        flaky.set_failing(true);
        std::thread::sleep(Duration::from_millis(60));
        let before = flaky.messages().len();
        flaky.set_failing(false);
        std::thread::sleep(Duration::from_millis(80));
        stop.stop();
        before
    });
    reactor.run().unwrap();
    let before = driver.join().unwrap();

    let msgs = bus.messages();
    let after = &msgs[before..];
    assert!(
        after.iter().any(|m| m.topic() == TOPIC_STATUS),
        "no status after the bus recovered"
    );
    assert_eq!(msgs.last(), Some(&Outbound::Presence(Presence::Offline)));
    assert_eq!(bus.disconnects(), 1);
}

#[test]
fn stop_is_prompt_after_all_senders_are_gone() {
    let bus = RecordingBus::new();
    let (mut reactor, tx) = build_with(&bus, Duration::from_secs(10));
    drop(tx);
    let stop = reactor.stop_handle();

    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        stop.stop();
    });
    let started = Instant::now();
    reactor.run().unwrap();
    stopper.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        bus.messages().last(),
        Some(&Outbound::Presence(Presence::Offline))
    );
}
