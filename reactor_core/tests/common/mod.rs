#![allow(dead_code)]

use reactor_core::mocks::{RecordingBus, ScriptedAdc, ScriptedPump};
use reactor_core::{
    CommandSender, CompartmentBands, ControllerCfg, EventLevel, EventRecord, ExperimentConfig,
    MemoryStore, Outbound, PhBand, Reactor,
};
use reactor_traits::clock::test_clock::TestClock;
use reactor_traits::nernst::ideal_voltage;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(2);

/// Everything a scenario needs: the reactor plus test handles on each collaborator.
pub struct Rig {
    pub reactor: Reactor<TestClock>,
    pub tx: CommandSender,
    pub adc: ScriptedAdc,
    pub pumps: [ScriptedPump; 3],
    pub store: MemoryStore,
    pub bus: RecordingBus,
    pub clock: TestClock,
}

pub fn experiment(id: &str) -> ExperimentConfig {
    ExperimentConfig {
        id: id.into(),
        name: "scenario".into(),
        bands: CompartmentBands::uniform(PhBand {
            min_ph: 6.8,
            max_ph: 7.4,
        }),
        measurement_interval_mins: 1,
        max_pump_time_sec: 30,
        mixing_cooldown_sec: 60,
        manual_dose_steps: 40,
    }
}

/// Probe voltage that converts to `ph` under the default calibration.
pub fn volts(ph: f64) -> f64 {
    ideal_voltage(ph)
}

pub fn rig() -> Rig {
    let adc = ScriptedAdc::new();
    for c in 1..=3 {
        adc.set_voltage(c, volts(7.2));
    }
    let pumps = [ScriptedPump::new(), ScriptedPump::new(), ScriptedPump::new()];
    let store = MemoryStore::new();
    let bus = RecordingBus::new();
    let clock = TestClock::new();
    let (reactor, tx) = Reactor::builder()
        .with_config(ControllerCfg {
            cycle: Duration::from_millis(10),
            recovery_delay: Duration::from_millis(20),
            ..ControllerCfg::default()
        })
        .with_adc(adc.clone())
        .with_pump(1, pumps[0].clone())
        .with_pump(2, pumps[1].clone())
        .with_pump(3, pumps[2].clone())
        .with_store(store.clone())
        .with_bus(bus.clone())
        .with_clock(clock.clone())
        .build()
        .expect("rig builds");
    Rig {
        reactor,
        tx,
        adc,
        pumps,
        store,
        bus,
        clock,
    }
}

impl Rig {
    pub fn started(mut self) -> Self {
        self.reactor.start().expect("start");
        self
    }

    /// One cycle, then wait for every dose it queued to report back.
    pub fn cycle(&mut self) {
        self.reactor.run_cycle().expect("cycle");
        assert!(self.reactor.wait_idle(WAIT), "doses still in flight");
    }

    pub fn pump(&self, id: u8) -> &ScriptedPump {
        &self.pumps[usize::from(id) - 1]
    }

    pub fn events(&self, level: EventLevel) -> Vec<EventRecord> {
        self.bus
            .messages()
            .into_iter()
            .filter_map(|m| match m {
                Outbound::Event(e) if e.level == level => Some(e),
                _ => None,
            })
            .collect()
    }
}
