#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
use approx::assert_relative_eq;
use cbmreco_core::{
    BmonDigi, DetectorSystem, DigiData, FsdDigi, MuchDigi, RichDigi, StsDigi, TofDigi, Trd2dDigi,
    TrdDigi,
};
use cbmreco_evbuild::{
    DigiEventSelector, DigiEventSelectorConfig, Error, EventBuilder, EventBuilderConfig,
    EventbuildChain, EventbuildConfig, RecoInput, SelectionTrigger, TimeClusterTriggerConfig,
    TrackingSetup, Track, TriggerSource, V0TriggerConfig,
};
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

/// `n` digis per system at `i * step` ns.
fn uniform_digis(n: usize, step: f64) -> DigiData {
    let mut data = DigiData::new();
    for i in 0..n {
        let time = i as f64 * step;
        let address = i as u32;
        data.sts.push(StsDigi::new(address, 0, time, 10));
        data.much.push(MuchDigi { address, time, ..Default::default() });
        data.trd.push(TrdDigi { address, time, ..Default::default() });
        data.trd2d.push(Trd2dDigi { address, time, ..Default::default() });
        data.tof.push(TofDigi { address, time, ..Default::default() });
        data.bmon.push(BmonDigi { address, time, ..Default::default() });
        data.rich.push(RichDigi { address, time, ..Default::default() });
        data.fsd.push(FsdDigi { address, time, ..Default::default() });
    }
    data
}

fn all_systems_config(min: f64, max: f64) -> EventBuilderConfig {
    DetectorSystem::ALL
        .into_iter()
        .fold(EventBuilderConfig::default(), |c, sys| c.with_window(sys, min, max))
}

/// Three TOF bursts of 20 digis at 1 ns spacing on top of sparse noise,
/// plus STS digis every 10 ns.
fn burst_digis() -> DigiData {
    let mut tof_times: Vec<f64> = (0..50).map(|i| 100.0 + 200.0 * f64::from(i)).collect();
    for start in [1000.0, 5000.0, 9000.0] {
        tof_times.extend((0..20).map(|i| start + f64::from(i)));
    }
    tof_times.sort_by(f64::total_cmp);

    let mut data = DigiData::new();
    data.tof = tof_times
        .into_iter()
        .map(|time| TofDigi { address: 1, tot: 2.0, time })
        .collect();
    data.sts = (0..1000).map(|i| StsDigi::new(1, 0, f64::from(i) * 10.0, 10)).collect();
    data
}

fn tof_trigger() -> TriggerSource {
    TriggerSource::DigiMultiplicity {
        system: DetectorSystem::Tof,
        trigger: TimeClusterTriggerConfig::new(30.0, 15, 50.0).unwrap(),
    }
}

fn burst_windows() -> EventBuilderConfig {
    EventBuilderConfig::default()
        .with_window(DetectorSystem::Tof, -10.0, 20.0)
        .with_window(DetectorSystem::Sts, -10.0, 20.0)
}

#[test]
fn test_builder_windows_every_system() {
    init_logging();
    let digis = uniform_digis(1000, 10.0);
    let triggers: Vec<f64> = (1..100).map(|i| f64::from(i) * 100.0).collect();
    let builder = EventBuilder::new(all_systems_config(-45.0, 45.0)).unwrap();

    let (events, monitor) = builder.run(&digis, &triggers, None).unwrap();
    assert_eq!(events.len(), 99);
    for (event, &trigger) in events.iter().zip(&triggers) {
        assert_relative_eq!(event.time, trigger);
        for sys in DetectorSystem::ALL {
            assert_eq!(event.data.len(sys), 9, "{sys} at {trigger}");
        }
        assert!(event.triggers.is_empty());
    }

    assert_eq!(monitor.num_triggers, 99);
    assert_eq!(monitor.num_events, 99);
    assert_eq!(monitor.num_events_rejected, 0);
    for sys in DetectorSystem::ALL {
        let m = &monitor.systems[&sys];
        assert_eq!(m.n_digis, 1000);
        assert_eq!(m.n_digis_in_events, 99 * 9);
        assert_relative_eq!(m.selection_ratio(), 0.891);
    }
}

#[test]
fn test_builder_event_contents_follow_window() {
    let digis = uniform_digis(100, 10.0);
    let builder =
        EventBuilder::new(EventBuilderConfig::default().with_window(DetectorSystem::Sts, -5.0, 25.0)).unwrap();
    let (events, _) = builder.run(&digis, &[300.0, 305.0], None).unwrap();
    let times = |i: usize| events[i].data.times(DetectorSystem::Sts);
    assert_eq!(times(0), vec![300.0, 310.0, 320.0]);
    assert_eq!(times(1), vec![300.0, 310.0, 320.0, 330.0]);
}

#[test]
fn test_builder_rejects_unsorted_input() {
    let builder = EventBuilder::new(all_systems_config(-45.0, 45.0)).unwrap();
    let digis = uniform_digis(100, 10.0);

    let err = builder.run(&digis, &[200.0, 100.0], None).unwrap_err();
    assert!(err.is_unsorted());

    let mut unsorted = digis.clone();
    unsorted.rich.swap(10, 11);
    let err = builder.run(&unsorted, &[100.0], None).unwrap_err();
    assert!(err.is_unsorted());
    assert!(err.to_string().contains("rich"), "{err}");
}

#[test]
fn test_builder_ignores_order_of_unconfigured_systems() {
    let mut digis = uniform_digis(100, 10.0);
    digis.tof.reverse();
    let builder =
        EventBuilder::new(EventBuilderConfig::default().with_window(DetectorSystem::Sts, -5.0, 5.0)).unwrap();
    let (events, _) = builder.run(&digis, &[100.0], None).unwrap();
    assert_eq!(events[0].data.sts.len(), 1);
    assert!(events[0].data.tof.is_empty());
}

#[test]
fn test_builder_with_selector() {
    let digis = burst_digis();
    let builder = EventBuilder::new(burst_windows()).unwrap();
    // Second trigger lands in noise.
    let triggers = [1007.0, 3000.0, 5007.0];
    let selector = DigiEventSelector::new(
        DigiEventSelectorConfig::default().with_min_digis(DetectorSystem::Tof, 10),
        None,
    )
    .unwrap();

    let (events, monitor) = builder.run(&digis, &triggers, Some(&selector)).unwrap();
    let times: Vec<f64> = events.iter().map(|e| e.time).collect();
    assert_eq!(times, vec![1007.0, 5007.0]);
    assert_eq!(monitor.num_events, 2);
    assert_eq!(monitor.num_events_rejected, 1);
    assert_eq!(monitor.systems[&DetectorSystem::Tof].n_digis_in_events, 40);
}

#[test]
fn test_digi_multiplicity_chain() {
    init_logging();
    let chain = EventbuildChain::new(EventbuildConfig::new(tof_trigger(), burst_windows())).unwrap();
    let (events, monitor) = chain.run(&burst_digis(), &RecoInput::default()).unwrap();

    let times: Vec<f64> = events.iter().map(|e| e.time).collect();
    assert_eq!(times, vec![1007.0, 5007.0, 9007.0]);
    for event in &events {
        assert_eq!(event.data.tof.len(), 20);
        assert_eq!(event.data.sts.len(), 3);
        assert!(event.triggers.is_empty());
    }
    let trigger = monitor.trigger.unwrap();
    assert_eq!(trigger.num, 110);
    assert_eq!(trigger.num_triggers, 3);
    assert_eq!(trigger.num_in_trigger, 45);
    assert!(monitor.v0.is_none());
    assert_eq!(monitor.builder.num_events, 3);
}

#[test]
fn test_chain_selector_rejects_all() {
    let config = EventbuildConfig::new(tof_trigger(), burst_windows())
        .with_selector(DigiEventSelectorConfig::default().with_min_digis(DetectorSystem::Sts, 4));
    let chain = EventbuildChain::new(config).unwrap();
    let (events, monitor) = chain.run(&burst_digis(), &RecoInput::default()).unwrap();
    assert!(events.is_empty());
    assert_eq!(monitor.builder.num_events_rejected, 3);
}

#[test]
fn test_chain_from_json() {
    let json = r#"{
        "trigger": {
            "type": "digi_multiplicity",
            "system": "tof",
            "trigger": { "window": 30.0, "min_count": 15, "dead_time": 50.0 }
        },
        "builder": { "windows": {
            "tof": { "min": -10.0, "max": 20.0 },
            "sts": { "min": -10.0, "max": 20.0 }
        } },
        "selector": { "min_digis": { "tof": 20 } }
    }"#;
    let config = EventbuildConfig::from_json_str(json).unwrap();
    assert_eq!(
        config,
        EventbuildConfig::new(tof_trigger(), burst_windows())
            .with_selector(DigiEventSelectorConfig::default().with_min_digis(DetectorSystem::Tof, 20))
    );
    let chain = EventbuildChain::new(config).unwrap();
    let (events, _) = chain.run(&burst_digis(), &RecoInput::default()).unwrap();
    assert_eq!(events.len(), 3);
}

/// Station is the address divided by 10.
struct DecadeStations;

impl TrackingSetup for DecadeStations {
    fn station(&self, _system: DetectorSystem, address: u32) -> Option<u32> {
        Some(address / 10)
    }
}

#[test]
fn test_chain_layer_cut() {
    let config = EventbuildConfig::new(tof_trigger(), burst_windows())
        .with_selector(DigiEventSelectorConfig::default().with_min_layers(DetectorSystem::Sts, 2));
    assert!(matches!(
        EventbuildChain::new(config.clone()),
        Err(Error::MissingTrackingSetup(DetectorSystem::Sts))
    ));

    let mut digis = burst_digis();
    digis.sts = [(1005.0, 5), (1010.0, 15), (5005.0, 5), (5010.0, 6), (9005.0, 25), (9006.0, 25), (9007.0, 35)]
        .into_iter()
        .map(|(time, address)| StsDigi::new(address, 0, time, 10))
        .collect();

    let chain = EventbuildChain::with_tracking_setup(config, Arc::new(DecadeStations)).unwrap();
    assert!(chain.has_tracking_setup());
    let (events, monitor) = chain.run(&digis, &RecoInput::default()).unwrap();
    let times: Vec<f64> = events.iter().map(|e| e.time).collect();
    assert_eq!(times, vec![1007.0, 9007.0]);
    assert_eq!(monitor.builder.num_events_rejected, 1);
}

#[test]
fn test_register_tracking_setup() {
    let config = EventbuildConfig::new(tof_trigger(), burst_windows())
        .with_selector(DigiEventSelectorConfig::default().with_min_digis(DetectorSystem::Tof, 1));
    let mut chain = EventbuildChain::new(config).unwrap();
    assert!(!chain.has_tracking_setup());
    chain.register_tracking_setup(Arc::new(DecadeStations)).unwrap();
    assert!(chain.has_tracking_setup());
    let (events, _) = chain.run(&burst_digis(), &RecoInput::default()).unwrap();
    assert_eq!(events.len(), 3);
}

/// Two tracks from a decay at `vertex`, reported at z = 30.
fn decay(time: f64, vertex: [f64; 3]) -> [Track; 2] {
    let daughter = |tx: f64, ty: f64, dt: f64| {
        let dz = 30.0 - vertex[2];
        Track {
            time: time + dt,
            x: vertex[0] + tx * dz,
            y: vertex[1] + ty * dz,
            z: 30.0,
            tx,
            ty,
        }
    };
    [daughter(0.08, -0.02, 0.0), daughter(-0.04, 0.05, 1.0)]
}

#[test]
fn test_v0_chain_sets_lambda_bit() {
    init_logging();
    let config = EventbuildConfig::new(
        TriggerSource::V0 {
            trigger: V0TriggerConfig::default(),
        },
        EventBuilderConfig::default().with_window(DetectorSystem::Sts, -25.0, 25.0),
    );
    let chain = EventbuildChain::new(config).unwrap();

    let mut tracks = decay(2000.0, [0.2, -0.1, 15.0]).to_vec();
    tracks.extend(decay(6000.0, [0.0, 0.3, 10.0]));
    let digis = burst_digis();
    let (events, monitor) = chain.run(&digis, &RecoInput::default().with_tracks(&tracks)).unwrap();

    let times: Vec<f64> = events.iter().map(|e| e.time).collect();
    assert_eq!(times, vec![2000.5, 6000.5]);
    for event in &events {
        assert!(event.triggers.test(SelectionTrigger::Lambda));
        assert!(!event.triggers.test(SelectionTrigger::Ks));
        assert_eq!(event.data.sts.len(), 5);
        assert!(event.data.tof.is_empty());
    }
    let v0 = monitor.v0.unwrap();
    assert_eq!(v0.num_tracks, 4);
    assert_eq!(v0.num_track_pairs_after_z_cut, 2);
    assert!(monitor.trigger.is_none());
}

#[test]
fn test_v0_chain_with_unsorted_tracks_builds_nothing() {
    let config = EventbuildConfig::new(
        TriggerSource::V0 {
            trigger: V0TriggerConfig::default(),
        },
        EventBuilderConfig::default().with_window(DetectorSystem::Sts, -25.0, 25.0),
    );
    let chain = EventbuildChain::new(config).unwrap();
    let mut tracks = decay(2000.0, [0.2, -0.1, 15.0]).to_vec();
    tracks.reverse();
    let (events, monitor) = chain.run(&burst_digis(), &RecoInput::default().with_tracks(&tracks)).unwrap();
    assert!(events.is_empty());
    assert!(monitor.v0.unwrap().err_tracks_unsorted);
}
