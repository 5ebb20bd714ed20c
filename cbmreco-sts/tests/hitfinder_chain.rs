#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::unreadable_literal
)]
use approx::assert_relative_eq;
use cbmreco_core::StsDigi;
use cbmreco_sts::{
    address, AllocationMode, Backend, ChainState, ClusterKernel, Error, Hit, HitfinderChain,
    HitfinderChainPars, HitfinderPars, MemoryPars, ModulePars, ModuleTransform, RecoParams,
};

const N_CHANNELS: u16 = 1024;
const TRANSLATIONS: [[f64; 3]; 2] = [[0.0, 0.0, 30.0], [10.0, -5.0, 40.0]];

// Verification runs only with trace logging enabled.
fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Trace)
        .try_init();
}

fn module_addresses() -> [u32; 2] {
    [address::module_address(0, 0, 0, 0), address::module_address(0, 1, 1, 2)]
}

fn setup() -> HitfinderPars {
    let modules = module_addresses()
        .iter()
        .zip(TRANSLATIONS)
        .map(|(&addr, [x, y, z])| {
            ModulePars::standard(addr).with_transform(ModuleTransform::translation(x, y, z))
        })
        .collect();
    HitfinderPars {
        n_channels: N_CHANNELS,
        asic: Default::default(),
        landau: Default::default(),
        modules,
    }
}

fn chain_pars() -> HitfinderChainPars {
    HitfinderChainPars::new(setup())
}

/// A particle crossing one module at sensor coordinates `(x, y)`.
#[derive(Clone, Copy, Debug)]
struct Particle {
    module: usize,
    x: f64,
    y: f64,
    time: f64,
}

impl Particle {
    fn digis(&self) -> [StsDigi; 2] {
        let m = ModulePars::standard(0);
        let tan_back = m.stereo_back.to_radians().tan();
        let x_back = self.x - (m.dy - self.y) * tan_back;
        let ch_front = (self.x / m.pitch) as u16;
        let ch_back = (x_back / m.pitch) as u16;
        let addr = module_addresses()[self.module];
        [
            StsDigi::new(addr, ch_front, self.time, 20),
            StsDigi::new(addr, N_CHANNELS + ch_back, self.time + 2.0, 20),
        ]
    }

    fn expected_global(&self) -> [f64; 3] {
        let m = ModulePars::standard(0);
        let dx = f64::from(N_CHANNELS) * m.pitch;
        let t = TRANSLATIONS[self.module];
        [self.x - 0.5 * dx + t[0], self.y - 0.5 * m.dy + t[1], t[2]]
    }
}

fn particles(module: usize, n: usize, t0: f64) -> Vec<Particle> {
    (0..n)
        .map(|k| Particle {
            module,
            x: 1.0 + ((k * 37) % 400) as f64 * 0.01,
            y: 0.5 + ((k * 53) % 500) as f64 * 0.01,
            time: t0 + 1000.0 * k as f64,
        })
        .collect()
}

fn digis_of(particles: &[Particle]) -> Vec<StsDigi> {
    particles.iter().flat_map(Particle::digis).collect()
}

fn standard_event() -> (Vec<Particle>, Vec<StsDigi>) {
    let mut all = particles(0, 8, 1000.0);
    all.extend(particles(1, 6, 1100.0));
    let digis = digis_of(&all);
    (all, digis)
}

fn all_hits(chain: &mut HitfinderChain, digis: &[StsDigi]) -> Vec<(u32, Hit)> {
    let result = chain.run(digis, false).unwrap();
    result
        .hits
        .iter()
        .flat_map(|(part, addr)| part.iter().map(move |h| (addr, *h)))
        .collect()
}

#[test]
fn test_hits_reconstruct_particle_positions() {
    init_logging();
    let (particles, digis) = standard_event();
    let mut chain = HitfinderChain::new();
    chain.set_parameters(chain_pars()).unwrap();

    let hits = all_hits(&mut chain, &digis);
    assert_eq!(hits.len(), particles.len());

    for p in &particles {
        let addr = module_addresses()[p.module];
        let matching: Vec<&Hit> = hits
            .iter()
            .filter(|(a, h)| *a == addr && (h.time - (p.time + 1.0)).abs() < 0.5)
            .map(|(_, h)| h)
            .collect();
        assert_eq!(matching.len(), 1, "particle {p:?}");
        let hit = matching[0];
        let [x, y, z] = p.expected_global();
        assert_relative_eq!(hit.x, x, epsilon = 0.003);
        assert_relative_eq!(hit.y, y, epsilon = 0.05);
        assert_relative_eq!(hit.z, z, epsilon = 1e-9);
        assert_eq!(hit.address, addr);
        assert!(hit.dy > hit.dx);
    }
}

#[test]
fn test_one_stream_per_small_module() {
    init_logging();
    let (_, digis) = standard_event();
    let mut chain = HitfinderChain::new();
    chain.set_parameters(chain_pars()).unwrap();

    let result = chain.run(&digis, false).unwrap();
    assert_eq!(result.hits.n_partitions(), 2);
    assert_eq!(result.hits.addresses(), &module_addresses());
    assert_eq!(result.hits.size(0).unwrap(), 8);
    assert_eq!(result.hits.size(1).unwrap(), 6);
    assert_eq!(result.monitor.n_hits_per_module, vec![8, 6]);
    assert_eq!(result.monitor.n_clusters_per_side, vec![8, 6, 8, 6]);
    assert_eq!(result.monitor.n_digis, digis.len());
    assert!(!result.monitor.has_overflow());
}

#[test]
fn test_large_module_is_split_into_streams() {
    init_logging();
    let mut all = particles(0, 60, 500.0);
    all.extend(particles(1, 5, 700.0));
    let mut digis = digis_of(&all);
    digis.reverse();

    let pars = chain_pars().with_reco(RecoParams::default().with_n_hit_streams(4));
    let mut chain = HitfinderChain::new();
    chain.set_parameters(pars).unwrap();

    let result = chain.run(&digis, false).unwrap();
    let [a0, a1] = module_addresses();
    assert_eq!(result.hits.addresses(), &[a0, a0, a1]);
    assert_eq!(result.hits.offsets(), &[0, 30, 60, 65]);
    for (part, _) in result.hits.iter() {
        assert!(part.windows(2).all(|w| w[0].time <= w[1].time));
    }
    assert_eq!(result.monitor.n_streams, 3);
}

#[test]
fn test_repeated_runs_are_identical() {
    init_logging();
    let (_, digis) = standard_event();
    let mut chain = HitfinderChain::new();
    chain.set_parameters(chain_pars()).unwrap();

    let (first, first_mon) = {
        let r = chain.run(&digis, true).unwrap();
        (r.hits.to_partitioned_vec(), r.monitor)
    };
    let r = chain.run(&digis, true).unwrap();
    assert_eq!(r.hits.to_partitioned_vec(), first);
    assert_eq!(r.monitor, first_mon);
}

#[test]
fn test_kernels_and_backends_agree() {
    init_logging();
    let (_, digis) = standard_event();
    let variants = [
        (ClusterKernel::SingleStep, Backend::Parallel { threads: None }),
        (ClusterKernel::MultiStage, Backend::Parallel { threads: Some(3) }),
        (ClusterKernel::SingleStep, Backend::Serial),
        (ClusterKernel::MultiStage, Backend::Serial),
    ];

    let mut outputs = Vec::new();
    for (kernel, backend) in variants {
        let pars = chain_pars()
            .with_reco(RecoParams::default().with_cluster_kernel(kernel))
            .with_backend(backend);
        let mut chain = HitfinderChain::new();
        chain.set_parameters(pars).unwrap();
        let r = chain.run(&digis, true).unwrap();
        outputs.push((r.hits.to_partitioned_vec(), r.clusters.unwrap()));
    }
    for out in &outputs[1..] {
        assert_eq!(out, &outputs[0]);
    }
}

#[test]
fn test_stored_clusters_layout() {
    init_logging();
    let (_, digis) = standard_event();
    let mut chain = HitfinderChain::new();
    chain.set_parameters(chain_pars()).unwrap();

    let without = chain.run(&digis, false).unwrap();
    assert!(without.clusters.is_none());

    let clusters = chain.run(&digis, true).unwrap().clusters.unwrap();
    let [a0, a1] = module_addresses();
    assert_eq!(clusters.n_partitions(), 4);
    assert_eq!(clusters.addresses(), &[a0, a1, a0, a1]);
    for (part, _) in clusters.iter() {
        assert!(part.windows(2).all(|w| w[0].time <= w[1].time));
        assert!(part.iter().all(|c| c.size == 1));
    }
}

#[test]
fn test_run_before_configuration_fails() {
    let mut chain = HitfinderChain::new();
    assert_eq!(chain.state(), ChainState::Unconfigured);
    let err = chain.run(&[], false).unwrap_err();
    assert!(matches!(err, Error::ParametersNotSet));
}

#[test]
fn test_lifecycle_states() {
    init_logging();
    let (_, digis) = standard_event();
    let mut chain = HitfinderChain::new();

    let dynamic = chain_pars()
        .with_memory(MemoryPars::default().with_allocation_mode(AllocationMode::Dynamic));
    chain.set_parameters(dynamic).unwrap();
    assert_eq!(chain.state(), ChainState::Configured);
    assert_eq!(chain.allocation_mode(), Some(AllocationMode::Dynamic));
    chain.run(&digis, false).unwrap();
    assert_eq!(chain.state(), ChainState::Ready);

    let fixed = chain_pars().with_memory(
        MemoryPars::default()
            .with_allocation_mode(AllocationMode::Static)
            .with_static_bounds(1000, 100),
    );
    chain.set_parameters(fixed).unwrap();
    assert_eq!(chain.state(), ChainState::Ready);
    assert_eq!(chain.allocation_mode(), Some(AllocationMode::Static));

    chain.finalize();
    assert_eq!(chain.state(), ChainState::Unconfigured);
    assert!(chain.parameters().is_none());
    assert!(matches!(chain.run(&digis, false), Err(Error::ParametersNotSet)));
}

#[test]
fn test_auto_allocation_resolves_to_dynamic() {
    let mut chain = HitfinderChain::new();
    chain.set_parameters(chain_pars()).unwrap();
    assert_eq!(chain.allocation_mode(), Some(AllocationMode::Dynamic));
}

#[test]
fn test_static_bounds_exceeded() {
    init_logging();
    let (_, digis) = standard_event();
    let mut chain = HitfinderChain::new();

    let per_module = MemoryPars::default()
        .with_allocation_mode(AllocationMode::Static)
        .with_static_bounds(1000, 5);
    chain.set_parameters(chain_pars().with_memory(per_module)).unwrap();
    match chain.run(&digis, false) {
        Err(Error::CapacityExceeded {
            what,
            observed,
            bound,
        }) => {
            assert_eq!(what, "digis per module");
            assert_eq!(observed, 8);
            assert_eq!(bound, 5);
        }
        other => panic!("expected capacity error, got {other:?}"),
    }

    let per_ts = MemoryPars::default()
        .with_allocation_mode(AllocationMode::Static)
        .with_static_bounds(20, 100);
    chain.set_parameters(chain_pars().with_memory(per_ts)).unwrap();
    assert!(matches!(
        chain.run(&digis, false),
        Err(Error::CapacityExceeded {
            what: "digis per time-slice",
            ..
        })
    ));

    let enough = MemoryPars::default()
        .with_allocation_mode(AllocationMode::Static)
        .with_static_bounds(digis.len(), 8);
    chain.set_parameters(chain_pars().with_memory(enough)).unwrap();
    assert_eq!(chain.run(&digis, false).unwrap().monitor.n_hits_total, 14);
}

#[test]
fn test_unknown_digis_are_dropped() {
    init_logging();
    let (particles, mut digis) = standard_event();
    let unknown_module = address::module_address(7, 3, 0, 1);
    digis.push(StsDigi::new(unknown_module, 10, 1500.0, 20));
    digis.push(StsDigi::new(module_addresses()[0], 2 * N_CHANNELS + 4, 1500.0, 20));

    let mut chain = HitfinderChain::new();
    chain.set_parameters(chain_pars()).unwrap();
    let result = chain.run(&digis, false).unwrap();
    assert_eq!(result.monitor.n_digis_dropped, 2);
    assert_eq!(result.monitor.n_digis, digis.len());
    assert_eq!(result.hits.n_elements(), particles.len());
}

#[test]
fn test_hit_overflow_is_clamped_per_module() {
    init_logging();
    let (_, digis) = standard_event();
    // Eight digis on the fullest side give 8 clusters and room for 4 hits.
    let memory = MemoryPars::default().try_with_hits_per_cluster(0.5).unwrap();

    let mut chain = HitfinderChain::new();
    chain.set_parameters(chain_pars().with_memory(memory)).unwrap();
    let result = chain.run(&digis, false).unwrap();

    assert_eq!(result.monitor.hit_bucket_capacity, 4);
    assert_eq!(result.monitor.n_cluster_bucket_overflow, 0);
    assert_eq!(result.monitor.n_hit_bucket_overflow, (8 - 4) + (6 - 4));
    assert!(result.monitor.has_overflow());
    assert_eq!(result.monitor.n_hits_per_module, vec![4, 4]);
    assert_eq!(result.hits.n_elements(), 8);
    assert_eq!(result.monitor.n_hits_total, 8);
    for (part, _) in result.hits.iter() {
        assert!(part.windows(2).all(|w| w[0].time <= w[1].time));
    }
}

#[test]
fn test_cluster_overflow_is_reported() {
    init_logging();
    let addr = module_addresses()[0];
    let digis: Vec<StsDigi> = (0..10).map(|i| StsDigi::new(addr, 2 * i, 100.0, 20)).collect();
    let memory = MemoryPars::default().try_with_clusters_per_digi(0.5).unwrap();

    let mut chain = HitfinderChain::new();
    chain.set_parameters(chain_pars().with_memory(memory)).unwrap();
    let result = chain.run(&digis, true).unwrap();

    assert_eq!(result.monitor.cluster_bucket_capacity, 5);
    assert_eq!(result.monitor.n_clusters_per_side[0], 5);
    assert_eq!(result.monitor.n_cluster_bucket_overflow, 5);
    assert!(result.monitor.has_overflow());
    assert_eq!(result.hits.n_elements(), 0);
    assert_eq!(result.clusters.unwrap().size(0).unwrap(), 5);
}

#[test]
fn test_empty_input() {
    init_logging();
    let mut chain = HitfinderChain::new();
    chain.set_parameters(chain_pars()).unwrap();
    let result = chain.run(&[], true).unwrap();
    assert_eq!(result.hits.n_elements(), 0);
    assert_eq!(result.hits.n_partitions(), 2);
    assert_eq!(result.clusters.unwrap().n_elements(), 0);
}

#[test]
fn test_parameters_from_json() {
    init_logging();
    let [a0, a1] = module_addresses();
    let json = format!(
        r#"{{
            "setup": {{
                "n_channels": 1024,
                "modules": [
                    {{"address": {a0}, "dy": 6.2, "pitch": 0.0058, "stereo_front": 0.0, "stereo_back": 7.5,
                      "transform": {{"rotation": [1,0,0,0,1,0,0,0,1], "translation": [0.0, 0.0, 30.0]}}}},
                    {{"address": {a1}, "dy": 6.2, "pitch": 0.0058, "stereo_front": 0.0, "stereo_back": 7.5,
                      "transform": {{"rotation": [1,0,0,0,1,0,0,0,1], "translation": [10.0, -5.0, 40.0]}}}}
                ]
            }},
            "reco": {{"cluster_kernel": "multi_stage"}},
            "memory": {{"allocation_mode": "static", "max_n_digis_per_ts": 100, "max_n_digis_per_module": 20}},
            "backend": "serial"
        }}"#
    );
    let pars = HitfinderChainPars::from_json_str(&json).unwrap();
    assert_eq!(pars.backend, Backend::Serial);
    assert_eq!(pars.reco.cluster_kernel, ClusterKernel::MultiStage);

    let (_, digis) = standard_event();
    let mut from_json = HitfinderChain::new();
    from_json.set_parameters(pars).unwrap();
    let mut from_code = HitfinderChain::new();
    from_code.set_parameters(chain_pars()).unwrap();

    let a = from_json.run(&digis, false).unwrap().hits.to_partitioned_vec();
    let b = from_code.run(&digis, false).unwrap().hits.to_partitioned_vec();
    assert_eq!(a, b);
}

#[test]
fn test_invalid_parameters_rejected() {
    let mut setup = setup();
    setup.modules[1].address = setup.modules[0].address;
    let mut chain = HitfinderChain::new();
    let err = chain.set_parameters(HitfinderChainPars::new(setup)).unwrap_err();
    assert!(matches!(err, Error::InvalidParameters(_)));
    assert_eq!(chain.state(), ChainState::Unconfigured);
}
