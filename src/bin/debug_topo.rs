use framepipe::PinningStrategy;
use framepipe::SchedulerConfig;
use framepipe::topology::{RENDER_SLOT, SIMULATION_SLOT, Topology};

fn main() {
    let topo = Topology::detect();
    let config = SchedulerConfig::default();

    println!("Logical cores: {}", topo.logical_cores);
    println!("Physical cores: {}", topo.physical_cores);
    println!("SMT: {}", topo.has_smt());

    let workers = match config.worker_count(topo.logical_cores) {
        Ok(workers) => workers,
        Err(e) => {
            println!("{e}");
            return;
        }
    };
    println!("Workers (reserved {}): {workers}", config.reserved_threads);
    for strategy in [PinningStrategy::Linear, PinningStrategy::AvoidSMT] {
        println!("\n{strategy:?}:");
        let core = |slot| topo.core_for(strategy, slot).map(|c| c.id);
        println!("  simulation -> {:?}", core(SIMULATION_SLOT));
        println!("  render     -> {:?}", core(RENDER_SLOT));
        for i in 0..workers {
            println!("  worker {i:>3} -> {:?}", core(config.reserved_threads + i));
        }
    }
}
