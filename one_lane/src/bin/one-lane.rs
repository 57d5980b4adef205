//! Send cars and pedestrians across a one-lane crossing and report how many made it.

use arrrg::CommandLine;

use one_lane::simulation::{Simulation, SimulationOptions};
use one_lane::trace::TraceEmitter;
use one_lane::{Error, COLLECTOR};

fn run(options: SimulationOptions) -> Result<(), Error> {
    if options.trace {
        COLLECTOR.register(TraceEmitter::stderr());
    }
    let simulation = Simulation::new(options)?;
    let report = simulation.run();
    COLLECTOR.flush();
    COLLECTOR.deregister();
    let report = report?;
    println!("{}", report);
    if let Some(path) = &simulation.options().metrics {
        let collector = biometrics::Collector::new();
        one_lane::register_biometrics(&collector);
        let fout = std::fs::File::create(path)?;
        let mut emit = biometrics::PlainTextEmitter::new(fout);
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|x| x.as_millis() as u64)
            .unwrap_or(0);
        collector.emit(&mut emit, now)?;
    }
    Ok(())
}

fn main() {
    let (options, free) = SimulationOptions::from_command_line("Usage: one-lane [OPTIONS]");
    if !free.is_empty() {
        eprintln!("one-lane: free arguments are not accepted");
        std::process::exit(1);
    }
    if let Err(err) = run(options) {
        eprintln!("one-lane: {}", err);
        std::process::exit(1);
    }
}
