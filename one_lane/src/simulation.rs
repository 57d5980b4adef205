//! A simulation that sends cars and pedestrians over a [CrossingMonitor].
//!
//! Each class gets a generator thread.  The generator spawns one actor thread per car or
//! pedestrian, pausing for an exponentially distributed interval between spawns, and then joins
//! every actor it spawned.  An actor enters the crossing, sleeps for its crossing time, and
//! leaves.  Actors and generators hold no synchronization of their own; everything goes through
//! the monitor.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use biometrics::{Collector, Counter, Moments};
use guacamole::combinators::{any, exponentially_distributed};
use guacamole::Guacamole;
use indicio::clue;

use crate::{
    Class, CrossingMonitor, CrossingOptions, CrossingState, Error, PerClass, Policy, COLLECTOR,
};

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static GENERATOR_START: Counter = Counter::new("one_lane.simulation.generator.start");
static GENERATOR_DONE: Counter = Counter::new("one_lane.simulation.generator.done");
static ACTOR_SPAWN: Counter = Counter::new("one_lane.simulation.actor.spawn");
static ACTOR_DONE: Counter = Counter::new("one_lane.simulation.actor.done");
static ACTOR_PANIC: Counter = Counter::new("one_lane.simulation.actor.panic");

static INTERARRIVAL_TIME: Moments = Moments::new("one_lane.simulation.interarrival_micros");
static CROSSING_TIME: Moments = Moments::new("one_lane.simulation.crossing_micros");

pub fn register_biometrics(collector: &Collector) {
    collector.register_counter(&GENERATOR_START);
    collector.register_counter(&GENERATOR_DONE);
    collector.register_counter(&ACTOR_SPAWN);
    collector.register_counter(&ACTOR_DONE);
    collector.register_counter(&ACTOR_PANIC);
    collector.register_moments(&INTERARRIVAL_TIME);
    collector.register_moments(&CROSSING_TIME);
}

///////////////////////////////////////// SimulationOptions ////////////////////////////////////////

/// Options for a [Simulation].  Times are in milliseconds.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "command_line", derive(arrrg_derive::CommandLine))]
pub struct SimulationOptions {
    /// The policy of the crossing.
    #[cfg_attr(feature = "command_line", arrrg(nested))]
    pub crossing: CrossingOptions,
    /// Cars to send in each direction.
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Cars to send in each direction.", "N")
    )]
    pub cars: u64,
    /// Pedestrians to send.
    #[cfg_attr(feature = "command_line", arrrg(optional, "Pedestrians to send.", "N"))]
    pub pedestrians: u64,
    /// Mean time between north-bound car arrivals.
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Mean milliseconds between north-bound cars.", "MS")
    )]
    pub car_north_interarrival_ms: f64,
    /// Mean time between south-bound car arrivals.
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Mean milliseconds between south-bound cars.", "MS")
    )]
    pub car_south_interarrival_ms: f64,
    /// Mean time between pedestrian arrivals.
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Mean milliseconds between pedestrians.", "MS")
    )]
    pub pedestrian_interarrival_ms: f64,
    /// Mean time a north-bound car spends on the crossing.
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Mean milliseconds a north-bound car spends crossing.", "MS")
    )]
    pub car_north_crossing_ms: f64,
    /// Mean time a south-bound car spends on the crossing.
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Mean milliseconds a south-bound car spends crossing.", "MS")
    )]
    pub car_south_crossing_ms: f64,
    /// Mean time a pedestrian spends on the crossing.
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Mean milliseconds a pedestrian spends crossing.", "MS")
    )]
    pub pedestrian_crossing_ms: f64,
    /// Guacamole seed.
    #[cfg_attr(feature = "command_line", arrrg(optional, "Guacamole seed."))]
    pub seed: u64,
    /// Print a trace line for every actor transition.
    #[cfg_attr(
        feature = "command_line",
        arrrg(flag, "Print a trace line for every actor transition.")
    )]
    pub trace: bool,
    /// Write biometrics to this path once the simulation completes.
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Write biometrics to this path when done.", "PATH")
    )]
    pub metrics: Option<String>,
}

impl SimulationOptions {
    /// The number of actors of `class` to send.
    pub fn actors(&self, class: Class) -> u64 {
        match class {
            Class::CarNorth | Class::CarSouth => self.cars,
            Class::Pedestrian => self.pedestrians,
        }
    }

    pub fn interarrival_ms(&self, class: Class) -> f64 {
        match class {
            Class::CarNorth => self.car_north_interarrival_ms,
            Class::CarSouth => self.car_south_interarrival_ms,
            Class::Pedestrian => self.pedestrian_interarrival_ms,
        }
    }

    pub fn crossing_ms(&self, class: Class) -> f64 {
        match class {
            Class::CarNorth => self.car_north_crossing_ms,
            Class::CarSouth => self.car_south_crossing_ms,
            Class::Pedestrian => self.pedestrian_crossing_ms,
        }
    }

    /// Swap north and south throughout, thresholds included.
    pub fn mirror(&self) -> Self {
        Self {
            crossing: CrossingOptions {
                unrestricted: self.crossing.unrestricted,
                car_north_threshold: self.crossing.car_south_threshold,
                car_south_threshold: self.crossing.car_north_threshold,
                pedestrian_threshold: self.crossing.pedestrian_threshold,
            },
            car_north_interarrival_ms: self.car_south_interarrival_ms,
            car_south_interarrival_ms: self.car_north_interarrival_ms,
            car_north_crossing_ms: self.car_south_crossing_ms,
            car_south_crossing_ms: self.car_north_crossing_ms,
            ..self.clone()
        }
    }

    /// Reject times that are negative or not finite.
    pub fn validate(&self) -> Result<(), Error> {
        for class in Class::ALL {
            let interarrival = self.interarrival_ms(class);
            if !interarrival.is_finite() || interarrival < 0.0 {
                return Err(Error::invalid_option(format!(
                    "{} interarrival time must be a non-negative number of milliseconds, not {}",
                    class, interarrival
                )));
            }
            let crossing = self.crossing_ms(class);
            if !crossing.is_finite() || crossing < 0.0 {
                return Err(Error::invalid_option(format!(
                    "{} crossing time must be a non-negative number of milliseconds, not {}",
                    class, crossing
                )));
            }
        }
        Ok(())
    }
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            crossing: CrossingOptions::default(),
            cars: 60,
            pedestrians: 10,
            car_north_interarrival_ms: 500.0,
            car_south_interarrival_ms: 500.0,
            pedestrian_interarrival_ms: 5_000.0,
            car_north_crossing_ms: 75.0,
            car_south_crossing_ms: 75.0,
            pedestrian_crossing_ms: 150.0,
            seed: 0,
            trace: false,
            metrics: None,
        }
    }
}

impl PartialEq for SimulationOptions {
    fn eq(&self, other: &SimulationOptions) -> bool {
        fn approx_eq(lhs: f64, rhs: f64) -> bool {
            lhs == rhs || (lhs * 0.999 < rhs && lhs * 1.001 > rhs)
        }
        self.crossing == other.crossing
            && self.cars == other.cars
            && self.pedestrians == other.pedestrians
            && approx_eq(
                self.car_north_interarrival_ms,
                other.car_north_interarrival_ms,
            )
            && approx_eq(
                self.car_south_interarrival_ms,
                other.car_south_interarrival_ms,
            )
            && approx_eq(
                self.pedestrian_interarrival_ms,
                other.pedestrian_interarrival_ms,
            )
            && approx_eq(self.car_north_crossing_ms, other.car_north_crossing_ms)
            && approx_eq(self.car_south_crossing_ms, other.car_south_crossing_ms)
            && approx_eq(self.pedestrian_crossing_ms, other.pedestrian_crossing_ms)
            && self.seed == other.seed
            && self.trace == other.trace
            && self.metrics == other.metrics
    }
}

impl Eq for SimulationOptions {}

/////////////////////////////////////////////// Actor //////////////////////////////////////////////

struct Actor {
    class: Class,
    id: u64,
    crossing_time: Duration,
    monitor: Arc<CrossingMonitor>,
}

impl Actor {
    fn run(self) {
        self.clue("wants_to_enter");
        self.monitor.enter(self.class);
        self.clue("entered");
        std::thread::sleep(self.crossing_time);
        CROSSING_TIME.add(self.crossing_time.as_micros() as f64);
        self.clue("leaving");
        self.monitor.leave(self.class);
        self.clue("left");
        ACTOR_DONE.click();
    }

    fn clue(&self, event: &str) {
        if !COLLECTOR.is_logging() {
            return;
        }
        let state = self.monitor.snapshot();
        clue!(COLLECTOR, indicio::ALWAYS, {
            class: self.class.as_str(),
            id: self.id,
            event: event,
            occupancy: {
                car_north: state.occupancy.car_north,
                car_south: state.occupancy.car_south,
                pedestrian: state.occupancy.pedestrian,
            },
            waiting: {
                car_north: state.waiting.car_north,
                car_south: state.waiting.car_south,
                pedestrian: state.waiting.pedestrian,
            },
        });
    }
}

///////////////////////////////////////////// Generator ////////////////////////////////////////////

struct Generator {
    class: Class,
    actors: u64,
    interarrival_ms: f64,
    crossing_ms: f64,
    seed: u64,
    monitor: Arc<CrossingMonitor>,
}

impl Generator {
    fn run(self) -> Result<u64, Error> {
        GENERATOR_START.click();
        let mut guac = Guacamole::new(self.seed);
        let mut interarrival = exponentially_distributed(self.interarrival_ms);
        let mut threads: Vec<JoinHandle<()>> = Vec::new();
        for id in 1..=self.actors {
            if id > 1 {
                let pause = millis_to_duration(interarrival(&mut guac));
                INTERARRIVAL_TIME.add(pause.as_micros() as f64);
                std::thread::sleep(pause);
            }
            // Uniform over [0, 2 * mean) so the mean is what was asked for.
            let crossing_time = millis_to_duration(any::<f64>(&mut guac) * 2.0 * self.crossing_ms);
            let actor = Actor {
                class: self.class,
                id,
                crossing_time,
                monitor: Arc::clone(&self.monitor),
            };
            ACTOR_SPAWN.click();
            threads.push(std::thread::spawn(move || actor.run()));
        }
        let mut crossed = 0;
        let mut result = Ok(());
        for thread in threads.into_iter() {
            match thread.join() {
                Ok(()) => crossed += 1,
                Err(_) => {
                    ACTOR_PANIC.click();
                    result = Err(Error::ActorPanicked { class: self.class });
                }
            }
        }
        GENERATOR_DONE.click();
        result.map(|()| crossed)
    }
}

fn millis_to_duration(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_micros((ms * 1_000.0) as u64)
    } else {
        Duration::ZERO
    }
}

////////////////////////////////////////////// Report //////////////////////////////////////////////

/// The outcome of a [Simulation].
#[derive(Clone, Debug, Default)]
pub struct Report {
    /// Actors of each class that entered and left the crossing.
    pub crossed: PerClass<u64>,
    /// The monitor's counters once every actor finished.
    pub state: CrossingState,
    pub elapsed: Duration,
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        for class in Class::ALL {
            writeln!(
                f,
                "{}: crossed={} admitted={} departed={}",
                class, self.crossed[class], self.state.admitted[class], self.state.departed[class]
            )?;
        }
        write!(f, "elapsed: {:.3}s", self.elapsed.as_secs_f64())
    }
}

//////////////////////////////////////////// Simulation ////////////////////////////////////////////

/// A [Simulation] runs one generator per class against a shared [CrossingMonitor].
pub struct Simulation {
    options: SimulationOptions,
    monitor: Arc<CrossingMonitor>,
}

impl Simulation {
    /// Validate the options and build the monitor they describe.
    pub fn new(options: SimulationOptions) -> Result<Self, Error> {
        options.validate()?;
        let policy = Policy::from(&options.crossing);
        let monitor = Arc::new(CrossingMonitor::new(policy));
        Ok(Self { options, monitor })
    }

    pub fn options(&self) -> &SimulationOptions {
        &self.options
    }

    /// The monitor every actor shares.
    pub fn monitor(&self) -> &Arc<CrossingMonitor> {
        &self.monitor
    }

    /// Run every generator to completion.
    pub fn run(&self) -> Result<Report, Error> {
        let started = Instant::now();
        let mut generators = Vec::new();
        for (index, class) in Class::ALL.into_iter().enumerate() {
            let generator = Generator {
                class,
                actors: self.options.actors(class),
                interarrival_ms: self.options.interarrival_ms(class),
                crossing_ms: self.options.crossing_ms(class),
                seed: self
                    .options
                    .seed
                    .wrapping_add((u64::MAX / Class::ALL.len() as u64) * index as u64),
                monitor: Arc::clone(&self.monitor),
            };
            generators.push((class, std::thread::spawn(move || generator.run())));
        }
        let mut report = Report::default();
        let mut result = Ok(());
        for (class, generator) in generators.into_iter() {
            match generator.join() {
                Ok(Ok(crossed)) => report.crossed[class] = crossed,
                Ok(Err(err)) => result = Err(err),
                Err(_) => result = Err(Error::GeneratorPanicked { class }),
            }
        }
        result?;
        report.state = self.monitor.snapshot();
        report.elapsed = started.elapsed();
        Ok(report)
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////
