//! one_lane shares a single-lane crossing between north-bound cars, south-bound cars, and
//! pedestrians.
//!
//! The [CrossingMonitor] admits an actor onto the crossing only when no actor of a conflicting
//! class occupies it.  Actors of the same class cross concurrently.  To keep a flood of one class
//! from starving the others, the monitor applies back-pressure:  once a competing class has more
//! waiters than its threshold, new arrivals yield at a starvation-avoidance gate until the backlog
//! drains.  See [Policy] for how thresholds are configured or disabled.
//!
//! Every actor passes through `enter` and then `leave` exactly once:
//!
//! ```
//! use one_lane::{Class, CrossingMonitor, Policy};
//!
//! let monitor = CrossingMonitor::new(Policy::default());
//! monitor.enter(Class::Pedestrian);
//! // cross the bridge
//! monitor.leave(Class::Pedestrian);
//! ```

use std::fmt::{Display, Formatter};
use std::ops::{Index, IndexMut};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use biometrics::{Collector, Counter, Moments};
use indicio::clue;

pub mod simulation;
pub mod trace;

///////////////////////////////////////////// Constants ////////////////////////////////////////////

/// Threshold for north-bound cars when none is configured.
pub const CAR_NORTH_THRESHOLD: u64 = 3;
/// Threshold for south-bound cars when none is configured.
pub const CAR_SOUTH_THRESHOLD: u64 = 3;
/// Threshold for pedestrians when none is configured.
pub const PEDESTRIAN_THRESHOLD: u64 = 2;

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static ENTER: Counter = Counter::new("one_lane.enter");
static ADMIT: Counter = Counter::new("one_lane.admit");
static LEAVE: Counter = Counter::new("one_lane.leave");
static STARVATION_GATE_WAIT: Counter = Counter::new("one_lane.starvation_gate.wait");
static STARVATION_GATE_NOTIFY: Counter = Counter::new("one_lane.starvation_gate.notify");
static SAFETY_GATE_WAIT: Counter = Counter::new("one_lane.safety_gate.wait");
static SAFETY_GATE_NOTIFY: Counter = Counter::new("one_lane.safety_gate.notify");

static EMPTY_CROSSING: Counter = Counter::new("one_lane.error.empty_crossing");
static INVALID_OPTION: Counter = Counter::new("one_lane.error.invalid_option");
static IO_ERROR: Counter = Counter::new("one_lane.error.io");

static ENTER_WAIT: Moments = Moments::new("one_lane.enter.wait_micros");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: &Collector) {
    collector.register_counter(&ENTER);
    collector.register_counter(&ADMIT);
    collector.register_counter(&LEAVE);
    collector.register_counter(&STARVATION_GATE_WAIT);
    collector.register_counter(&STARVATION_GATE_NOTIFY);
    collector.register_counter(&SAFETY_GATE_WAIT);
    collector.register_counter(&SAFETY_GATE_NOTIFY);
    collector.register_counter(&EMPTY_CROSSING);
    collector.register_counter(&INVALID_OPTION);
    collector.register_counter(&IO_ERROR);
    collector.register_moments(&ENTER_WAIT);
    simulation::register_biometrics(collector);
}

////////////////////////////////////////////// indicio /////////////////////////////////////////////

/// The clue collector for this crate.  Nothing is emitted until an emitter is registered.
pub static COLLECTOR: indicio::Collector = indicio::Collector::new();

/////////////////////////////////////////////// Error //////////////////////////////////////////////

#[derive(Debug)]
pub enum Error {
    /// An actor of `class` tried to leave a crossing that holds no actor of its class.
    EmptyCrossing { class: Class },
    /// A configuration value was rejected.
    InvalidOption { what: String },
    /// An actor thread panicked.  Only observable when panics unwind, as they do under
    /// `cargo test`; the workspace's dev and release profiles abort on panic instead.
    ActorPanicked { class: Class },
    /// A generator thread panicked.  Like [Error::ActorPanicked], only observable when panics
    /// unwind.
    GeneratorPanicked { class: Class },
    /// Writing biometrics or trace output failed.
    Io(std::io::Error),
}

impl Error {
    pub(crate) fn invalid_option(what: impl Into<String>) -> Self {
        INVALID_OPTION.click();
        Self::InvalidOption { what: what.into() }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        IO_ERROR.click();
        Self::Io(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Error::EmptyCrossing { class } => {
                write!(f, "{} left a crossing with no {} on it", class, class)
            }
            Error::InvalidOption { what } => write!(f, "invalid option: {}", what),
            Error::ActorPanicked { class } => write!(f, "{} actor panicked", class),
            Error::GeneratorPanicked { class } => write!(f, "{} generator panicked", class),
            Error::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

/////////////////////////////////////////////// Class //////////////////////////////////////////////

/// The three classes of actor that compete for the crossing.  Any two distinct classes conflict.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Class {
    CarNorth,
    CarSouth,
    Pedestrian,
}

impl Class {
    pub const ALL: [Class; 3] = [Class::CarNorth, Class::CarSouth, Class::Pedestrian];

    /// The two classes that conflict with `self`.
    pub fn competitors(self) -> [Class; 2] {
        match self {
            Class::CarNorth => [Class::CarSouth, Class::Pedestrian],
            Class::CarSouth => [Class::CarNorth, Class::Pedestrian],
            Class::Pedestrian => [Class::CarNorth, Class::CarSouth],
        }
    }

    /// Swap the direction of cars.  Pedestrians are their own mirror.
    pub fn mirror(self) -> Class {
        match self {
            Class::CarNorth => Class::CarSouth,
            Class::CarSouth => Class::CarNorth,
            Class::Pedestrian => Class::Pedestrian,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Class::CarNorth => "car_north",
            Class::CarSouth => "car_south",
            Class::Pedestrian => "pedestrian",
        }
    }
}

impl Display for Class {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.as_str())
    }
}

///////////////////////////////////////////// PerClass /////////////////////////////////////////////

/// One `T` for each [Class], indexable by class.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PerClass<T> {
    pub car_north: T,
    pub car_south: T,
    pub pedestrian: T,
}

impl<T> PerClass<T> {
    pub const fn new(car_north: T, car_south: T, pedestrian: T) -> Self {
        Self {
            car_north,
            car_south,
            pedestrian,
        }
    }

    pub fn from_fn<F: FnMut(Class) -> T>(mut f: F) -> Self {
        Self {
            car_north: f(Class::CarNorth),
            car_south: f(Class::CarSouth),
            pedestrian: f(Class::Pedestrian),
        }
    }

    /// Swap the north and south entries.
    pub fn mirror(self) -> Self {
        Self {
            car_north: self.car_south,
            car_south: self.car_north,
            pedestrian: self.pedestrian,
        }
    }
}

impl<T> Index<Class> for PerClass<T> {
    type Output = T;

    fn index(&self, class: Class) -> &T {
        match class {
            Class::CarNorth => &self.car_north,
            Class::CarSouth => &self.car_south,
            Class::Pedestrian => &self.pedestrian,
        }
    }
}

impl<T> IndexMut<Class> for PerClass<T> {
    fn index_mut(&mut self, class: Class) -> &mut T {
        match class {
            Class::CarNorth => &mut self.car_north,
            Class::CarSouth => &mut self.car_south,
            Class::Pedestrian => &mut self.pedestrian,
        }
    }
}

////////////////////////////////////////////// Policy //////////////////////////////////////////////

/// The admission policy of a [CrossingMonitor].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Policy {
    /// Admit on occupancy alone.  Classes never yield to one another's backlog.
    Unrestricted,
    /// A class is backlogged when more of it are waiting than its threshold.  Classes yield to
    /// backlogged competitors unless they are backlogged themselves.
    Thresholds(PerClass<u64>),
}

impl Policy {
    /// The threshold for `class`; [Policy::Unrestricted] behaves as an infinite threshold.
    pub fn threshold(&self, class: Class) -> u64 {
        match self {
            Policy::Unrestricted => u64::MAX,
            Policy::Thresholds(thresholds) => thresholds[class],
        }
    }

    /// True iff `class` has more waiters than its threshold tolerates.
    pub fn is_backlogged(&self, class: Class, waiting: &PerClass<u64>) -> bool {
        waiting[class] > self.threshold(class)
    }

    pub fn mirror(self) -> Self {
        match self {
            Policy::Unrestricted => Policy::Unrestricted,
            Policy::Thresholds(thresholds) => Policy::Thresholds(thresholds.mirror()),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Policy::Thresholds(PerClass::new(
            CAR_NORTH_THRESHOLD,
            CAR_SOUTH_THRESHOLD,
            PEDESTRIAN_THRESHOLD,
        ))
    }
}

impl From<&CrossingOptions> for Policy {
    fn from(options: &CrossingOptions) -> Self {
        if options.unrestricted {
            Policy::Unrestricted
        } else {
            Policy::Thresholds(PerClass::new(
                options.car_north_threshold,
                options.car_south_threshold,
                options.pedestrian_threshold,
            ))
        }
    }
}

////////////////////////////////////////// CrossingOptions /////////////////////////////////////////

/// Options that select the [Policy] of a [CrossingMonitor].
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "command_line", derive(arrrg_derive::CommandLine))]
pub struct CrossingOptions {
    /// Disable starvation avoidance and admit on occupancy alone.
    #[cfg_attr(
        feature = "command_line",
        arrrg(flag, "Disable starvation avoidance; admit on occupancy alone.")
    )]
    pub unrestricted: bool,
    /// Waiting north-bound cars tolerated before other classes yield.
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Waiting north-bound cars tolerated before others yield.", "N")
    )]
    pub car_north_threshold: u64,
    /// Waiting south-bound cars tolerated before other classes yield.
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Waiting south-bound cars tolerated before others yield.", "N")
    )]
    pub car_south_threshold: u64,
    /// Waiting pedestrians tolerated before cars yield.
    #[cfg_attr(
        feature = "command_line",
        arrrg(optional, "Waiting pedestrians tolerated before cars yield.", "N")
    )]
    pub pedestrian_threshold: u64,
}

impl Default for CrossingOptions {
    fn default() -> Self {
        Self {
            unrestricted: false,
            car_north_threshold: CAR_NORTH_THRESHOLD,
            car_south_threshold: CAR_SOUTH_THRESHOLD,
            pedestrian_threshold: PEDESTRIAN_THRESHOLD,
        }
    }
}

/////////////////////////////////////////// CrossingState //////////////////////////////////////////

/// The counters that describe the crossing.  The monitor owns the live copy; callers see copies
/// returned by [CrossingMonitor::snapshot].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CrossingState {
    /// Actors of each class on the crossing.
    pub occupancy: PerClass<u64>,
    /// Actors of each class blocked in `enter`, at either gate.
    pub waiting: PerClass<u64>,
    /// The subset of `waiting` held at the starvation-avoidance gate.
    pub yielding: PerClass<u64>,
    /// Completed calls to `enter`.
    pub admitted: PerClass<u64>,
    /// Completed calls to `leave`.
    pub departed: PerClass<u64>,
}

impl CrossingState {
    /// True iff at most one class occupies the crossing.
    pub fn is_safe(&self) -> bool {
        Class::ALL
            .iter()
            .filter(|class| self.occupancy[**class] > 0)
            .count()
            <= 1
    }

    /// The starvation-avoidance gate.  `class` yields while a competitor is backlogged.  The one
    /// exception is a backlogged `class` facing a backlogged competitor whose waiters are all held
    /// at this gate themselves; neither backlog could drain if both yielded.
    pub fn passes_starvation_gate(&self, policy: &Policy, class: Class) -> bool {
        let backlogged = policy.is_backlogged(class, &self.waiting);
        class.competitors().iter().all(|competitor| {
            !policy.is_backlogged(*competitor, &self.waiting)
                || (backlogged && self.waiting[*competitor] == self.yielding[*competitor])
        })
    }

    /// The occupancy-safety gate.  `class` may enter only when no competitor is on the crossing.
    pub fn passes_safety_gate(&self, class: Class) -> bool {
        class
            .competitors()
            .iter()
            .all(|competitor| self.occupancy[*competitor] == 0)
    }

    /// Swap north and south throughout.
    pub fn mirror(&self) -> Self {
        Self {
            occupancy: self.occupancy.mirror(),
            waiting: self.waiting.mirror(),
            yielding: self.yielding.mirror(),
            admitted: self.admitted.mirror(),
            departed: self.departed.mirror(),
        }
    }
}

////////////////////////////////////////// CrossingMonitor /////////////////////////////////////////

/// [CrossingMonitor] is a monitor in the classic sense:  one mutex protecting the
/// [CrossingState], with a condition variable per class for each of the two gates an actor
/// passes on its way onto the crossing.  Every wake-up is a broadcast and every waiter re-checks
/// its own predicate, so waiters of the same class are admitted in no particular order.
#[derive(Debug)]
pub struct CrossingMonitor {
    policy: Policy,
    state: Mutex<CrossingState>,
    starvation_gate: PerClass<Condvar>,
    safety_gate: PerClass<Condvar>,
}

impl CrossingMonitor {
    /// Create a new monitor for an empty crossing.
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            state: Mutex::new(CrossingState::default()),
            starvation_gate: PerClass::default(),
            safety_gate: PerClass::default(),
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Block until an actor of `class` may occupy the crossing, then occupy it.  There is no
    /// timeout; an actor that calls enter waits until it is admitted.
    pub fn enter(&self, class: Class) {
        ENTER.click();
        let start = Instant::now();
        let mut state = self.state.lock().unwrap();
        state.waiting[class] += 1;
        self.wake_starvation_gates(&state);
        while !state.passes_starvation_gate(&self.policy, class) {
            STARVATION_GATE_WAIT.click();
            state.yielding[class] += 1;
            // A class held entirely at the gate can unblock a backlogged competitor.
            self.wake_starvation_gates(&state);
            state = self.starvation_gate[class].wait(state).unwrap();
            state.yielding[class] -= 1;
        }
        while !state.passes_safety_gate(class) {
            SAFETY_GATE_WAIT.click();
            state = self.safety_gate[class].wait(state).unwrap();
        }
        state.waiting[class] -= 1;
        state.occupancy[class] += 1;
        state.admitted[class] += 1;
        let state = self.assert_invariants(state);
        ADMIT.click();
        self.wake_starvation_gates(&state);
        drop(state);
        ENTER_WAIT.add(start.elapsed().as_micros() as f64);
    }

    /// Record that an actor of `class` left the crossing.  Panics if no actor of `class` is on
    /// the crossing; the state is left as it was.
    pub fn leave(&self, class: Class) {
        if let Err(err) = self.try_leave(class) {
            panic!("occupancy invariant violated: {}", err);
        }
    }

    /// Record that an actor of `class` left the crossing, or return [Error::EmptyCrossing] if no
    /// actor of `class` is on it.
    pub fn try_leave(&self, class: Class) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.occupancy[class] == 0 {
            EMPTY_CROSSING.click();
            clue!(COLLECTOR, indicio::ALWAYS, {
                empty_crossing: class.as_str(),
            });
            return Err(Error::EmptyCrossing { class });
        }
        LEAVE.click();
        state.occupancy[class] -= 1;
        state.departed[class] += 1;
        let state = self.assert_invariants(state);
        if state.occupancy[class] == 0 {
            for competitor in class.competitors() {
                SAFETY_GATE_NOTIFY.click();
                self.safety_gate[competitor].notify_all();
            }
        }
        Ok(())
    }

    /// A copy of the counters, taken under the lock.
    pub fn snapshot(&self) -> CrossingState {
        self.state.lock().unwrap().clone()
    }

    // Call with the lock held after any change to `waiting` or `yielding`.  Only classes whose
    // yielding actors would pass the gate are woken.
    fn wake_starvation_gates(&self, state: &CrossingState) {
        for class in Class::ALL {
            if state.yielding[class] > 0 && state.passes_starvation_gate(&self.policy, class) {
                STARVATION_GATE_NOTIFY.click();
                self.starvation_gate[class].notify_all();
            }
        }
    }

    // Call with the lock held.
    fn assert_invariants<'a>(
        &self,
        state: MutexGuard<'a, CrossingState>,
    ) -> MutexGuard<'a, CrossingState> {
        if !state.is_safe() {
            clue!(COLLECTOR, indicio::ALWAYS, {
                unsafe_crossing: {
                    car_north: state.occupancy.car_north,
                    car_south: state.occupancy.car_south,
                    pedestrian: state.occupancy.pedestrian,
                },
            });
            panic!("occupancy invariant violated: {:?}", state.occupancy);
        }
        for class in Class::ALL {
            assert!(state.yielding[class] <= state.waiting[class]);
            assert!(state.departed[class] + state.occupancy[class] == state.admitted[class]);
        }
        state
    }
}

impl Default for CrossingMonitor {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn occupied_by(class: Class, count: u64) -> CrossingState {
        let mut state = CrossingState::default();
        state.occupancy[class] = count;
        state
    }

    #[test]
    fn competitors_exclude_self() {
        for class in Class::ALL {
            let competitors = class.competitors();
            assert!(!competitors.contains(&class));
            assert_ne!(competitors[0], competitors[1]);
        }
    }

    #[test]
    fn mirror_swaps_directions() {
        assert_eq!(Class::CarSouth, Class::CarNorth.mirror());
        assert_eq!(Class::CarNorth, Class::CarSouth.mirror());
        assert_eq!(Class::Pedestrian, Class::Pedestrian.mirror());
        assert_eq!(PerClass::new(2, 1, 3), PerClass::new(1, 2, 3).mirror());
    }

    #[test]
    fn per_class_index() {
        let mut counts = PerClass::from_fn(|class| class.as_str().len());
        assert_eq!(9, counts[Class::CarNorth]);
        assert_eq!(10, counts[Class::Pedestrian]);
        counts[Class::CarSouth] = 42;
        assert_eq!(42, counts.car_south);
    }

    #[test]
    fn safety_gate() {
        let empty = CrossingState::default();
        for class in Class::ALL {
            assert!(empty.passes_safety_gate(class));
        }
        let north = occupied_by(Class::CarNorth, 2);
        assert!(north.passes_safety_gate(Class::CarNorth));
        assert!(!north.passes_safety_gate(Class::CarSouth));
        assert!(!north.passes_safety_gate(Class::Pedestrian));
        let pedestrians = occupied_by(Class::Pedestrian, 1);
        assert!(!pedestrians.passes_safety_gate(Class::CarNorth));
        assert!(!pedestrians.passes_safety_gate(Class::CarSouth));
        assert!(pedestrians.passes_safety_gate(Class::Pedestrian));
    }

    #[test]
    fn starvation_gate_yields_to_backlog() {
        let policy = Policy::default();
        let mut state = CrossingState::default();
        state.waiting = PerClass::new(1, 4, 0);
        // South is over its threshold of three.
        assert!(!state.passes_starvation_gate(&policy, Class::CarNorth));
        assert!(!state.passes_starvation_gate(&policy, Class::Pedestrian));
        assert!(state.passes_starvation_gate(&policy, Class::CarSouth));
        state.waiting.car_south = 3;
        for class in Class::ALL {
            assert!(state.passes_starvation_gate(&policy, class));
        }
    }

    #[test]
    fn zero_threshold_yields_to_any_waiter() {
        let policy = Policy::Thresholds(PerClass::new(3, 3, 0));
        let mut state = CrossingState::default();
        state.waiting.pedestrian = 1;
        assert!(!state.passes_starvation_gate(&policy, Class::CarNorth));
        assert!(!state.passes_starvation_gate(&policy, Class::CarSouth));
    }

    #[test]
    fn backlogged_class_yields_to_a_draining_backlog() {
        let policy = Policy::default();
        let mut state = CrossingState::default();
        // South's four waiters are past the gate; north's backlog must not overtake them.
        state.waiting = PerClass::new(4, 4, 0);
        state.yielding = PerClass::new(4, 0, 0);
        assert!(!state.passes_starvation_gate(&policy, Class::CarNorth));
        assert!(state.passes_starvation_gate(&policy, Class::CarSouth));
        assert!(!state.passes_starvation_gate(&policy, Class::Pedestrian));
    }

    #[test]
    fn backlogs_held_at_the_gate_do_not_block_each_other() {
        let policy = Policy::default();
        let mut state = CrossingState::default();
        state.waiting = PerClass::new(4, 4, 0);
        state.yielding = PerClass::new(4, 4, 0);
        assert!(state.passes_starvation_gate(&policy, Class::CarNorth));
        assert!(state.passes_starvation_gate(&policy, Class::CarSouth));
        assert!(!state.passes_starvation_gate(&policy, Class::Pedestrian));
        // A backlog that is not itself backlogged still yields.
        state.waiting.car_south = 2;
        state.yielding.car_south = 2;
        assert!(!state.passes_starvation_gate(&policy, Class::CarSouth));
    }

    #[test]
    fn unrestricted_never_yields() {
        let policy = Policy::Unrestricted;
        let mut state = CrossingState::default();
        state.waiting = PerClass::new(u64::MAX - 1, 1000, 1000);
        for class in Class::ALL {
            assert!(!policy.is_backlogged(class, &state.waiting));
            assert!(state.passes_starvation_gate(&policy, class));
        }
    }

    #[test]
    fn options_select_policy() {
        let options = CrossingOptions::default();
        assert_eq!(Policy::default(), Policy::from(&options));
        let options = CrossingOptions {
            unrestricted: true,
            ..CrossingOptions::default()
        };
        assert_eq!(Policy::Unrestricted, Policy::from(&options));
        let options = CrossingOptions {
            car_north_threshold: 7,
            car_south_threshold: 5,
            pedestrian_threshold: 0,
            ..CrossingOptions::default()
        };
        assert_eq!(
            Policy::Thresholds(PerClass::new(7, 5, 0)),
            Policy::from(&options)
        );
    }

    #[test]
    fn lone_actor_is_admitted() {
        for class in Class::ALL {
            let monitor = CrossingMonitor::default();
            monitor.enter(class);
            let state = monitor.snapshot();
            assert_eq!(1, state.occupancy[class]);
            assert_eq!(PerClass::default(), state.waiting);
            monitor.leave(class);
            let state = monitor.snapshot();
            assert_eq!(0, state.occupancy[class]);
            assert_eq!(1, state.admitted[class]);
            assert_eq!(1, state.departed[class]);
        }
    }

    #[test]
    fn same_class_shares_the_crossing() {
        let monitor = CrossingMonitor::default();
        monitor.enter(Class::CarSouth);
        monitor.enter(Class::CarSouth);
        monitor.enter(Class::CarSouth);
        assert_eq!(3, monitor.snapshot().occupancy.car_south);
        monitor.leave(Class::CarSouth);
        monitor.leave(Class::CarSouth);
        monitor.leave(Class::CarSouth);
        assert_eq!(CrossingState::default().occupancy, monitor.snapshot().occupancy);
    }

    #[test]
    fn try_leave_empty_crossing() {
        let monitor = CrossingMonitor::default();
        monitor.enter(Class::CarNorth);
        let before = monitor.snapshot();
        match monitor.try_leave(Class::Pedestrian) {
            Err(Error::EmptyCrossing { class }) => assert_eq!(Class::Pedestrian, class),
            other => panic!("expected EmptyCrossing, got {:?}", other),
        }
        assert_eq!(before, monitor.snapshot());
        monitor.leave(Class::CarNorth);
    }

    #[test]
    #[should_panic(expected = "occupancy invariant violated")]
    fn leave_empty_crossing_panics() {
        let monitor = CrossingMonitor::default();
        monitor.leave(Class::CarSouth);
    }

    #[test]
    fn error_display() {
        let err = Error::EmptyCrossing {
            class: Class::CarNorth,
        };
        assert_eq!("car_north left a crossing with no car_north on it", err.to_string());
        let err = Error::invalid_option("--cars must be positive");
        assert_eq!("invalid option: --cars must be positive", err.to_string());
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(matches!(err, Error::Io(_)));
        assert_eq!("io error: disk full", err.to_string());
        let err = Error::ActorPanicked {
            class: Class::Pedestrian,
        };
        assert_eq!("pedestrian actor panicked", err.to_string());
    }

    proptest::prop_compose! {
        fn arb_state()(occupied in 0..4usize,
                       count in 1..5u64,
                       north in 0..6u64,
                       south in 0..6u64,
                       pedestrians in 0..6u64,
                       held in proptest::array::uniform3(0..6u64)) -> CrossingState {
            let mut state = CrossingState::default();
            if occupied < Class::ALL.len() {
                state.occupancy[Class::ALL[occupied]] = count;
            }
            state.waiting = PerClass::new(north, south, pedestrians);
            state.yielding = PerClass::new(
                held[0].min(north),
                held[1].min(south),
                held[2].min(pedestrians),
            );
            state
        }
    }

    proptest::prop_compose! {
        fn arb_policy()(unrestricted in proptest::bool::ANY,
                        north in 0..4u64,
                        south in 0..4u64,
                        pedestrians in 0..4u64) -> Policy {
            if unrestricted {
                Policy::Unrestricted
            } else {
                Policy::Thresholds(PerClass::new(north, south, pedestrians))
            }
        }
    }

    proptest::proptest! {
        #[test]
        fn gates_have_no_direction(state in arb_state(), policy in arb_policy()) {
            let mirrored = state.mirror();
            let mirrored_policy = policy.mirror();
            for class in Class::ALL {
                assert_eq!(
                    state.passes_starvation_gate(&policy, class),
                    mirrored.passes_starvation_gate(&mirrored_policy, class.mirror()),
                    "state={state:?} policy={policy:?} class={class}"
                );
                assert_eq!(
                    state.passes_safety_gate(class),
                    mirrored.passes_safety_gate(class.mirror()),
                    "state={state:?} class={class}"
                );
            }
        }

        #[test]
        fn admission_preserves_safety(state in arb_state()) {
            for class in Class::ALL {
                if state.passes_safety_gate(class) {
                    let mut next = state.clone();
                    next.occupancy[class] += 1;
                    assert!(next.is_safe(), "state={state:?} class={class}");
                }
            }
        }

        #[test]
        fn some_waiter_passes_the_starvation_gate(state in arb_state(), policy in arb_policy()) {
            // Every waiter is held at the gate, so nothing else can make progress.
            let mut state = state;
            state.yielding = state.waiting;
            let waiting = Class::ALL
                .into_iter()
                .filter(|class| state.waiting[*class] > 0)
                .collect::<Vec<_>>();
            if !waiting.is_empty() {
                assert!(
                    waiting.iter().any(|class| state.passes_starvation_gate(&policy, *class)),
                    "state={state:?} policy={policy:?}"
                );
            }
        }
    }
}
