//! Hardware abstraction boundary.
//!
//! Everything below this trait is board-specific: timers, GPIO, the spindle
//! PWM and the input pins. The core only ever holds a `&mut dyn Hal` or a
//! `Box<dyn Hal>`, so the same pipeline drives real pins on a target board
//! and the simulated implementation in tests.
//!
//! Timestamps are `u32` and wrap, as they do on 32-bit tick counters;
//! callers compare with wrapping subtraction.

use crate::motion::kinematics::Axis;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpindleDir {
    #[default]
    Off,
    Cw,
    Ccw,
}

/// Snapshot of the safety-relevant input pins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HalInputs {
    pub limit_x: bool,
    pub limit_y: bool,
    pub limit_z: bool,
    pub estop: bool,
}

impl HalInputs {
    pub fn any_limit(&self) -> bool {
        self.limit_x || self.limit_y || self.limit_z
    }
}

pub trait Hal: Send {
    fn millis(&self) -> u32;
    fn micros(&self) -> u32;

    /// Busy-wait; used for step pulse width and direction setup only.
    fn delay_us(&mut self, us: u32);

    fn stepper_enable(&mut self, on: bool);
    fn stepper_set_dir(&mut self, axis: Axis, positive: bool);
    fn stepper_step_pulse(&mut self, axis: Axis);
    fn stepper_step_clear(&mut self, axis: Axis);

    fn spindle_set(&mut self, dir: SpindleDir, pwm: f64);

    fn coolant_mist(&mut self, on: bool);
    fn coolant_flood(&mut self, on: bool);

    fn read_inputs(&self) -> HalInputs;
}

#[derive(Debug)]
enum Clock {
    /// Virtual clock advanced explicitly; used by tests.
    Virtual(u64),
    /// Wall clock anchored at construction; used by the host binary.
    Wall(std::time::Instant),
}

#[derive(Debug)]
struct SimState {
    clock: Clock,
    pulses: [u64; 3],
    dir_positive: [bool; 3],
    steppers_enabled: bool,
    spindle: (SpindleDir, f64),
    mist: bool,
    flood: bool,
    inputs: HalInputs,
    pulse_lines_high: [bool; 3],
}

impl SimState {
    fn now_us(&self) -> u64 {
        match &self.clock {
            Clock::Virtual(now) => *now,
            Clock::Wall(start) => start.elapsed().as_micros() as u64,
        }
    }
}

/// Simulated HAL: counts pulses, records pin state, and lets the owner of
/// a [`SimHandle`] script the input pins and the clock from outside.
pub struct SimHal {
    shared: Arc<Mutex<SimState>>,
}

/// Cloneable window into a [`SimHal`], for tests and the host simulator.
#[derive(Clone)]
pub struct SimHandle {
    shared: Arc<Mutex<SimState>>,
}

impl SimHal {
    /// Virtual-time simulator; time only moves via [`SimHandle::advance_us`]
    /// and `delay_us`.
    pub fn new() -> Self {
        Self::with_clock(Clock::Virtual(0))
    }

    /// Wall-clock simulator for the host binary.
    pub fn wall_clock() -> Self {
        Self::with_clock(Clock::Wall(std::time::Instant::now()))
    }

    fn with_clock(clock: Clock) -> Self {
        Self {
            shared: Arc::new(Mutex::new(SimState {
                clock,
                pulses: [0; 3],
                dir_positive: [true; 3],
                steppers_enabled: false,
                spindle: (SpindleDir::Off, 0.0),
                mist: false,
                flood: false,
                inputs: HalInputs::default(),
                pulse_lines_high: [false; 3],
            })),
        }
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Default for SimHal {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHandle {
    pub fn advance_us(&self, us: u64) {
        let mut state = self.shared.lock().unwrap();
        if let Clock::Virtual(now) = &mut state.clock {
            *now += us;
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance_us(ms * 1000);
    }

    pub fn set_inputs(&self, f: impl FnOnce(&mut HalInputs)) {
        f(&mut self.shared.lock().unwrap().inputs)
    }

    pub fn pulses(&self) -> [u64; 3] {
        self.shared.lock().unwrap().pulses
    }

    pub fn dir_positive(&self) -> [bool; 3] {
        self.shared.lock().unwrap().dir_positive
    }

    pub fn steppers_enabled(&self) -> bool {
        self.shared.lock().unwrap().steppers_enabled
    }

    pub fn spindle(&self) -> (SpindleDir, f64) {
        self.shared.lock().unwrap().spindle
    }

    pub fn pulse_lines_high(&self) -> [bool; 3] {
        self.shared.lock().unwrap().pulse_lines_high
    }

    /// (mist, flood)
    pub fn coolant(&self) -> (bool, bool) {
        let state = self.shared.lock().unwrap();
        (state.mist, state.flood)
    }
}

impl Hal for SimHal {
    fn millis(&self) -> u32 {
        (self.shared.lock().unwrap().now_us() / 1000) as u32
    }

    fn micros(&self) -> u32 {
        self.shared.lock().unwrap().now_us() as u32
    }

    fn delay_us(&mut self, us: u32) {
        let mut state = self.shared.lock().unwrap();
        if let Clock::Virtual(now) = &mut state.clock {
            *now += u64::from(us);
        }
        // The wall-clock variant skips the busy-wait; pulse widths are not
        // meaningful off-target.
    }

    fn stepper_enable(&mut self, on: bool) {
        self.shared.lock().unwrap().steppers_enabled = on;
    }

    fn stepper_set_dir(&mut self, axis: Axis, positive: bool) {
        self.shared.lock().unwrap().dir_positive[axis.index()] = positive;
    }

    fn stepper_step_pulse(&mut self, axis: Axis) {
        let mut state = self.shared.lock().unwrap();
        state.pulses[axis.index()] += 1;
        state.pulse_lines_high[axis.index()] = true;
    }

    fn stepper_step_clear(&mut self, axis: Axis) {
        self.shared.lock().unwrap().pulse_lines_high[axis.index()] = false;
    }

    fn spindle_set(&mut self, dir: SpindleDir, pwm: f64) {
        self.shared.lock().unwrap().spindle = (dir, pwm);
    }

    fn coolant_mist(&mut self, on: bool) {
        self.shared.lock().unwrap().mist = on;
    }

    fn coolant_flood(&mut self, on: bool) {
        self.shared.lock().unwrap().flood = on;
    }

    fn read_inputs(&self) -> HalInputs {
        self.shared.lock().unwrap().inputs
    }
}
