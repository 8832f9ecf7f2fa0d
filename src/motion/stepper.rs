//! Tick-driven step pulse engine.
//!
//! The stepper is a poll-driven state machine: `update` must be called at
//! least as often as the shortest step interval, from a tight loop or a
//! timer ISR. Missed ticks are tolerated; the next tick catches up. All
//! pin access goes through the HAL handle the caller passes in, so the
//! engine itself owns no hardware.

use super::kinematics::{Axis, CartPos, JointSteps, Kinematics};
use super::planner::PlannerBlock;
use crate::config::StepperTimingConfig;
use crate::hal::Hal;

const DEFAULT_STEP_INTERVAL_US: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepperPhase {
    Idle,
    Running,
    Hold,
    Stopping,
}

#[derive(Debug, Clone)]
pub struct StepperConfig {
    pub step_pulse_us: u32,
    pub dir_setup_us: u32,
    pub idle_disable: bool,
    pub idle_timeout_ms: u32,
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            step_pulse_us: 10,
            dir_setup_us: 5,
            idle_disable: true,
            idle_timeout_ms: 30_000,
        }
    }
}

impl From<&StepperTimingConfig> for StepperConfig {
    fn from(cfg: &StepperTimingConfig) -> Self {
        Self {
            step_pulse_us: cfg.step_pulse_us,
            dir_setup_us: cfg.dir_setup_us,
            idle_disable: cfg.idle_disable,
            idle_timeout_ms: cfg.idle_timeout_ms,
        }
    }
}

#[derive(Debug)]
pub struct Stepper {
    phase: StepperPhase,
    config: StepperConfig,

    current_block: Option<PlannerBlock>,
    step_taken: [u32; 3],
    step_target: [u32; 3],

    /// Joint-space position accumulated from emitted pulses.
    position: JointSteps,

    last_step_us: u32,
    step_interval_us: u32,
    current_speed: f64,

    idle_start_ms: u32,
    motors_enabled: bool,
}

impl Stepper {
    pub fn new(config: StepperConfig) -> Self {
        Self {
            phase: StepperPhase::Idle,
            config,
            current_block: None,
            step_taken: [0; 3],
            step_target: [0; 3],
            position: JointSteps::default(),
            last_step_us: 0,
            step_interval_us: DEFAULT_STEP_INTERVAL_US,
            current_speed: 0.0,
            idle_start_ms: 0,
            motors_enabled: false,
        }
    }

    /// Return to a safe idle state, clearing counters and pulse lines.
    pub fn reset(&mut self, hal: &mut dyn Hal) {
        self.phase = StepperPhase::Idle;
        self.current_block = None;
        self.step_taken = [0; 3];
        self.step_target = [0; 3];
        self.current_speed = 0.0;
        clear_pulses(hal);
        if self.config.idle_disable {
            hal.stepper_enable(false);
            self.motors_enabled = false;
        }
    }

    /// Begin executing a block. Only valid when idle; invalid blocks are
    /// rejected. Returns whether the block was accepted.
    pub fn load(&mut self, block: PlannerBlock, hal: &mut dyn Hal) -> bool {
        if self.phase != StepperPhase::Idle {
            return false;
        }
        if !block.validate() {
            tracing::warn!("rejecting planner block that failed validation");
            return false;
        }

        self.step_target = block.axis_steps;
        self.step_taken = [0; 3];

        for axis in Axis::ALL {
            hal.stepper_set_dir(axis, block.direction_bits & axis.bit() != 0);
        }
        hal.delay_us(self.config.dir_setup_us);

        self.step_interval_us = interval_from_speed(block.entry_speed);
        self.current_speed = block.entry_speed;

        if !self.motors_enabled {
            hal.stepper_enable(true);
            self.motors_enabled = true;
        }

        self.current_block = Some(block);
        self.phase = StepperPhase::Running;
        self.last_step_us = hal.micros();
        true
    }

    /// Advance the engine. Call from the tick loop or a timer ISR.
    pub fn update(&mut self, hal: &mut dyn Hal) {
        match self.phase {
            StepperPhase::Idle => {
                if self.config.idle_disable && self.motors_enabled {
                    let idle_ms = hal.millis().wrapping_sub(self.idle_start_ms);
                    if idle_ms >= self.config.idle_timeout_ms {
                        hal.stepper_enable(false);
                        self.motors_enabled = false;
                    }
                }
            }
            StepperPhase::Running => {
                let now_us = hal.micros();
                if now_us.wrapping_sub(self.last_step_us) < self.step_interval_us {
                    return;
                }

                let mut stepped = false;
                for axis in Axis::ALL {
                    let i = axis.index();
                    if self.step_taken[i] < self.step_target[i] {
                        hal.stepper_step_pulse(axis);
                        self.step_taken[i] += 1;
                        stepped = true;

                        let positive = self
                            .current_block
                            .as_ref()
                            .map(|b| b.direction_bits & axis.bit() != 0)
                            .unwrap_or(true);
                        if positive {
                            self.position.v[i] += 1;
                        } else {
                            self.position.v[i] -= 1;
                        }
                    }
                }

                if stepped {
                    hal.delay_us(self.config.step_pulse_us);
                    clear_pulses(hal);
                    self.last_step_us = now_us;
                } else {
                    // Block complete.
                    self.current_block = None;
                    self.phase = StepperPhase::Idle;
                    self.current_speed = 0.0;
                    self.idle_start_ms = hal.millis();
                }
            }
            StepperPhase::Hold => {}
            StepperPhase::Stopping => {
                self.current_block = None;
                self.phase = StepperPhase::Idle;
                self.current_speed = 0.0;
                clear_pulses(hal);
                self.idle_start_ms = hal.millis();
            }
        }
    }

    /// Freeze pulse emission, preserving all counters.
    pub fn hold(&mut self) {
        if self.phase == StepperPhase::Running {
            self.phase = StepperPhase::Hold;
        }
    }

    /// Resume from hold. The step clock restarts at now, so no pulse burst
    /// tries to make up the paused interval.
    pub fn resume(&mut self, hal: &mut dyn Hal) {
        if self.phase == StepperPhase::Hold {
            self.phase = StepperPhase::Running;
            self.last_step_us = hal.micros();
        }
    }

    /// Abandon the current block; the next tick lands in idle.
    pub fn stop(&mut self) {
        self.phase = StepperPhase::Stopping;
    }

    pub fn enable_motors(&mut self, hal: &mut dyn Hal, on: bool) {
        hal.stepper_enable(on);
        self.motors_enabled = on;
        if !on && self.phase != StepperPhase::Idle {
            self.stop();
        }
    }

    pub fn motors_enabled(&self) -> bool {
        self.motors_enabled
    }

    pub fn phase(&self) -> StepperPhase {
        self.phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase == StepperPhase::Idle
    }

    pub fn is_executing(&self) -> bool {
        self.current_block.is_some()
    }

    pub fn position(&self) -> JointSteps {
        self.position
    }

    /// Re-zero the joint datum, e.g. after a homing cycle.
    pub fn zero_position(&mut self) {
        self.position = JointSteps::default();
    }

    pub fn cart_position(&self, kin: &dyn Kinematics) -> CartPos {
        kin.steps_to_cart(self.position)
    }

    pub fn current_speed(&self) -> f64 {
        self.current_speed
    }

    pub fn config(&self) -> &StepperConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: StepperConfig) {
        self.config = config;
    }
}

fn interval_from_speed(speed_mm_min: f64) -> u32 {
    if speed_mm_min <= 0.0 {
        return DEFAULT_STEP_INTERVAL_US;
    }
    // 1:1 mm-to-step calibration unless the adapter says otherwise.
    let steps_per_sec = speed_mm_min / 60.0;
    (1_000_000.0 / steps_per_sec) as u32
}

fn clear_pulses(hal: &mut dyn Hal) {
    for axis in Axis::ALL {
        hal.stepper_step_clear(axis);
    }
}
