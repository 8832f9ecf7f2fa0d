//! Top-level state machine and safety interlocks.
//!
//! The supervisor owns every other piece of the pipeline: the modal G-code
//! state, the planner queue, the stepper engine, the kinematics adapter and
//! the HAL handle. Lines come in through [`Supervisor::process_line`],
//! real-time commands through [`Supervisor::handle_realtime`], and
//! [`Supervisor::poll`] runs the periodic work: safety inputs, dwell
//! expiry, feeding the stepper and ticking it.
//!
//! Alarm is latching: once entered, the only way out is an explicit
//! [`Supervisor::clear_alarm`], and entry immediately kills motion and the
//! spindle.

use crate::config::Config;
use crate::gcode::executor::{ExecContext, ExecEffects, GcodeState, SpindleState};
use crate::gcode::{parser, GcodeError};
use crate::hal::{Hal, SpindleDir};
use crate::motion::kinematics::{AxisMask, CartPos, Kinematics};
use crate::motion::planner::PlannerQueue;
use crate::motion::stepper::{Stepper, StepperConfig};
use crate::protocol::{CompletedLine, LineStatus, RealtimeCommand};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Idle,
    Running,
    Hold,
    Jog,
    Alarm,
    Homing,
    Check,
    Sleep,
    Door,
}

impl SystemState {
    /// Human-readable name as used in status reports.
    pub fn name(self) -> &'static str {
        match self {
            SystemState::Idle => "Idle",
            SystemState::Running => "Run",
            SystemState::Hold => "Hold",
            SystemState::Jog => "Jog",
            SystemState::Alarm => "Alarm",
            SystemState::Homing => "Home",
            SystemState::Check => "Check",
            SystemState::Sleep => "Sleep",
            SystemState::Door => "Door",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlarmCode {
    #[default]
    None = 0,
    HardLimit = 1,
    SoftLimit = 2,
    EStop = 3,
    ProbeFail = 4,
    HomingFail = 5,
    Overflow = 6,
    SpindleStall = 7,
}

impl AlarmCode {
    pub fn describe(self) -> &'static str {
        match self {
            AlarmCode::None => "None",
            AlarmCode::HardLimit => "Hard limit triggered",
            AlarmCode::SoftLimit => "Soft limit exceeded",
            AlarmCode::EStop => "Emergency stop",
            AlarmCode::ProbeFail => "Probe cycle failed",
            AlarmCode::HomingFail => "Homing cycle failed",
            AlarmCode::Overflow => "Buffer overflow",
            AlarmCode::SpindleStall => "Spindle stall detected",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SupervisorError {
    #[error(transparent)]
    Gcode(#[from] GcodeError),
    #[error("line rejected in {} state", .0.name())]
    WrongState(SystemState),
    #[error("line overflowed the receive buffer")]
    LineOverflow,
}

pub struct Supervisor {
    state: SystemState,
    alarm: AlarmCode,

    gcode: GcodeState,
    queue: PlannerQueue,
    stepper: Stepper,
    kin: Box<dyn Kinematics>,
    hal: Box<dyn Hal>,

    config: Config,

    homed: bool,
    limits_enabled: bool,
    soft_limits_enabled: bool,
    spindle_enabled: bool,

    machine_pos: CartPos,
    work_offset: CartPos,

    lines_processed: u32,
    errors: u32,
    uptime_ms: u32,

    /// Deadline (HAL millis) of an active G04 dwell.
    dwell_until_ms: Option<u32>,
}

impl Supervisor {
    pub fn new(config: Config, kin: Box<dyn Kinematics>, hal: Box<dyn Hal>) -> Self {
        let queue = PlannerQueue::new(config.machine.planner_queue_depth);
        let stepper = Stepper::new(StepperConfig::from(&config.stepper));
        let mut sup = Self {
            state: SystemState::Idle,
            alarm: AlarmCode::None,
            gcode: GcodeState::new(),
            queue,
            stepper,
            kin,
            hal,
            config,
            homed: false,
            limits_enabled: true,
            soft_limits_enabled: false,
            spindle_enabled: true,
            machine_pos: CartPos::default(),
            work_offset: CartPos::default(),
            lines_processed: 0,
            errors: 0,
            uptime_ms: 0,
            dwell_until_ms: None,
        };
        sup.hal.stepper_enable(false);
        tracing::info!(kinematics = sup.kin.name(), "supervisor initialized");
        sup
    }

    /// Soft reset: clear modal state, pending motion and any alarm. The
    /// homed flag survives; position re-syncs from the modal state.
    pub fn soft_reset(&mut self) {
        self.gcode.reset();
        self.queue.clear();
        self.stepper.reset(self.hal.as_mut());
        self.state = SystemState::Idle;
        self.alarm = AlarmCode::None;
        self.dwell_until_ms = None;
        tracing::info!("soft reset");
    }

    /// Process one G-code line according to the current state.
    pub fn process_line(&mut self, line: &str) -> Result<(), SupervisorError> {
        match self.state {
            SystemState::Idle | SystemState::Running => {
                let mut cx = ExecContext {
                    kin: self.kin.as_ref(),
                    queue: &mut self.queue,
                    arc: &self.config.arc,
                    rapid_rate: self.config.machine.rapid_rate_mm_min,
                    accel: self.config.machine.accel_mm_s2,
                };
                match self.gcode.process_line(line, &mut cx) {
                    Ok(effects) => {
                        self.lines_processed += 1;
                        if self.state == SystemState::Idle {
                            self.state = SystemState::Running;
                            tracing::debug!("Idle -> Run");
                        }
                        self.apply_effects(effects);
                        Ok(())
                    }
                    Err(err) => {
                        self.errors += 1;
                        tracing::warn!(%err, line, "line failed");
                        Err(err.into())
                    }
                }
            }
            SystemState::Check => match parser::parse_line(line) {
                Ok(_) => {
                    self.lines_processed += 1;
                    Ok(())
                }
                Err(err) => {
                    self.errors += 1;
                    Err(err.into())
                }
            },
            other => {
                self.errors += 1;
                Err(SupervisorError::WrongState(other))
            }
        }
    }

    /// Entry point for lines delivered by the protocol layer; counts
    /// overflowed lines as errors without executing them.
    pub fn process_completed(&mut self, line: &CompletedLine) -> Result<(), SupervisorError> {
        if line.status == LineStatus::Overflow {
            self.errors += 1;
            tracing::warn!("dropping overflowed line");
            return Err(SupervisorError::LineOverflow);
        }
        self.process_line(&line.text)
    }

    fn apply_effects(&mut self, effects: ExecEffects) {
        if let Some(ms) = effects.dwell_ms {
            self.dwell_until_ms = Some(self.hal.millis().wrapping_add(ms));
        }
        if effects.spindle_changed && self.spindle_enabled {
            let dir = SpindleDir::from(self.gcode.spindle_state);
            let pwm = if self.gcode.spindle_state == SpindleState::Off {
                0.0
            } else {
                self.gcode.spindle_speed
            };
            self.hal.spindle_set(dir, pwm);
        }
    }

    /// Periodic work: safety inputs, dwell expiry, stepper feed and tick.
    pub fn poll(&mut self) {
        self.uptime_ms = self.hal.millis();

        let inputs = self.hal.read_inputs();
        if self.limits_enabled && self.state == SystemState::Running && inputs.any_limit() {
            self.trigger_alarm(AlarmCode::HardLimit);
        }
        if inputs.estop {
            self.trigger_alarm(AlarmCode::EStop);
        }

        if let Some(deadline) = self.dwell_until_ms {
            // Wrapping compare: the dwell is over once now passes deadline.
            let remaining = deadline.wrapping_sub(self.hal.millis());
            if remaining == 0 || remaining > i32::MAX as u32 {
                self.dwell_until_ms = None;
            }
        }

        // Feed the stepper while motion is allowed to proceed.
        if self.state == SystemState::Running && self.dwell_until_ms.is_none() && self.stepper.is_idle()
        {
            self.queue.couple_speeds();
            if let Some(block) = self.queue.pop() {
                if !self.stepper.load(block, self.hal.as_mut()) {
                    self.errors += 1;
                    tracing::warn!("stepper rejected block");
                }
            }
        }

        self.stepper.update(self.hal.as_mut());

        // Machine position mirrors the modal state; Z is carried along.
        self.machine_pos.x = self.gcode.position.x;
        self.machine_pos.y = self.gcode.position.y;
        self.machine_pos.z = self.gcode.position.z;

        if self.state == SystemState::Running
            && self.queue.is_empty()
            && self.stepper.is_idle()
            && self.dwell_until_ms.is_none()
        {
            self.state = SystemState::Idle;
            tracing::debug!("Run -> Idle (motion drained)");
        }
    }

    /// Request a state transition. Anything not allowed by the transition
    /// table is rejected and leaves the state unchanged.
    pub fn set_state(&mut self, new_state: SystemState) -> bool {
        let old_state = self.state;

        // Alarm is latching; only clear_alarm leaves it.
        if old_state == SystemState::Alarm {
            return false;
        }

        let allowed = match new_state {
            SystemState::Homing => old_state == SystemState::Idle,
            SystemState::Running => {
                old_state == SystemState::Idle || old_state == SystemState::Hold
            }
            SystemState::Hold => old_state == SystemState::Running || old_state == SystemState::Jog,
            SystemState::Alarm => true,
            _ => true,
        };
        if !allowed {
            return false;
        }

        self.state = new_state;
        tracing::debug!("{} -> {}", old_state.name(), new_state.name());
        true
    }

    /// Latch an alarm: motion dies, the spindle stops, queued blocks drop.
    pub fn trigger_alarm(&mut self, alarm: AlarmCode) {
        self.state = SystemState::Alarm;
        self.alarm = alarm;

        self.stepper.enable_motors(self.hal.as_mut(), false);
        self.gcode.spindle_state = SpindleState::Off;
        self.hal.spindle_set(SpindleDir::Off, 0.0);
        self.queue.clear();
        self.dwell_until_ms = None;

        tracing::warn!(alarm = alarm.describe(), "alarm triggered");
    }

    /// Leave the alarm state; the only exit, and it lands in Idle.
    pub fn clear_alarm(&mut self) -> bool {
        if self.state != SystemState::Alarm {
            return false;
        }
        self.alarm = AlarmCode::None;
        self.state = SystemState::Idle;
        tracing::info!("alarm cleared");
        true
    }

    pub fn handle_realtime(&mut self, cmd: RealtimeCommand) -> Option<String> {
        match cmd {
            RealtimeCommand::Reset => {
                self.soft_reset();
                None
            }
            RealtimeCommand::StatusQuery => Some(self.status_report()),
            RealtimeCommand::FeedHold => {
                self.feed_hold();
                None
            }
            RealtimeCommand::CycleStart => {
                self.cycle_start();
                None
            }
        }
    }

    pub fn feed_hold(&mut self) {
        if self.state == SystemState::Running || self.state == SystemState::Jog {
            self.state = SystemState::Hold;
            self.stepper.hold();
            tracing::debug!("feed hold");
        }
    }

    pub fn cycle_start(&mut self) {
        if self.state == SystemState::Hold {
            self.state = SystemState::Running;
            self.stepper.resume(self.hal.as_mut());
            tracing::debug!("cycle start");
        }
    }

    /// Run a homing cycle over the masked axes. Only valid from Idle; a
    /// mask the kinematics rejects latches a HomingFail alarm.
    pub fn start_homing(&mut self, axes: AxisMask) -> bool {
        if self.state != SystemState::Idle {
            return false;
        }
        if !self.kin.validate_homing_axes(axes) {
            self.trigger_alarm(AlarmCode::HomingFail);
            return false;
        }

        self.state = SystemState::Homing;
        // The cycle itself is the adapter's business; the core records the
        // datum it establishes.
        self.machine_pos = CartPos::default();
        self.gcode.position = CartPos::default();
        self.stepper.zero_position();
        self.homed = true;
        self.state = SystemState::Idle;
        tracing::info!("homing complete");
        true
    }

    pub fn check_soft_limits(&self, x: f64, y: f64, z: f64) -> bool {
        if !self.soft_limits_enabled {
            return true;
        }
        let m = &self.config.machine;
        x >= m.soft_limit_x_min
            && x <= m.soft_limit_x_max
            && y >= m.soft_limit_y_min
            && y <= m.soft_limit_y_max
            && z >= m.soft_limit_z_min
            && z <= m.soft_limit_z_max
    }

    /// Grbl-style report: `<STATE|MPos:..|WPos:..|F:..|S:..[|A:..]>`.
    pub fn status_report(&self) -> String {
        let work = self.work_position();
        let mut report = format!(
            "<{}|MPos:{:.3},{:.3},{:.3}|WPos:{:.3},{:.3},{:.3}|F:{:.1}|S:{:.0}",
            self.state.name(),
            self.machine_pos.x,
            self.machine_pos.y,
            self.machine_pos.z,
            work.x,
            work.y,
            work.z,
            self.gcode.feedrate,
            self.gcode.spindle_speed,
        );
        if self.state == SystemState::Alarm {
            report.push_str(&format!("|A:{}", self.alarm as u8));
        }
        report.push('>');
        report
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn alarm(&self) -> AlarmCode {
        self.alarm
    }

    pub fn is_idle(&self) -> bool {
        self.state == SystemState::Idle
    }

    pub fn is_alarmed(&self) -> bool {
        self.state == SystemState::Alarm
    }

    pub fn is_homed(&self) -> bool {
        self.homed
    }

    pub fn machine_position(&self) -> CartPos {
        self.machine_pos
    }

    pub fn work_position(&self) -> CartPos {
        CartPos::new(
            self.machine_pos.x - self.work_offset.x,
            self.machine_pos.y - self.work_offset.y,
            self.machine_pos.z - self.work_offset.z,
        )
    }

    pub fn set_work_offset(&mut self, offset: CartPos) {
        self.work_offset = offset;
    }

    pub fn set_limits_enabled(&mut self, enabled: bool) {
        self.limits_enabled = enabled;
    }

    pub fn set_soft_limits_enabled(&mut self, enabled: bool) {
        self.soft_limits_enabled = enabled;
    }

    pub fn lines_processed(&self) -> u32 {
        self.lines_processed
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }

    pub fn uptime_ms(&self) -> u32 {
        self.uptime_ms
    }

    pub fn gcode(&self) -> &GcodeState {
        &self.gcode
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn stepper(&self) -> &Stepper {
        &self.stepper
    }

    /// Test and simulation access to the HAL.
    pub fn hal_mut(&mut self) -> &mut dyn Hal {
        self.hal.as_mut()
    }
}
