//! Modal G-code execution.
//!
//! The executor owns the state that persists across lines: position, the
//! sticky motion/coordinate/feed modes, the spindle, and the feedrate. One
//! call to [`GcodeState::execute_block`] applies a parsed block in the
//! fixed order G-word, M-word, standalone S-word. Motion commands are
//! segmented through the kinematics adapter and land in the planner queue
//! as validated blocks; nothing here touches hardware directly.

use super::{GcodeBlock, GcodeError};
use crate::arc::{self, ArcError};
use crate::config::ArcConfig;
use crate::hal::SpindleDir;
use crate::motion::kinematics::{CartPos, Kinematics, MotionHint};
use crate::motion::planner::{PlannerBlock, PlannerQueue};
use crate::motion::MotionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionMode {
    Rapid,
    #[default]
    Linear,
    ArcCw,
    ArcCcw,
    Dwell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordMode {
    #[default]
    Absolute,
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedMode {
    #[default]
    UnitsPerMinute,
    InverseTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpindleState {
    #[default]
    Off,
    Cw,
    Ccw,
}

impl From<SpindleState> for SpindleDir {
    fn from(state: SpindleState) -> Self {
        match state {
            SpindleState::Off => SpindleDir::Off,
            SpindleState::Cw => SpindleDir::Cw,
            SpindleState::Ccw => SpindleDir::Ccw,
        }
    }
}

/// Capabilities a block execution may use, lent by the supervisor.
pub struct ExecContext<'a> {
    pub kin: &'a dyn Kinematics,
    pub queue: &'a mut PlannerQueue,
    pub arc: &'a ArcConfig,
    /// Feed used for G00 rapids (mm/min).
    pub rapid_rate: f64,
    /// Acceleration stamped on emitted blocks (mm/s^2).
    pub accel: f64,
}

/// Side effects the supervisor must apply after a successful block.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExecEffects {
    /// G04: pause motion for this many milliseconds.
    pub dwell_ms: Option<u32>,
    /// Spindle state or speed changed; push to the HAL.
    pub spindle_changed: bool,
}

/// Persistent modal state of the G-code executor.
#[derive(Debug, Clone, PartialEq)]
pub struct GcodeState {
    pub position: CartPos,
    pub motion_mode: MotionMode,
    pub coord_mode: CoordMode,
    pub feed_mode: FeedMode,
    pub spindle_state: SpindleState,
    pub spindle_speed: f64,
    pub feedrate: f64,
    pub feedrate_set: bool,
    pub program_complete: bool,
}

impl Default for GcodeState {
    fn default() -> Self {
        Self::new()
    }
}

impl GcodeState {
    pub fn new() -> Self {
        Self {
            position: CartPos::default(),
            motion_mode: MotionMode::Linear,
            coord_mode: CoordMode::Absolute,
            feed_mode: FeedMode::UnitsPerMinute,
            spindle_state: SpindleState::Off,
            spindle_speed: 0.0,
            feedrate: 100.0,
            feedrate_set: false,
            program_complete: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Parse and execute one normalized line.
    pub fn process_line(
        &mut self,
        line: &str,
        cx: &mut ExecContext<'_>,
    ) -> Result<ExecEffects, GcodeError> {
        let block = super::parser::parse_line(line)?;
        self.execute_block(&block, cx)
    }

    /// Apply one parsed block: G-word first, then M-word, then standalone S.
    pub fn execute_block(
        &mut self,
        block: &GcodeBlock,
        cx: &mut ExecContext<'_>,
    ) -> Result<ExecEffects, GcodeError> {
        let mut effects = ExecEffects::default();

        if let Some(g) = block.g {
            match g {
                0 => {
                    self.motion_mode = MotionMode::Rapid;
                    self.linear_move(block, cx)?;
                }
                1 => {
                    self.motion_mode = MotionMode::Linear;
                    self.linear_move(block, cx)?;
                }
                2 => {
                    self.motion_mode = MotionMode::ArcCw;
                    self.arc_move(block, cx, true)?;
                }
                3 => {
                    self.motion_mode = MotionMode::ArcCcw;
                    self.arc_move(block, cx, false)?;
                }
                4 => effects.dwell_ms = Some(self.dwell(block)?),
                90 => self.coord_mode = CoordMode::Absolute,
                91 => self.coord_mode = CoordMode::Relative,
                93 => self.feed_mode = FeedMode::InverseTime,
                94 => self.feed_mode = FeedMode::UnitsPerMinute,
                other => return Err(GcodeError::UnsupportedCmd(other)),
            }
        }

        if let Some(m) = block.m {
            match m {
                2 | 30 => {
                    self.program_end(m);
                    effects.spindle_changed = true;
                }
                3 | 4 | 5 => {
                    self.spindle(m, block);
                    effects.spindle_changed = true;
                }
                other => return Err(GcodeError::UnknownCmd(other)),
            }
        } else if let Some(s) = block.s {
            // Standalone S: new speed takes effect if the spindle is on.
            self.spindle_speed = s;
            if self.spindle_state != SpindleState::Off {
                effects.spindle_changed = true;
            }
        }

        Ok(effects)
    }

    fn target_for(&self, block: &GcodeBlock) -> CartPos {
        let mut target = self.position;
        match self.coord_mode {
            CoordMode::Absolute => {
                if let Some(x) = block.x {
                    target.x = x;
                }
                if let Some(y) = block.y {
                    target.y = y;
                }
            }
            CoordMode::Relative => {
                if let Some(x) = block.x {
                    target.x += x;
                }
                if let Some(y) = block.y {
                    target.y += y;
                }
            }
        }
        target
    }

    fn update_feedrate(&mut self, block: &GcodeBlock) -> Result<(), GcodeError> {
        if let Some(f) = block.f {
            if f <= 0.0 {
                return Err(GcodeError::InvalidParam("F must be positive"));
            }
            self.feedrate = f;
            self.feedrate_set = true;
        }
        Ok(())
    }

    fn linear_move(
        &mut self,
        block: &GcodeBlock,
        cx: &mut ExecContext<'_>,
    ) -> Result<(), GcodeError> {
        self.update_feedrate(block)?;
        let target = self.target_for(block);

        if self.motion_mode == MotionMode::Linear && !self.feedrate_set {
            return Err(GcodeError::MissingParam("F (no feedrate set)"));
        }

        let feed = if self.motion_mode == MotionMode::Rapid {
            cx.rapid_rate
        } else {
            self.feedrate
        };
        let hint = MotionHint {
            feed_mm_min: feed,
            accel_mm_s2: cx.accel,
            junction_dev_mm: 0.0,
        };

        let mut current = self.position;
        for waypoint in cx.kin.segment_move(current, target, &hint) {
            let pb = PlannerBlock::between(cx.kin, current, waypoint, feed, cx.accel);
            if !pb.is_empty_move() {
                push_block(cx.queue, pb)?;
            }
            current = waypoint;
        }

        self.position = target;
        Ok(())
    }

    fn arc_move(
        &mut self,
        block: &GcodeBlock,
        cx: &mut ExecContext<'_>,
        clockwise: bool,
    ) -> Result<(), GcodeError> {
        self.update_feedrate(block)?;
        if !self.feedrate_set {
            return Err(GcodeError::MissingParam("F (no feedrate set)"));
        }

        let target = self.target_for(block);
        let start = (self.position.x, self.position.y);
        let end = (target.x, target.y);
        let feed = self.feedrate;
        let accel = cx.accel;
        let kin = cx.kin;

        // Each chord endpoint becomes a planner block; position advances
        // chord by chord so an aborted arc leaves a consistent state.
        let mut pos = self.position;
        let mut queue_full = false;
        let result = {
            let queue = &mut *cx.queue;
            let mut sink = |x: f64, y: f64| -> bool {
                let next = CartPos::new(x, y, pos.z);
                let pb = PlannerBlock::between(kin, pos, next, feed, accel);
                if !pb.is_empty_move() && queue.push(pb).is_err() {
                    queue_full = true;
                    return false;
                }
                pos = next;
                true
            };
            if let Some(r) = block.r {
                arc::generate_r(cx.arc, start, end, r, clockwise, &mut sink)
            } else if block.i.is_some() || block.j.is_some() {
                let offset = (block.i.unwrap_or(0.0), block.j.unwrap_or(0.0));
                arc::generate_ij(cx.arc, start, end, offset, clockwise, &mut sink)
            } else {
                return Err(GcodeError::MissingParam("I/J or R for arc"));
            }
        };
        self.position = pos;

        match result {
            Ok(()) => Ok(()),
            Err(ArcError::Aborted) if queue_full => Err(GcodeError::QueueFull),
            Err(err) => Err(GcodeError::InvalidTarget(err)),
        }
    }

    fn dwell(&mut self, block: &GcodeBlock) -> Result<u32, GcodeError> {
        let p = block.p.ok_or(GcodeError::MissingParam("P for dwell"))?;
        if p < 0.0 {
            return Err(GcodeError::InvalidParam("P must not be negative"));
        }
        Ok((p * 1000.0) as u32)
    }

    fn program_end(&mut self, m: i32) {
        self.spindle_state = SpindleState::Off;
        self.program_complete = true;
        if m == 30 {
            // M30 rewinds: position returns to the origin.
            self.position = CartPos::default();
        }
    }

    fn spindle(&mut self, m: i32, block: &GcodeBlock) {
        match m {
            3 => self.spindle_state = SpindleState::Cw,
            4 => self.spindle_state = SpindleState::Ccw,
            _ => self.spindle_state = SpindleState::Off,
        }
        if self.spindle_state != SpindleState::Off {
            if let Some(s) = block.s {
                self.spindle_speed = s;
            }
        }
    }
}

fn push_block(queue: &mut PlannerQueue, block: PlannerBlock) -> Result<(), GcodeError> {
    queue.push(block).map_err(|err| match err {
        MotionError::QueueFull => GcodeError::QueueFull,
        MotionError::InvalidBlock => GcodeError::InvalidParam("unplannable move"),
    })
}
