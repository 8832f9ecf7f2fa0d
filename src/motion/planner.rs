//! Planner blocks and the bounded block queue.
//!
//! A block is one straight-line segment in machine units with the kinematic
//! attributes the stepper needs. Blocks live in a bounded ring owned by the
//! supervisor; look-ahead walks the ring by index, there are no links
//! between blocks.

use super::kinematics::{Axis, CartPos, Kinematics};
use super::{MotionError, QueueStats};
use std::collections::VecDeque;

/// One linear move in machine units.
///
/// Speeds are mm/min, acceleration mm/s^2, distance mm. `direction_bits`
/// has bit i set when axis i travels positive. `step_event_count` is the
/// dominant-axis step total; `axis_steps` carries the per-axis counts the
/// stepper executes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlannerBlock {
    pub entry_speed: f64,
    pub nominal_speed: f64,
    pub exit_speed: f64,
    pub acceleration: f64,
    pub max_entry_speed: f64,
    pub millimeters: f64,

    pub direction_bits: u8,
    pub step_event_count: u32,
    pub axis_steps: [u32; 3],

    pub recalculate: bool,
    pub nominal_length: bool,
}

impl PlannerBlock {
    /// Build the block for a segment between two cartesian waypoints.
    pub fn between(
        kin: &dyn Kinematics,
        from: CartPos,
        to: CartPos,
        feed_mm_min: f64,
        accel_mm_s2: f64,
    ) -> Self {
        let joint_from = kin.cart_to_joint(from);
        let joint_to = kin.cart_to_joint(to);

        let mut direction_bits = 0u8;
        let mut axis_steps = [0u32; 3];
        let mut step_event_count = 0u32;
        for axis in Axis::ALL {
            let delta = joint_to.v[axis.index()] - joint_from.v[axis.index()];
            if delta >= 0 {
                direction_bits |= axis.bit();
            }
            let steps = delta.unsigned_abs();
            axis_steps[axis.index()] = steps;
            step_event_count = step_event_count.max(steps);
        }

        Self {
            entry_speed: feed_mm_min,
            nominal_speed: feed_mm_min,
            exit_speed: feed_mm_min,
            acceleration: accel_mm_s2,
            max_entry_speed: feed_mm_min,
            millimeters: from.distance(&to),
            direction_bits,
            step_event_count,
            axis_steps,
            recalculate: true,
            nominal_length: false,
        }
    }

    /// Check the block invariants. A block with every speed zero is a valid
    /// complete-stop sentinel.
    pub fn validate(&self) -> bool {
        if self.entry_speed < 0.0
            || self.nominal_speed < 0.0
            || self.exit_speed < 0.0
            || self.acceleration < 0.0
            || self.max_entry_speed < 0.0
            || self.millimeters < 0.0
        {
            return false;
        }
        if self.max_entry_speed > 0.0 && self.entry_speed > self.max_entry_speed {
            return false;
        }
        if self.nominal_speed > 0.0
            && (self.entry_speed > self.nominal_speed || self.exit_speed > self.nominal_speed)
        {
            return false;
        }
        true
    }

    /// True when the block commands no steps on any axis.
    pub fn is_empty_move(&self) -> bool {
        self.step_event_count == 0 && self.millimeters <= 0.0
    }
}

/// Bounded FIFO ring of planner blocks, indexable from the head for
/// look-ahead passes.
#[derive(Debug)]
pub struct PlannerQueue {
    blocks: VecDeque<PlannerBlock>,
    capacity: usize,
    high_water: usize,
}

impl PlannerQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            high_water: 0,
        }
    }

    pub fn push(&mut self, block: PlannerBlock) -> Result<(), MotionError> {
        if !block.validate() {
            return Err(MotionError::InvalidBlock);
        }
        if self.blocks.len() >= self.capacity {
            return Err(MotionError::QueueFull);
        }
        self.blocks.push_back(block);
        self.high_water = self.high_water.max(self.blocks.len());
        Ok(())
    }

    pub fn pop(&mut self) -> Option<PlannerBlock> {
        self.blocks.pop_front()
    }

    pub fn get(&self, index: usize) -> Option<&PlannerBlock> {
        self.blocks.get(index)
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.blocks.len() >= self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            length: self.blocks.len(),
            capacity: self.capacity,
            high_water: self.high_water,
        }
    }

    /// Forward pass that makes adjacent blocks agree at their junction:
    /// each boundary speed is the smaller of the neighboring nominals,
    /// capped by the incoming block's entry limit. The final block exits at
    /// a stop.
    pub fn couple_speeds(&mut self) {
        let count = self.blocks.len();
        for index in 0..count {
            let junction = if index + 1 < count {
                let next = &self.blocks[index + 1];
                let mut speed = self.blocks[index].nominal_speed.min(next.nominal_speed);
                if next.max_entry_speed > 0.0 {
                    speed = speed.min(next.max_entry_speed);
                }
                speed
            } else {
                0.0
            };
            self.blocks[index].exit_speed = junction;
            if index + 1 < count {
                self.blocks[index + 1].entry_speed = junction;
            }
            self.blocks[index].recalculate = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::kinematics::Cartesian;

    fn block(entry: f64, nominal: f64, exit: f64) -> PlannerBlock {
        PlannerBlock {
            entry_speed: entry,
            nominal_speed: nominal,
            exit_speed: exit,
            acceleration: 100.0,
            max_entry_speed: nominal,
            millimeters: 10.0,
            step_event_count: 10,
            axis_steps: [10, 0, 0],
            direction_bits: 0b001,
            ..PlannerBlock::default()
        }
    }

    fn kin() -> Cartesian {
        Cartesian {
            steps_per_mm: [1.0, 1.0, 1.0],
            max_segment_len: None,
        }
    }

    #[test]
    fn zeroed_block_is_a_valid_complete_stop() {
        assert!(PlannerBlock::default().validate());
    }

    #[test]
    fn negative_values_fail_validation() {
        for field in 0..6 {
            let mut b = block(50.0, 100.0, 50.0);
            match field {
                0 => b.entry_speed = -1.0,
                1 => b.nominal_speed = -1.0,
                2 => b.exit_speed = -1.0,
                3 => b.acceleration = -1.0,
                4 => b.max_entry_speed = -1.0,
                _ => b.millimeters = -1.0,
            }
            assert!(!b.validate(), "field {field} should invalidate");
        }
    }

    #[test]
    fn entry_above_max_entry_fails() {
        let mut b = block(50.0, 100.0, 50.0);
        b.max_entry_speed = 40.0;
        assert!(!b.validate());
    }

    #[test]
    fn speeds_above_nominal_fail() {
        let mut b = block(150.0, 100.0, 50.0);
        b.max_entry_speed = 200.0;
        assert!(!b.validate());
        let mut b = block(50.0, 100.0, 150.0);
        b.max_entry_speed = 200.0;
        assert!(!b.validate());
    }

    #[test]
    fn between_computes_steps_and_directions() {
        let kin = kin();
        let b = PlannerBlock::between(
            &kin,
            CartPos::new(0.0, 0.0, 0.0),
            CartPos::new(30.0, -40.0, 0.0),
            200.0,
            100.0,
        );
        assert_eq!(b.axis_steps, [30, 40, 0]);
        assert_eq!(b.step_event_count, 40);
        // X positive, Y negative, Z zero-delta counts as positive.
        assert_eq!(b.direction_bits & 0b001, 0b001);
        assert_eq!(b.direction_bits & 0b010, 0);
        assert!((b.millimeters - 50.0).abs() < 1e-9);
        assert!(b.validate());
    }

    #[test]
    fn queue_is_bounded_fifo() {
        let mut q = PlannerQueue::new(2);
        assert!(q.push(block(0.0, 100.0, 0.0)).is_ok());
        assert!(q.push(block(0.0, 200.0, 0.0)).is_ok());
        assert_eq!(q.push(block(0.0, 300.0, 0.0)), Err(MotionError::QueueFull));
        assert_eq!(q.pop().unwrap().nominal_speed, 100.0);
        assert_eq!(q.pop().unwrap().nominal_speed, 200.0);
        assert!(q.pop().is_none());
    }

    #[test]
    fn queue_rejects_invalid_blocks() {
        let mut q = PlannerQueue::new(4);
        let mut b = block(50.0, 100.0, 50.0);
        b.millimeters = -1.0;
        assert_eq!(q.push(b), Err(MotionError::InvalidBlock));
        assert!(q.is_empty());
    }

    #[test]
    fn queue_indexing_from_head() {
        let mut q = PlannerQueue::new(4);
        q.push(block(0.0, 100.0, 0.0)).unwrap();
        q.push(block(0.0, 200.0, 0.0)).unwrap();
        assert_eq!(q.get(0).unwrap().nominal_speed, 100.0);
        assert_eq!(q.get(1).unwrap().nominal_speed, 200.0);
        assert!(q.get(2).is_none());
    }

    #[test]
    fn couple_speeds_matches_junctions_and_stops_at_tail() {
        let mut q = PlannerQueue::new(4);
        q.push(block(100.0, 100.0, 100.0)).unwrap();
        q.push(block(300.0, 300.0, 300.0)).unwrap();
        q.push(block(50.0, 50.0, 50.0)).unwrap();
        q.couple_speeds();

        assert_eq!(q.get(0).unwrap().exit_speed, 100.0);
        assert_eq!(q.get(1).unwrap().entry_speed, 100.0);
        assert_eq!(q.get(1).unwrap().exit_speed, 50.0);
        assert_eq!(q.get(2).unwrap().entry_speed, 50.0);
        assert_eq!(q.get(2).unwrap().exit_speed, 0.0);
        for i in 0..3 {
            assert!(q.get(i).unwrap().validate());
            assert!(!q.get(i).unwrap().recalculate);
        }
    }

    #[test]
    fn stats_track_high_water() {
        let mut q = PlannerQueue::new(8);
        q.push(block(0.0, 100.0, 0.0)).unwrap();
        q.push(block(0.0, 100.0, 0.0)).unwrap();
        q.pop();
        let stats = q.stats();
        assert_eq!(stats.length, 1);
        assert_eq!(stats.capacity, 8);
        assert_eq!(stats.high_water, 2);
    }
}
