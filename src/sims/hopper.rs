//! A one-legged runner on a line, reduced to three knobs and integer
//! arithmetic.
//!
//! Surging builds speed but tips the body forward; coasting bleeds both off
//! slowly; recovering slams the tilt back at the cost of speed. Going fast
//! destabilizes on its own, so sustained progress needs a gait of alternating
//! surges and recoveries, which is exactly the structure the tree search is
//! supposed to discover. All state is integral, so replaying a command
//! sequence reproduces states bit for bit.

use crate::evaluators::Progress;
use crate::{Simulation, State};

/// Tilt magnitude beyond which the hopper has fallen.
pub const TILT_LIMIT: i64 = 12;

/// Fixed-point scale of [`HopperState::distance`].
pub const DISTANCE_SCALE: f32 = 16.0;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Gait {
    /// Let speed and tilt decay toward neutral.
    Coast,
    /// Drive forward: more speed, more tilt.
    Surge,
    /// Fight the tilt, shedding a little speed.
    Recover,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct HopperState {
    /// Distance covered, in 1/16ths of a body length.
    pub distance: i64,
    pub speed: i64,
    pub tilt: i64,
    pub failed: bool,
}

impl HopperState {
    pub fn initial() -> Self {
        HopperState {
            distance: 0,
            speed: 0,
            tilt: 0,
            failed: false,
        }
    }
}

impl State for HopperState {
    fn is_failed(&self) -> bool {
        self.failed
    }
}

impl Progress for HopperState {
    fn horizontal_distance(&self) -> f32 {
        self.distance as f32 / DISTANCE_SCALE
    }
}

/// The simulation. One instance per worker; `reset` rebuilds the world.
pub struct Hopper {
    state: HopperState,
}

impl Hopper {
    pub fn new() -> Self {
        Hopper {
            state: HopperState::initial(),
        }
    }
}

impl Default for Hopper {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation for Hopper {
    type Command = Gait;
    type State = HopperState;

    fn reset(&mut self) -> HopperState {
        self.state = HopperState::initial();
        self.state.clone()
    }

    fn step(&mut self, command: &Gait) -> HopperState {
        let s = &mut self.state;
        if s.failed {
            return s.clone();
        }
        match command {
            Gait::Surge => {
                s.speed += 3;
                s.tilt += 2;
            }
            Gait::Coast => {
                s.speed -= s.speed.signum();
                s.tilt -= s.tilt.signum();
            }
            Gait::Recover => {
                s.speed = (s.speed - 1).max(0);
                s.tilt -= 3;
            }
        }
        // Running fast destabilizes by itself.
        s.tilt += s.speed / 8;
        s.distance += s.speed;
        if s.tilt.abs() > TILT_LIMIT {
            s.failed = true;
        }
        s.clone()
    }
}
