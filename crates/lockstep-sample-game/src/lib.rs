/*!
# lockstep-sample-game

A toy deterministic `World`/`Input` pair used across this workspace's
integration tests, playing the same role `nimble-sample-game` plays for the
`nimble-*` crates: a minimal concrete instantiation of the generic engine so
tests exercise real `step` application instead of mocking it away.
*/

use flood_rs::{Deserialize, ReadOctetStream, Serialize, WriteOctetStream};
use lockstep_engine::Stepper;
use lockstep_tick::{PlayerId, Tick};
use std::collections::BTreeMap;
use std::io;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum SampleInput {
    #[default]
    Idle,
    Move {
        dx: i32,
        dy: i32,
    },
}

impl Serialize for SampleInput {
    fn serialize(&self, stream: &mut impl WriteOctetStream) -> io::Result<()> {
        match self {
            Self::Idle => stream.write_u8(0),
            Self::Move { dx, dy } => {
                stream.write_u8(1)?;
                stream.write_i32(*dx)?;
                stream.write_i32(*dy)
            }
        }
    }
}

impl Deserialize for SampleInput {
    fn deserialize(stream: &mut impl ReadOctetStream) -> io::Result<Self> {
        Ok(match stream.read_u8()? {
            0 => Self::Idle,
            _ => Self::Move {
                dx: stream.read_i32()?,
                dy: stream.read_i32()?,
            },
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct SampleWorld {
    pub x: i32,
    pub y: i32,
}

/// Moves every player's position by their input, applied in `PlayerId`
/// order (guaranteed by the `BTreeMap` the engine hands to `step`).
#[derive(Debug, Default, Copy, Clone)]
pub struct SampleStepper;

impl Stepper for SampleStepper {
    type Input = SampleInput;
    type World = SampleWorld;

    fn input0(&self) -> Self::Input {
        SampleInput::Idle
    }

    fn step(
        &self,
        paired_inputs: &BTreeMap<PlayerId, (Self::Input, Self::Input)>,
        _tick: Tick,
        prev_world: &Self::World,
    ) -> Self::World {
        let mut world = *prev_world;
        for (_, next) in paired_inputs.values() {
            if let SampleInput::Move { dx, dy } = next {
                world.x += dx;
                world.y += dy;
            }
        }
        world
    }
}
