/*!
# lockstep-tick

Identifier types shared across the lockstep rollback engine: the
monotonically advancing simulation [`Tick`] and the server-assigned
[`PlayerId`].

## Example

```rust
use lockstep_tick::Tick;

let base = Tick::new(10);
let next = base + 1;
assert_eq!(next - base, 1);
assert!(next > base);
```
*/

use flood_rs::{Deserialize, ReadOctetStream, Serialize, WriteOctetStream};
use std::fmt::{Display, Formatter};
use std::ops::{Add, Sub};

/// A discrete simulation step. All participants agree on tick numbering;
/// tick `0` is the initial state shared by every participant.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Tick(pub i64);

impl Tick {
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl Add<i64> for Tick {
    type Output = Tick;

    fn add(self, rhs: i64) -> Tick {
        Tick(self.0 + rhs)
    }
}

impl Sub<i64> for Tick {
    type Output = Tick;

    fn sub(self, rhs: i64) -> Tick {
        Tick(self.0 - rhs)
    }
}

impl Sub<Tick> for Tick {
    type Output = i64;

    fn sub(self, rhs: Tick) -> i64 {
        self.0 - rhs.0
    }
}

impl From<i64> for Tick {
    fn from(value: i64) -> Self {
        Tick(value)
    }
}

impl From<Tick> for i64 {
    fn from(tick: Tick) -> i64 {
        tick.0
    }
}

impl Display for Tick {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "tick({})", self.0)
    }
}

impl Serialize for Tick {
    fn serialize(&self, stream: &mut impl WriteOctetStream) -> std::io::Result<()> {
        stream.write_u64(self.0 as u64)
    }
}

impl Deserialize for Tick {
    fn deserialize(stream: &mut impl ReadOctetStream) -> std::io::Result<Self> {
        Ok(Self(stream.read_u64()? as i64))
    }
}

/// A unique participant in the simulation. Assigned by the server on
/// connect and constant thereafter.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PlayerId(pub u16);

impl PlayerId {
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }
}

impl Display for PlayerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "player({})", self.0)
    }
}

impl Serialize for PlayerId {
    fn serialize(&self, stream: &mut impl WriteOctetStream) -> std::io::Result<()> {
        stream.write_u16(self.0)
    }
}

impl Deserialize for PlayerId {
    fn deserialize(stream: &mut impl ReadOctetStream) -> std::io::Result<Self> {
        Ok(Self(stream.read_u16()?))
    }
}
