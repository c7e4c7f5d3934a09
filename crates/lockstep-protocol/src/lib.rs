/*!
# lockstep-protocol

Wire message types exchanged between the lockstep client and server (spec
§6). Serialization follows the same shape as `nimble_protocol`'s
`ClientToHostCommands`/`HostToClientCommands`: a leading opcode byte
(`#[repr(u8)]` + `TryFrom<u8>`), then fixed fields via `flood-rs`'s
`WriteOctetStream`/`ReadOctetStream`.

The "compact" per-tick input map list carried by [`Message::AuthInput`] is
specified here rather than reverse-engineered from an existing server
(spec.md §9, Open Question: no existing server to inspect for this crate).
*/

use flood_rs::{Deserialize, ReadOctetStream, Serialize, WriteOctetStream};
use lockstep_input_store::TickInputs;
use lockstep_tick::{PlayerId, Tick};
use std::fmt::Debug;
use std::io;

/// A client-clock millisecond reading, carried on the wire. Kept distinct
/// from `lockstep_clock`'s richer `monotonic_time_rs::Millis` the same way
/// `nimble_protocol`'s `ClientTime` wire type is kept distinct from the
/// `Millis` type used internally by `nimble-layer`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WireTimestamp(pub u64);

impl Serialize for WireTimestamp {
    fn serialize(&self, stream: &mut impl WriteOctetStream) -> io::Result<()> {
        stream.write_u64(self.0)
    }
}

impl Deserialize for WireTimestamp {
    fn deserialize(stream: &mut impl ReadOctetStream) -> io::Result<Self> {
        Ok(Self(stream.read_u64()?))
    }
}

#[repr(u8)]
enum MessageTag {
    Connect = 0x01,
    Connected = 0x02,
    Heartbeat = 0x03,
    HeartbeatResponse = 0x04,
    SubmitInput = 0x05,
    Ack = 0x06,
    AuthInput = 0x07,
    HintInput = 0x08,
    RequestAuthInput = 0x09,
}

impl TryFrom<u8> for MessageTag {
    type Error = io::Error;

    fn try_from(value: u8) -> io::Result<Self> {
        Ok(match value {
            0x01 => Self::Connect,
            0x02 => Self::Connected,
            0x03 => Self::Heartbeat,
            0x04 => Self::HeartbeatResponse,
            0x05 => Self::SubmitInput,
            0x06 => Self::Ack,
            0x07 => Self::AuthInput,
            0x08 => Self::HintInput,
            0x09 => Self::RequestAuthInput,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown lockstep message tag 0x{value:02X}"),
                ))
            }
        })
    }
}

/// A single message of the lockstep wire protocol, generic over the
/// application's input type `I`.
#[derive(Debug, Clone, PartialEq)]
pub enum Message<I: Clone + Debug> {
    /// c -> s: request to join.
    Connect(WireTimestamp),
    /// s -> c: assigns the player id.
    Connected(PlayerId),
    /// c -> s: liveness + clock sample request.
    Heartbeat(WireTimestamp),
    /// s -> c: clock sample (client send time echoed back, server receive time).
    HeartbeatResponse(WireTimestamp, WireTimestamp),
    /// c -> s: local input for a target tick.
    SubmitInput(Tick, I),
    /// c -> s: acknowledges the unbroken authoritative prefix.
    Ack(Tick),
    /// s -> c: consecutive authoritative inputs starting at `head_tick`,
    /// followed by speculative hints for the ticks right after them.
    AuthInput {
        head_tick: Tick,
        auth: Vec<TickInputs<I>>,
        hints: Vec<TickInputs<I>>,
    },
    /// s -> c: a single speculative input.
    HintInput(Tick, PlayerId, I),
    /// c -> s: request missing authoritative ticks.
    RequestAuthInput(Vec<Tick>),
}

fn write_tick_inputs<I: Serialize>(
    stream: &mut impl WriteOctetStream,
    inputs: &TickInputs<I>,
) -> io::Result<()> {
    stream.write_u8(inputs.len() as u8)?;
    for (player, input) in inputs {
        player.serialize(stream)?;
        input.serialize(stream)?;
    }
    Ok(())
}

fn read_tick_inputs<I: Deserialize>(
    stream: &mut impl ReadOctetStream,
) -> io::Result<TickInputs<I>> {
    let count = stream.read_u8()?;
    let mut map = TickInputs::new();
    for _ in 0..count {
        let player = PlayerId::deserialize(stream)?;
        let input = I::deserialize(stream)?;
        map.insert(player, input);
    }
    Ok(map)
}

fn write_tick_inputs_list<I: Serialize>(
    stream: &mut impl WriteOctetStream,
    list: &[TickInputs<I>],
) -> io::Result<()> {
    stream.write_u16(list.len() as u16)?;
    for inputs in list {
        write_tick_inputs(stream, inputs)?;
    }
    Ok(())
}

fn read_tick_inputs_list<I: Deserialize>(
    stream: &mut impl ReadOctetStream,
) -> io::Result<Vec<TickInputs<I>>> {
    let count = stream.read_u16()?;
    let mut list = Vec::with_capacity(count as usize);
    for _ in 0..count {
        list.push(read_tick_inputs(stream)?);
    }
    Ok(list)
}

impl<I: Clone + Debug + Serialize + Deserialize> Serialize for Message<I> {
    fn serialize(&self, stream: &mut impl WriteOctetStream) -> io::Result<()> {
        match self {
            Self::Connect(ts) => {
                stream.write_u8(MessageTag::Connect as u8)?;
                ts.serialize(stream)
            }
            Self::Connected(player_id) => {
                stream.write_u8(MessageTag::Connected as u8)?;
                player_id.serialize(stream)
            }
            Self::Heartbeat(ts) => {
                stream.write_u8(MessageTag::Heartbeat as u8)?;
                ts.serialize(stream)
            }
            Self::HeartbeatResponse(client_send, server_recv) => {
                stream.write_u8(MessageTag::HeartbeatResponse as u8)?;
                client_send.serialize(stream)?;
                server_recv.serialize(stream)
            }
            Self::SubmitInput(tick, input) => {
                stream.write_u8(MessageTag::SubmitInput as u8)?;
                tick.serialize(stream)?;
                input.serialize(stream)
            }
            Self::Ack(tick) => {
                stream.write_u8(MessageTag::Ack as u8)?;
                tick.serialize(stream)
            }
            Self::AuthInput {
                head_tick,
                auth,
                hints,
            } => {
                stream.write_u8(MessageTag::AuthInput as u8)?;
                head_tick.serialize(stream)?;
                write_tick_inputs_list(stream, auth)?;
                write_tick_inputs_list(stream, hints)
            }
            Self::HintInput(tick, player_id, input) => {
                stream.write_u8(MessageTag::HintInput as u8)?;
                tick.serialize(stream)?;
                player_id.serialize(stream)?;
                input.serialize(stream)
            }
            Self::RequestAuthInput(ticks) => {
                stream.write_u8(MessageTag::RequestAuthInput as u8)?;
                stream.write_u16(ticks.len() as u16)?;
                for tick in ticks {
                    tick.serialize(stream)?;
                }
                Ok(())
            }
        }
    }
}

impl<I: Clone + Debug + Serialize + Deserialize> Deserialize for Message<I> {
    fn deserialize(stream: &mut impl ReadOctetStream) -> io::Result<Self> {
        let tag = MessageTag::try_from(stream.read_u8()?)?;
        Ok(match tag {
            MessageTag::Connect => Self::Connect(WireTimestamp::deserialize(stream)?),
            MessageTag::Connected => Self::Connected(PlayerId::deserialize(stream)?),
            MessageTag::Heartbeat => Self::Heartbeat(WireTimestamp::deserialize(stream)?),
            MessageTag::HeartbeatResponse => Self::HeartbeatResponse(
                WireTimestamp::deserialize(stream)?,
                WireTimestamp::deserialize(stream)?,
            ),
            MessageTag::SubmitInput => {
                Self::SubmitInput(Tick::deserialize(stream)?, I::deserialize(stream)?)
            }
            MessageTag::Ack => Self::Ack(Tick::deserialize(stream)?),
            MessageTag::AuthInput => {
                let head_tick = Tick::deserialize(stream)?;
                let auth = read_tick_inputs_list(stream)?;
                let hints = read_tick_inputs_list(stream)?;
                Self::AuthInput {
                    head_tick,
                    auth,
                    hints,
                }
            }
            MessageTag::HintInput => Self::HintInput(
                Tick::deserialize(stream)?,
                PlayerId::deserialize(stream)?,
                I::deserialize(stream)?,
            ),
            MessageTag::RequestAuthInput => {
                let count = stream.read_u16()?;
                let mut ticks = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    ticks.push(Tick::deserialize(stream)?);
                }
                Self::RequestAuthInput(ticks)
            }
        })
    }
}
