//! Relay wire protocol: message enums and length-delimited framing.
//!
//! Two enums define the protocol vocabulary: [`ClientMessage`] (client to
//! relay) and [`ServerMessage`] (relay to clients). Player commands stay
//! opaque byte payloads inside them - the relay only rewrites the command
//! header through the sequencer, never the payload - so this module does not
//! depend on command internals.
//!
//! Framing is a 4-byte big-endian length prefix followed by a
//! bincode-serialized message, over any `Read`/`Write` stream. The async
//! relay loop re-implements the same two reads on tokio streams.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use emberfall_core::dispatch::CommandQueue;
use emberfall_core::error::Result as CoreResult;
use emberfall_core::game::{PlayerNumber, Tick};

/// Protocol version sent in the join handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum allowed frame size (1 MB). Command records are small; the guard
/// protects against unbounded allocation from malformed length prefixes.
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Public identity of a connected player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    /// Assigned player number.
    pub number: PlayerNumber,
    /// Display name.
    pub name: String,
}

/// Messages sent by a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Join the session (handshake).
    Join {
        /// Must equal [`PROTOCOL_VERSION`].
        protocol_version: u32,
        /// Display name.
        name: String,
    },
    /// A player command, wire-encoded, awaiting sequencing.
    Command {
        /// Opaque wire-format command record.
        payload: Vec<u8>,
    },
    /// Periodic state checksum for desync detection.
    Checksum {
        /// Tick the hash was taken at.
        tick: Tick,
        /// The reporting peer's state hash.
        hash: u64,
    },
    /// Player is leaving gracefully.
    Goodbye,
}

/// Messages sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Handshake accepted.
    Welcome {
        /// The number assigned to the joining player.
        number: PlayerNumber,
        /// Everyone currently in the session.
        players: Vec<PlayerInfo>,
    },
    /// Handshake rejected.
    Rejected {
        /// Human-readable reason.
        reason: String,
    },
    /// Sequenced commands falling due at one tick.
    Turn {
        /// Tick at which every command in this batch falls due.
        due: Tick,
        /// Wire-format command records, already carrying their cmdserials.
        commands: Vec<Vec<u8>>,
    },
    /// A player connected.
    PlayerJoined {
        /// The new player.
        player: PlayerInfo,
    },
    /// A player disconnected.
    PlayerLeft {
        /// Their number.
        number: PlayerNumber,
        /// Their name.
        name: String,
    },
    /// Peers reported diverging state hashes.
    DesyncDetected {
        /// First tick with a mismatch.
        tick: Tick,
    },
}

/// Serialize a protocol message to bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> io::Result<Vec<u8>> {
    bincode::serialize(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Deserialize a protocol message from bytes.
///
/// # Errors
///
/// Returns an error if the bytes do not decode as `T`.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> io::Result<T> {
    bincode::deserialize(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Write a length-delimited frame: 4-byte big-endian length, then payload.
///
/// # Errors
///
/// Returns `InvalidInput` for oversized frames, otherwise IO errors.
pub fn write_frame<W: Write>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    let len = frame.len();
    if len > MAX_FRAME_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame too large: {len} bytes (max {MAX_FRAME_SIZE})"),
        ));
    }
    #[allow(clippy::cast_possible_truncation)]
    let len_bytes = (len as u32).to_be_bytes();
    writer.write_all(&len_bytes)?;
    writer.write_all(frame)?;
    writer.flush()?;
    Ok(())
}

/// Read a length-delimited frame.
///
/// Returns `UnexpectedEof` if the stream closes before or during a frame,
/// `InvalidData` if the length exceeds [`MAX_FRAME_SIZE`].
///
/// # Errors
///
/// See above.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes (max {MAX_FRAME_SIZE})"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Client-side turn application: decode each command record, bind the
/// batch's due tick, and hand it to the dispatcher.
///
/// # Errors
///
/// Returns an error if any record fails to decode; earlier records of the
/// batch are already enqueued at that point and the session should abort.
pub fn apply_turn(queue: &mut CommandQueue, due: Tick, commands: &[Vec<u8>]) -> CoreResult<()> {
    for raw in commands {
        let mut reader = emberfall_core::codec::StreamRead::new(raw);
        let mut command = emberfall_core::command::PlayerCommand::deserialize(&mut reader)?;
        command.bind_duetime(due);
        queue.enqueue(command);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip_client(msg: &ClientMessage) {
        let bytes = encode(msg).unwrap();
        let mut wire = Vec::new();
        write_frame(&mut wire, &bytes).unwrap();

        let mut cursor = Cursor::new(&wire);
        let recovered_bytes = read_frame(&mut cursor).unwrap();
        let recovered: ClientMessage = decode(&recovered_bytes).unwrap();
        assert_eq!(&recovered, msg);
    }

    fn roundtrip_server(msg: &ServerMessage) {
        let bytes = encode(msg).unwrap();
        let mut wire = Vec::new();
        write_frame(&mut wire, &bytes).unwrap();

        let mut cursor = Cursor::new(&wire);
        let recovered_bytes = read_frame(&mut cursor).unwrap();
        let recovered: ServerMessage = decode(&recovered_bytes).unwrap();
        assert_eq!(&recovered, msg);
    }

    #[test]
    fn roundtrip_join() {
        roundtrip_client(&ClientMessage::Join {
            protocol_version: PROTOCOL_VERSION,
            name: "aldora".into(),
        });
    }

    #[test]
    fn roundtrip_command() {
        roundtrip_client(&ClientMessage::Command {
            payload: vec![1, 2, 3, 4, 5],
        });
    }

    #[test]
    fn roundtrip_checksum() {
        roundtrip_client(&ClientMessage::Checksum {
            tick: 1000,
            hash: 0x1234_5678_9ABC_DEF0,
        });
    }

    #[test]
    fn roundtrip_goodbye() {
        roundtrip_client(&ClientMessage::Goodbye);
    }

    #[test]
    fn roundtrip_welcome() {
        roundtrip_server(&ServerMessage::Welcome {
            number: 2,
            players: vec![
                PlayerInfo {
                    number: 1,
                    name: "host".into(),
                },
                PlayerInfo {
                    number: 2,
                    name: "guest".into(),
                },
            ],
        });
    }

    #[test]
    fn roundtrip_turn() {
        roundtrip_server(&ServerMessage::Turn {
            due: 64,
            commands: vec![vec![9, 9], vec![]],
        });
    }

    #[test]
    fn roundtrip_desync() {
        roundtrip_server(&ServerMessage::DesyncDetected { tick: 5000 });
    }

    #[test]
    fn rejects_oversized_read() {
        let fake_len = (MAX_FRAME_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(fake_len.to_vec());
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn read_unexpected_eof() {
        let mut cursor = Cursor::new(vec![0u8, 1]);
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn multiple_frames_in_sequence() {
        let frames: Vec<&[u8]> = vec![b"first", b"second", b"third"];
        let mut buf = Vec::new();
        for frame in &frames {
            write_frame(&mut buf, frame).unwrap();
        }

        let mut cursor = Cursor::new(&buf);
        for expected in &frames {
            let recovered = read_frame(&mut cursor).unwrap();
            assert_eq!(recovered, *expected);
        }
    }
}
