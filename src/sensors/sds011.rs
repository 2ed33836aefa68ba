//! Nova Fitness SDS011 laser dust sensor driver.
//!
//! The sensor talks a fixed-length binary protocol over UART (9600 8N1):
//!
//! ```text
//! command  (19 B): AA B4 cmd d1 .. d12 FF FF cs AB     cs = Σ(cmd..FF FF) & 0xFF
//! data     (10 B): AA C0 pm25_lo pm25_hi pm10_lo pm10_hi id_lo id_hi cs AB
//! ack      (10 B): AA C5 cmd d1 d2 d3 id_lo id_hi cs AB    cs = Σ(bytes 2..=7)
//! ```
//!
//! PM values are little-endian tenths of µg/m³.  The driver runs the
//! sensor in query mode: it only measures when asked.
//!
//! Generic over any `Read + Write` byte stream so the framing can be
//! exercised against an in-memory port.

use std::io::{Read, Write};

use log::debug;

use crate::error::SensorError;

const HEAD: u8 = 0xAA;
const TAIL: u8 = 0xAB;
const CMD_ID: u8 = 0xB4;
const REPLY_DATA: u8 = 0xC0;
const REPLY_ACK: u8 = 0xC5;

const CMD_REPORTING_MODE: u8 = 0x02;
const CMD_QUERY: u8 = 0x04;
const CMD_SLEEP_WORK: u8 = 0x06;

pub const COMMAND_LEN: usize = 19;
pub const REPLY_LEN: usize = 10;

/// Bytes skipped while searching for a frame head before giving up.
const MAX_RESYNC: usize = 4 * REPLY_LEN;
/// Frames read while waiting for a specific reply.
const MAX_FRAMES: usize = 4;

pub const BAUD_RATE: u32 = 9600;

// ---------------------------------------------------------------------------
// Frame codec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Switch to query mode (measure on request only).
    QueryMode,
    /// Request one measurement.
    Query,
    /// Fan and laser on (`true`) or low-power sleep (`false`).
    Work(bool),
}

impl Command {
    fn id(self) -> u8 {
        match self {
            Self::QueryMode => CMD_REPORTING_MODE,
            Self::Query => CMD_QUERY,
            Self::Work(_) => CMD_SLEEP_WORK,
        }
    }

    /// Encode as a command frame addressed to all devices.
    pub fn frame(self) -> [u8; COMMAND_LEN] {
        let mut frame = [0u8; COMMAND_LEN];
        frame[0] = HEAD;
        frame[1] = CMD_ID;
        frame[2] = self.id();
        match self {
            Self::QueryMode => {
                frame[3] = 1; // set
                frame[4] = 1; // query
            }
            Self::Query => {}
            Self::Work(working) => {
                frame[3] = 1; // set
                frame[4] = u8::from(working);
            }
        }
        frame[15] = 0xFF;
        frame[16] = 0xFF;
        frame[17] = checksum(&frame[2..17]);
        frame[18] = TAIL;
        frame
    }
}

/// A decoded sensor reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    /// PM2.5 and PM10 in µg/m³.
    Data { pm25: f32, pm10: f32 },
    /// Acknowledgement of the command with the given id.
    Ack { command: u8 },
}

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

pub fn decode_reply(frame: &[u8; REPLY_LEN]) -> Result<Reply, SensorError> {
    if frame[0] != HEAD || frame[9] != TAIL {
        return Err(SensorError::Protocol("bad frame delimiters"));
    }
    if checksum(&frame[2..8]) != frame[8] {
        return Err(SensorError::Protocol("bad checksum"));
    }
    match frame[1] {
        REPLY_DATA => Ok(Reply::Data {
            pm25: f32::from(u16::from_le_bytes([frame[2], frame[3]])) / 10.0,
            pm10: f32::from(u16::from_le_bytes([frame[4], frame[5]])) / 10.0,
        }),
        REPLY_ACK => Ok(Reply::Ack { command: frame[2] }),
        _ => Err(SensorError::Protocol("unknown reply type")),
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct Sds011<P> {
    port: P,
}

impl<P: Read + Write> Sds011<P> {
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Put the sensor in query mode.
    pub fn set_query_mode(&mut self) -> Result<(), SensorError> {
        self.command_acked(Command::QueryMode)
    }

    /// Wake the sensor (`true`) or send it to sleep (`false`).
    pub fn set_working(&mut self, working: bool) -> Result<(), SensorError> {
        self.command_acked(Command::Work(working))
    }

    /// Request one measurement; returns `(pm25, pm10)` in µg/m³.
    pub fn query(&mut self) -> Result<(f32, f32), SensorError> {
        self.send(Command::Query)?;
        for _ in 0..MAX_FRAMES {
            match self.receive()? {
                Reply::Data { pm25, pm10 } => return Ok((pm25, pm10)),
                // A late acknowledgement of an earlier command.
                Reply::Ack { command } => debug!("skipping ack for 0x{command:02X}"),
            }
        }
        Err(SensorError::Protocol("no data reply"))
    }

    pub fn into_inner(self) -> P {
        self.port
    }

    fn command_acked(&mut self, command: Command) -> Result<(), SensorError> {
        self.send(command)?;
        for _ in 0..MAX_FRAMES {
            match self.receive()? {
                Reply::Ack { command: id } if id == command.id() => return Ok(()),
                other => debug!("skipping {other:?} while waiting for ack"),
            }
        }
        Err(SensorError::Protocol("command not acknowledged"))
    }

    fn send(&mut self, command: Command) -> Result<(), SensorError> {
        self.port.write_all(&command.frame())?;
        self.port.flush()?;
        Ok(())
    }

    /// Read the next frame, skipping garbage before its head byte.
    fn receive(&mut self) -> Result<Reply, SensorError> {
        let mut frame = [0u8; REPLY_LEN];
        let mut skipped = 0;
        loop {
            self.port.read_exact(&mut frame[..1])?;
            if frame[0] == HEAD {
                break;
            }
            skipped += 1;
            if skipped > MAX_RESYNC {
                return Err(SensorError::Protocol("no frame head"));
            }
        }
        self.port.read_exact(&mut frame[1..])?;
        decode_reply(&frame)
    }
}
