//! Frame identifiers and payload layouts.
//!
//! All multi-byte fields are big-endian.
//!
//! | id | direction | payload |
//! |----|-----------|---------|
//! | 1  | client → server | `u8` command: 1 start, 0 stop |
//! | 2  | client → server | empty keepalive |
//! | 10 | server → client | `u32` time ms, `f64` set-point, `f64` measurement, `f64` start value, `f64` end value |
//! | 12 | client → server | `f64` start value, `f32` end value, `i16` start time ms, `i16` end time ms |

use crate::frame::Frame;
use bench_common::error::{BenchError, BenchResult};
use bench_common::trajectory::Ramp;

/// Experiment start/stop command.
pub const EXPERIMENT_FRAME_ID: u8 = 1;
/// Keepalive with no payload.
pub const KEEPALIVE_FRAME_ID: u8 = 2;
/// Bench sample sent once per running tick.
pub const BENCH_DATA_FRAME_ID: u8 = 10;
/// Trajectory parameters.
pub const TRAJECTORY_FRAME_ID: u8 = 12;

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Start (`true`) or stop (`false`) the experiment.
    Experiment(bool),
    /// Liveness signal.
    Keepalive,
    /// New trajectory parameters.
    Trajectory(TrajectoryParams),
}

impl Command {
    /// Decode an inbound frame.
    ///
    /// Returns `Ok(None)` for identifiers this server does not handle.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Frame`] for a known identifier with a short
    /// payload.
    pub fn decode(frame: &Frame) -> BenchResult<Option<Self>> {
        let payload = frame.payload();
        match frame.id() {
            EXPERIMENT_FRAME_ID => {
                let flag = *payload
                    .first()
                    .ok_or_else(|| BenchError::Frame("empty experiment command".into()))?;
                Ok(Some(Self::Experiment(flag != 0)))
            }
            KEEPALIVE_FRAME_ID => Ok(Some(Self::Keepalive)),
            TRAJECTORY_FRAME_ID => TrajectoryParams::decode(payload).map(|p| Some(Self::Trajectory(p))),
            _ => Ok(None),
        }
    }

    /// Encode as a frame, as a client would send it.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        let (id, payload) = match self {
            Self::Experiment(start) => (EXPERIMENT_FRAME_ID, vec![u8::from(*start)]),
            Self::Keepalive => (KEEPALIVE_FRAME_ID, Vec::new()),
            Self::Trajectory(params) => (TRAJECTORY_FRAME_ID, params.encode()),
        };
        Frame::from_valid(id, payload)
    }
}

/// Trajectory parameters as carried on the wire.
///
/// The client packs these as `>dfhh`, so the end value travels at single
/// precision and both times are signed 16-bit milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryParams {
    /// Value before the ramp.
    pub start_value: f64,
    /// Value after the ramp.
    pub end_value: f32,
    /// Ramp start in milliseconds of experiment time.
    pub start_time: i16,
    /// Ramp end in milliseconds of experiment time.
    pub end_time: i16,
}

impl TrajectoryParams {
    /// Payload size in bytes.
    pub const SIZE: usize = 16;

    /// Decode from a frame payload. Trailing bytes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Frame`] if the payload is shorter than [`Self::SIZE`].
    pub fn decode(payload: &[u8]) -> BenchResult<Self> {
        if payload.len() < Self::SIZE {
            return Err(BenchError::Frame(format!(
                "trajectory payload too short: {} bytes",
                payload.len()
            )));
        }
        Ok(Self {
            start_value: read_f64(&payload[0..8]),
            end_value: f32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]),
            start_time: i16::from_be_bytes([payload[12], payload[13]]),
            end_time: i16::from_be_bytes([payload[14], payload[15]]),
        })
    }

    /// Encode to a frame payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.start_value.to_be_bytes());
        buf.extend_from_slice(&self.end_value.to_be_bytes());
        buf.extend_from_slice(&self.start_time.to_be_bytes());
        buf.extend_from_slice(&self.end_time.to_be_bytes());
        buf
    }

    /// Validate into a ramp.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::InvalidTrajectory`] for a negative time and
    /// propagates [`Ramp::new`] validation errors.
    pub fn to_ramp(&self) -> BenchResult<Ramp> {
        let time = |ms: i16| {
            u64::try_from(ms)
                .map_err(|_| BenchError::InvalidTrajectory(format!("negative ramp time {ms} ms")))
        };
        Ramp::new(
            time(self.start_time)?,
            time(self.end_time)?,
            self.start_value,
            f64::from(self.end_value),
        )
    }
}

/// One outbound bench sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchSample {
    /// Experiment time in milliseconds (wrapping 32-bit counter).
    pub time: u32,
    /// Trajectory output sent to the rig.
    pub setpoint: f64,
    /// Value measured on the rig.
    pub measurement: f64,
    /// Active ramp start value.
    pub start_value: f64,
    /// Active ramp end value.
    pub end_value: f64,
}

impl BenchSample {
    /// Payload size in bytes.
    pub const SIZE: usize = 36;

    /// Encode as a [`BENCH_DATA_FRAME_ID`] frame.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.time.to_be_bytes());
        for value in [self.setpoint, self.measurement, self.start_value, self.end_value] {
            buf.extend_from_slice(&value.to_be_bytes());
        }
        Frame::from_valid(BENCH_DATA_FRAME_ID, buf)
    }

    /// Decode from a [`BENCH_DATA_FRAME_ID`] frame, as a client would.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Frame`] for another identifier or a short payload.
    pub fn from_frame(frame: &Frame) -> BenchResult<Self> {
        let payload = frame.payload();
        if frame.id() != BENCH_DATA_FRAME_ID || payload.len() < Self::SIZE {
            return Err(BenchError::Frame(format!(
                "not a bench data frame: id {} with {} bytes",
                frame.id(),
                payload.len()
            )));
        }
        Ok(Self {
            time: read_u32(&payload[0..4]),
            setpoint: read_f64(&payload[4..12]),
            measurement: read_f64(&payload[12..20]),
            start_value: read_f64(&payload[20..28]),
            end_value: read_f64(&payload[28..36]),
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_f64(bytes: &[u8]) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    f64::from_be_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_experiment_command() {
        let start = Frame::new(EXPERIMENT_FRAME_ID, vec![1]).unwrap();
        let stop = Frame::new(EXPERIMENT_FRAME_ID, vec![0]).unwrap();
        assert_eq!(Command::decode(&start).unwrap(), Some(Command::Experiment(true)));
        assert_eq!(Command::decode(&stop).unwrap(), Some(Command::Experiment(false)));

        let empty = Frame::new(EXPERIMENT_FRAME_ID, Vec::new()).unwrap();
        assert!(Command::decode(&empty).is_err());
    }

    #[test]
    fn test_unknown_id_is_ignored() {
        let frame = Frame::new(33, vec![1, 2, 3]).unwrap();
        assert_eq!(Command::decode(&frame).unwrap(), None);
    }

    #[test]
    fn test_trajectory_payload_layout() {
        let params = TrajectoryParams {
            start_value: 1.5,
            end_value: -2.0,
            start_time: 1000,
            end_time: 3000,
        };
        let payload = params.encode();
        assert_eq!(payload.len(), TrajectoryParams::SIZE);
        assert_eq!(&payload[0..8], &1.5f64.to_be_bytes());
        assert_eq!(&payload[8..12], &(-2.0f32).to_be_bytes());
        assert_eq!(&payload[14..16], &[0x0B, 0xB8]);

        let frame = Command::Trajectory(params).to_frame();
        assert_eq!(Command::decode(&frame).unwrap(), Some(Command::Trajectory(params)));
    }

    #[test]
    fn test_trajectory_decodes_client_packing() {
        // struct.pack('>dfhh', 0.0, 10.0, 320, 10)
        let payload = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // 0.0 (f64)
            0x41, 0x20, 0x00, 0x00, // 10.0 (f32)
            0x01, 0x40, // 320
            0x00, 0x0A, // 10
        ];
        let frame = Frame::new(TRAJECTORY_FRAME_ID, payload.to_vec()).unwrap();
        assert_eq!(
            Command::decode(&frame).unwrap(),
            Some(Command::Trajectory(TrajectoryParams {
                start_value: 0.0,
                end_value: 10.0,
                start_time: 320,
                end_time: 10,
            }))
        );
    }

    #[test]
    fn test_short_trajectory_rejected() {
        let frame = Frame::new(TRAJECTORY_FRAME_ID, vec![0; 15]).unwrap();
        assert!(matches!(Command::decode(&frame), Err(BenchError::Frame(_))));
    }

    #[test]
    fn test_negative_trajectory_time_rejected() {
        let params = TrajectoryParams {
            start_value: 0.0,
            end_value: 1.0,
            start_time: -5,
            end_time: 100,
        };
        assert!(matches!(params.to_ramp(), Err(BenchError::InvalidTrajectory(_))));
    }

    #[test]
    fn test_trajectory_to_ramp_validates() {
        let reversed = TrajectoryParams {
            start_value: 0.0,
            end_value: 1.0,
            start_time: 500,
            end_time: 100,
        };
        assert!(reversed.to_ramp().is_err());
    }

    #[test]
    fn test_bench_sample_layout() {
        let sample = BenchSample {
            time: 2000,
            setpoint: 5.0,
            measurement: 4.5,
            start_value: 0.0,
            end_value: 10.0,
        };
        let frame = sample.to_frame();
        assert_eq!(frame.id(), BENCH_DATA_FRAME_ID);
        assert_eq!(frame.payload().len(), BenchSample::SIZE);
        assert_eq!(&frame.payload()[0..4], &2000u32.to_be_bytes());
        assert_eq!(&frame.payload()[4..12], &5.0f64.to_be_bytes());
        assert_eq!(BenchSample::from_frame(&frame).unwrap(), sample);
    }

    #[test]
    fn test_bench_sample_wrong_id() {
        let frame = Frame::new(KEEPALIVE_FRAME_ID, vec![0; 36]).unwrap();
        assert!(BenchSample::from_frame(&frame).is_err());
    }
}
