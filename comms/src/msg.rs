//! The federated training vocabulary exchanged between a coordinator and its clients.
//!
//! Every frame body starts with a big endian `u32` kind header. Control messages carry a
//! JSON encoded `Command`, data messages carry a fixed size metadata block followed by the
//! raw `f32` parameters, which are written and read without copies.

use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();
const META_SIZE: usize = 8;

const ERR: Header = 0;
const CONTROL: Header = 1;
const PARAMS: Header = 2;
const FIT: Header = 3;
const EVALUATE: Header = 4;
const FITTED: Header = 5;

/// The hyperparameters of a single fit round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitConfig {
    pub epochs: u32,
    pub batch_size: u32,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 1,
            batch_size: 32,
        }
    }
}

/// What a client reports back after fitting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitReport {
    pub num_examples: u32,
    pub loss: f32,
}

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// The client's current parameters, answering `Command::GetParameters`.
    Params(&'a mut [f32]),
    /// Load these parameters and train on the local split.
    Fit {
        params: &'a mut [f32],
        config: FitConfig,
    },
    /// Load these parameters and compute the loss on the local evaluation split.
    Evaluate(&'a mut [f32]),
    /// The parameters after a fit round.
    Fitted {
        params: &'a mut [f32],
        report: FitReport,
    },
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    GetParameters,
    Evaluated { loss: f32, num_examples: usize },
    Reconnect,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name for the message kind, used for logging protocol violations.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::GetParameters) => "control/get_parameters",
            Msg::Control(Command::Evaluated { .. }) => "control/evaluated",
            Msg::Control(Command::Reconnect) => "control/reconnect",
            Msg::Data(Payload::Params(_)) => "data/params",
            Msg::Data(Payload::Fit { .. }) => "data/fit",
            Msg::Data(Payload::Evaluate(_)) => "data/evaluate",
            Msg::Data(Payload::Fitted { .. }) => "data/fitted",
            Msg::Err(_) => "err",
        }
    }

    fn invalid_data<T>(detail: String) -> io::Result<T> {
        Err(io::Error::new(io::ErrorKind::InvalidData, detail))
    }

    fn split_meta(rest: &mut [u8]) -> io::Result<([u8; 4], [u8; 4], &mut [u8])> {
        if rest.len() < META_SIZE {
            return Self::invalid_data(format!(
                "data frame of {} bytes is missing its {META_SIZE} bytes metadata",
                rest.len()
            ));
        }

        let (meta, nums) = rest.split_at_mut(META_SIZE);
        let mut first = [0; 4];
        let mut second = [0; 4];
        first.copy_from_slice(&meta[..4]);
        second.copy_from_slice(&meta[4..]);
        Ok((first, second, nums))
    }

    fn cast_nums(nums: &mut [u8]) -> io::Result<&mut [f32]> {
        bytemuck::try_cast_slice_mut(nums)
            .or_else(|e| Self::invalid_data(format!("malformed parameter block: {e}")))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR.to_be_bytes());
                Ok(Some(e.as_bytes()))
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL.to_be_bytes());
                serde_json::to_writer(buf, cmd)?;
                Ok(None)
            }
            Msg::Data(payload) => {
                let (kind, first, second, nums) = match payload {
                    Payload::Params(params) => (PARAMS, [0; 4], [0; 4], &params[..]),
                    Payload::Evaluate(params) => (EVALUATE, [0; 4], [0; 4], &params[..]),
                    Payload::Fit { params, config } => (
                        FIT,
                        config.epochs.to_be_bytes(),
                        config.batch_size.to_be_bytes(),
                        &params[..],
                    ),
                    Payload::Fitted { params, report } => (
                        FITTED,
                        report.num_examples.to_be_bytes(),
                        report.loss.to_be_bytes(),
                        &params[..],
                    ),
                };

                buf.extend_from_slice(&kind.to_be_bytes());
                buf.extend_from_slice(&first);
                buf.extend_from_slice(&second);
                Ok(Some(bytemuck::cast_slice(nums)))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::invalid_data(format!(
                "the given buffer is too small {}, must at least be {HEADER_SIZE} bytes",
                buf.len()
            ));
        }

        let (kind_buf, rest) = buf.split_at_mut(HEADER_SIZE);
        let mut kind = [0; HEADER_SIZE];
        kind.copy_from_slice(kind_buf);

        match Header::from_be_bytes(kind) {
            ERR => {
                let string = str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            kind @ (PARAMS | FIT | EVALUATE | FITTED) => {
                let (first, second, nums) = Self::split_meta(rest)?;
                let params = Self::cast_nums(nums)?;

                let payload = match kind {
                    PARAMS => Payload::Params(params),
                    EVALUATE => Payload::Evaluate(params),
                    FIT => Payload::Fit {
                        params,
                        config: FitConfig {
                            epochs: u32::from_be_bytes(first),
                            batch_size: u32::from_be_bytes(second),
                        },
                    },
                    _ => Payload::Fitted {
                        params,
                        report: FitReport {
                            num_examples: u32::from_be_bytes(first),
                            loss: f32::from_be_bytes(second),
                        },
                    },
                };

                Ok(Self::Data(payload))
            }
            other => Self::invalid_data(format!("received an invalid kind header {other}")),
        }
    }
}
