//! Error types for `.ld` encoding and decoding

use crate::addr::FileAddr;
use crate::datatype::Datatype;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum I2Error {
    #[error("Underlying IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid header marker: found {found}, expected {expected}")]
    InvalidHeaderMarker { found: u32, expected: u32 },

    #[error("Unrecognized datatype (type: {type_id}, size: {size})")]
    UnrecognizedDatatype { type_id: u16, size: u16 },

    #[error("Channel '{channel}' has no readable sample datatype")]
    UnreadableChannel { channel: String },

    #[error("Channel list loops back to {addr}")]
    ChannelListCycle { addr: FileAddr },

    #[error("Address overflow: {base} + {by} does not fit in a {width}-bit pointer")]
    AddressOverflow {
        base: FileAddr,
        by: u32,
        width: u8,
    },

    #[error("Cannot write samples of datatype {0:?}")]
    UnwritableDatatype(Datatype),

    #[error("Out of order write: {0}")]
    WriteOrder(&'static str),

    #[error("Too many {what} for a 32-bit count: {count}")]
    CountOverflow { what: &'static str, count: usize },

    #[error("Unknown channel id {0}")]
    UnknownChannel(usize),

    #[error("Data for channel {0} was already written")]
    DuplicateChannelData(usize),

    #[error("Channel {id} declared {expected} samples, got {actual}")]
    SampleCountMismatch { id: usize, expected: u32, actual: usize },

    #[error("Sample {index} does not match channel datatype {datatype:?}")]
    SampleTypeMismatch { index: usize, datatype: Datatype },

    #[error("Channel {0} has no sample data")]
    MissingChannelData(usize),

    #[error("No header was written")]
    MissingHeader,

    #[error("No channels were written")]
    NoChannels,
}

/// Result type for `.ld` operations
pub type I2Result<T> = std::result::Result<T, I2Error>;
