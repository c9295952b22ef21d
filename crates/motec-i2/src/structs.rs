//! Blocks stored in an `.ld` file and their on-disk layout constants.

use crate::addr::FileAddr;
use crate::datatype::Datatype;
use serde::{Deserialize, Serialize};

/// File header, always at offset 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Header {
    pub device_serial: u32,
    pub device_type: String,
    pub device_version: u16,

    /// Number of channels; `LDWriter::finish` overwrites it with the count actually written.
    pub num_channels: u32,

    pub date_string: String,
    pub time_string: String,

    pub driver: String,
    pub vehicleid: String,
    pub venue: String,
    pub session: String,
    pub short_comment: String,

    /// Pro logging flags, opaque to us.
    pub pro_logging: u32,
}

impl Header {
    pub const MARKER: u32 = 0x40;

    pub const CHANNEL_META_OFFSET: u64 = 0x08;
    pub const CHANNEL_DATA_OFFSET: u64 = 0x0C;
    pub const EVENT_OFFSET: u64 = 0x24;
    pub const NUM_CHANNELS_OFFSET: u64 = 0x56;

    /// Size of the header block; the event block follows directly.
    pub const SIZE: u32 = 0x6E2;

    /// Value found in every file produced by an ADL logger.
    pub const DEFAULT_PRO_LOGGING: u32 = 0xD2_0822;
}

/// Event block, pointed to from the header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub session: String,
    pub comment: String,
}

impl Event {
    pub const VENUE_ADDR_OFFSET: u32 = 1152;
    pub const SIZE: u32 = 1154;
}

/// Venue block, pointed to from the event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Venue {
    pub name: String,
}

impl Venue {
    pub const VEHICLE_ADDR_OFFSET: u32 = 1098;
    pub const SIZE: u32 = 1100;
}

/// Vehicle block, pointed to from the venue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    pub weight: u32,
    pub vehicle_type: String,
    pub comment: String,
}

impl Vehicle {
    pub const SIZE: u32 = 260;
}

/// Description of a channel, independent of where it lives in a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub datatype: Datatype,
    /// Sample rate in Hz
    pub sample_rate: u16,

    pub offset: u16,
    pub mul: u16,
    pub scale: u16,
    pub dec_places: i16,

    pub name: String,
    pub short_name: String,
    pub unit: String,
}

/// A channel metadata block as stored on file.
///
/// The blocks form a doubly linked list; the samples themselves live
/// contiguously at `data_addr`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileChannel {
    pub prev_addr: FileAddr,
    pub next_addr: FileAddr,
    pub data_addr: FileAddr,
    /// Number of samples at `data_addr`
    pub samples: u32,

    pub channel: Channel,
}

impl FileChannel {
    pub const NEXT_ADDR_OFFSET: u32 = 4;
    pub const DATA_ADDR_OFFSET: u32 = 8;
    pub const ENTRY_SIZE: u32 = 124;

    /// Size in bytes of this channel's sample block.
    pub fn data_size(&self) -> u64 {
        self.samples as u64 * self.channel.datatype.size() as u64
    }
}
