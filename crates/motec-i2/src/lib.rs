//! motec-i2 - MoTeC i2 `.ld` log files
//!
//! Reads and writes the binary telemetry logs produced by MoTeC data loggers
//! and consumed by the i2 analysis software:
//! - `LDReader`: header, event/venue/vehicle blocks, channel list and samples
//! - `LDWriter`: builds a file section by section and patches the pointers
//!
//! All values are little-endian. Pointers are absolute file offsets; a zero
//! pointer means the block is absent.

pub mod addr;
pub mod datatype;
pub mod error;
pub mod reader;
pub mod structs;
pub mod writer;

pub use addr::FileAddr;
pub use datatype::{Datatype, Sample};
pub use error::{I2Error, I2Result};
pub use reader::LDReader;
pub use structs::{Channel, Event, FileChannel, Header, Vehicle, Venue};
pub use writer::{ChannelId, LDWriter};
