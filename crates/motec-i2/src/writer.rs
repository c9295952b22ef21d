//! Encoding of `.ld` files.
//!
//! The writer lays a file out front to back:
//!
//! ```text
//! header | event | venue | vehicle | channel block | samples | channel block | ...
//! ```
//!
//! Pointers that depend on later sections (first channel, first data block,
//! next-channel links) are patched in place once the target is written, so the
//! sink must support seeking.

use crate::addr::FileAddr;
use crate::datatype::{Datatype, Sample};
use crate::error::{I2Error, I2Result};
use crate::structs::{Channel, Event, FileChannel, Header, Vehicle, Venue};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{Seek, SeekFrom, Write};

/// Handle returned by [`LDWriter::write_channel`], used to attach the samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelId {
    id: usize,
}

impl ChannelId {
    pub fn index(&self) -> usize {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Empty,
    Header,
    Event,
    Channels,
}

/// Counts are stored as `u32` in the file.
fn count_u32(what: &'static str, count: usize) -> I2Result<u32> {
    u32::try_from(count).map_err(|_| I2Error::CountOverflow { what, count })
}

#[derive(Debug)]
struct WrittenChannel {
    addr: FileAddr,
    samples: u32,
    datatype: Datatype,
    data_written: bool,
}

#[derive(Debug)]
pub struct LDWriter<'a, S: Write + Seek> {
    sink: &'a mut S,
    stage: Stage,
    channels: Vec<WrittenChannel>,
    data_blocks: Vec<FileAddr>,
    write_pos: FileAddr,
}

impl<'a, S: Write + Seek> LDWriter<'a, S> {
    pub fn new(sink: &'a mut S) -> Self {
        Self {
            sink,
            stage: Stage::Empty,
            channels: Vec::new(),
            data_blocks: Vec::new(),
            write_pos: FileAddr::zero(),
        }
    }

    /// Writes the header at offset 0. Must be the first write.
    pub fn write_header(&mut self, hdr: &Header) -> I2Result<()> {
        if self.stage != Stage::Empty {
            return Err(I2Error::WriteOrder("header must be written first"));
        }

        self.sink.seek(SeekFrom::Start(0))?;
        self.sink.write_u32::<LittleEndian>(Header::MARKER)?;
        self.sink.write_u32::<LittleEndian>(0)?;

        // Patched by `finish`
        self.sink.write_u32::<LittleEndian>(0)?; // channel metadata
        self.sink.write_u32::<LittleEndian>(0)?; // channel data

        self.sink.write_all(&[0u8; 20])?;
        // Patched by `write_event`
        self.sink.write_u32::<LittleEndian>(0)?;
        self.sink.write_all(&[0u8; 24])?;

        self.sink.write_u16::<LittleEndian>(0x0000)?;
        self.sink.write_u16::<LittleEndian>(0x4240)?;
        self.sink.write_u16::<LittleEndian>(0x000F)?;

        self.sink.write_u32::<LittleEndian>(hdr.device_serial)?;
        self.write_string(8, &hdr.device_type)?;
        self.sink.write_u16::<LittleEndian>(hdr.device_version)?;
        self.sink.write_u16::<LittleEndian>(0x0080)?;

        self.sink.write_u32::<LittleEndian>(hdr.num_channels)?;
        self.sink.write_u32::<LittleEndian>(0x0001_0064)?;

        self.write_string(16, &hdr.date_string)?;
        self.write_string(16, "")?;
        self.write_string(16, &hdr.time_string)?;
        self.write_string(16, "")?;

        self.write_string(64, &hdr.driver)?;
        self.write_string(64, &hdr.vehicleid)?;
        self.write_string(64, "")?;
        self.write_string(64, &hdr.venue)?;
        self.write_string(64, "")?;

        // i2 refuses the file if this region holds text
        self.sink.write_all(&[0u8; 1024])?;

        self.sink.write_u32::<LittleEndian>(hdr.pro_logging)?;
        self.sink.write_u16::<LittleEndian>(0)?;

        self.write_string(64, &hdr.session)?;
        self.write_string(64, &hdr.short_comment)?;

        self.sink.write_all(&[0u8; 8])?;
        self.sink.write_u8(99)?;
        self.sink.write_all(&[0u8; 117])?;

        self.write_pos = FileAddr::from(Header::SIZE);
        self.stage = Stage::Header;
        Ok(())
    }

    /// Writes the event block and, optionally, the venue and vehicle it links to.
    ///
    /// Only valid directly after the header.
    pub fn write_event(
        &mut self,
        event: &Event,
        venue: Option<&Venue>,
        vehicle: Option<&Vehicle>,
    ) -> I2Result<()> {
        if self.stage != Stage::Header {
            return Err(I2Error::WriteOrder(
                "event must follow the header and precede the channels",
            ));
        }
        if venue.is_none() && vehicle.is_some() {
            return Err(I2Error::WriteOrder("a vehicle requires a venue"));
        }

        let event_addr = self.write_pos;
        self.sink.seek(event_addr.seek())?;
        self.write_string(64, &event.name)?;
        self.write_string(64, &event.session)?;
        self.write_string(1024, &event.comment)?;
        self.sink.write_u16::<LittleEndian>(0)?;
        let mut end = event_addr.offset(Event::SIZE)?;

        self.sink.seek(SeekFrom::Start(Header::EVENT_OFFSET))?;
        self.sink.write_u32::<LittleEndian>(event_addr.into())?;

        if let Some(venue) = venue {
            let venue_addr = end;
            self.sink.seek(venue_addr.seek())?;
            self.write_string(64, &venue.name)?;
            self.sink.write_all(&[0u8; 1034])?;
            self.sink.write_u16::<LittleEndian>(0)?;
            end = venue_addr.offset(Venue::SIZE)?;

            self.sink
                .seek(event_addr.offset(Event::VENUE_ADDR_OFFSET)?.seek())?;
            self.sink.write_u16::<LittleEndian>(venue_addr.as_u16()?)?;

            if let Some(vehicle) = vehicle {
                let vehicle_addr = end;
                self.sink.seek(vehicle_addr.seek())?;
                self.write_string(64, &vehicle.id)?;
                self.sink.write_all(&[0u8; 128])?;
                self.sink.write_u32::<LittleEndian>(vehicle.weight)?;
                self.write_string(32, &vehicle.vehicle_type)?;
                self.write_string(32, &vehicle.comment)?;
                end = vehicle_addr.offset(Vehicle::SIZE)?;

                self.sink
                    .seek(venue_addr.offset(Venue::VEHICLE_ADDR_OFFSET)?.seek())?;
                self.sink.write_u16::<LittleEndian>(vehicle_addr.as_u16()?)?;
            }
        }

        self.write_pos = end;
        self.stage = Stage::Event;
        Ok(())
    }

    /// Writes a channel metadata block and links it after the previous channel.
    ///
    /// `data` is only used for its length; the samples are written by
    /// [`LDWriter::write_channel_data`].
    pub fn write_channel(&mut self, channel: &Channel, data: &[Sample]) -> I2Result<ChannelId> {
        if self.stage == Stage::Empty {
            return Err(I2Error::WriteOrder("channels must follow the header"));
        }
        if channel.datatype.type_id().is_none() {
            return Err(I2Error::UnwritableDatatype(channel.datatype));
        }
        let samples = count_u32("samples", data.len())?;

        let channel_addr = self.write_pos;
        let prev_addr = self.channels.last().map(|c| c.addr);

        let file_channel = FileChannel {
            prev_addr: prev_addr.unwrap_or_default(),
            next_addr: FileAddr::zero(),
            data_addr: FileAddr::zero(),
            samples,
            channel: channel.clone(),
        };

        self.sink.seek(channel_addr.seek())?;
        self.write_file_channel(&file_channel)?;

        if let Some(prev_addr) = prev_addr {
            self.sink
                .seek(prev_addr.offset(FileChannel::NEXT_ADDR_OFFSET)?.seek())?;
            self.sink.write_u32::<LittleEndian>(channel_addr.into())?;
        }

        let id = ChannelId {
            id: self.channels.len(),
        };
        self.channels.push(WrittenChannel {
            addr: channel_addr,
            samples,
            datatype: channel.datatype,
            data_written: false,
        });

        self.write_pos = channel_addr.offset(FileChannel::ENTRY_SIZE)?;
        self.stage = Stage::Channels;
        Ok(id)
    }

    fn write_file_channel(&mut self, fc: &FileChannel) -> I2Result<()> {
        let type_id = fc
            .channel
            .datatype
            .type_id()
            .ok_or(I2Error::UnwritableDatatype(fc.channel.datatype))?;

        self.sink.write_u32::<LittleEndian>(fc.prev_addr.into())?;
        self.sink.write_u32::<LittleEndian>(fc.next_addr.into())?;
        self.sink.write_u32::<LittleEndian>(fc.data_addr.into())?;
        self.sink.write_u32::<LittleEndian>(fc.samples)?;

        self.sink.write_u16::<LittleEndian>(4)?;

        self.sink.write_u16::<LittleEndian>(type_id)?;
        self.sink
            .write_u16::<LittleEndian>(fc.channel.datatype.size())?;
        self.sink.write_u16::<LittleEndian>(fc.channel.sample_rate)?;

        self.sink.write_u16::<LittleEndian>(fc.channel.offset)?;
        self.sink.write_u16::<LittleEndian>(fc.channel.mul)?;
        self.sink.write_u16::<LittleEndian>(fc.channel.scale)?;
        self.sink.write_i16::<LittleEndian>(fc.channel.dec_places)?;

        self.write_string(32, &fc.channel.name)?;
        self.write_string(8, &fc.channel.short_name)?;
        self.write_string(12, &fc.channel.unit)?;

        self.sink.write_u8(0xC9)?;
        self.sink.write_all(&[0u8; 39])?;
        Ok(())
    }

    /// Writes the samples of `channel` at the current position and points the
    /// channel block at them.
    pub fn write_channel_data(&mut self, channel: ChannelId, samples: &[Sample]) -> I2Result<()> {
        let written = self
            .channels
            .get(channel.id)
            .ok_or(I2Error::UnknownChannel(channel.id))?;
        if written.data_written {
            return Err(I2Error::DuplicateChannelData(channel.id));
        }
        if written.samples as usize != samples.len() {
            return Err(I2Error::SampleCountMismatch {
                id: channel.id,
                expected: written.samples,
                actual: samples.len(),
            });
        }
        if let Some(index) = samples.iter().position(|s| !written.datatype.accepts(s)) {
            return Err(I2Error::SampleTypeMismatch {
                index,
                datatype: written.datatype,
            });
        }

        let channel_addr = written.addr;
        let data_size = written.samples as u64 * written.datatype.size() as u64;
        let data_size = u32::try_from(data_size).map_err(|_| I2Error::AddressOverflow {
            base: self.write_pos,
            by: u32::MAX,
            width: 32,
        })?;
        let data_addr = self.write_pos;
        let end = data_addr.offset(data_size)?;

        self.sink.seek(data_addr.seek())?;
        self.write_samples(samples)?;

        self.sink
            .seek(channel_addr.offset(FileChannel::DATA_ADDR_OFFSET)?.seek())?;
        self.sink.write_u32::<LittleEndian>(data_addr.into())?;

        self.channels[channel.id].data_written = true;
        self.data_blocks.push(data_addr);
        self.write_pos = end;
        Ok(())
    }

    fn write_samples(&mut self, samples: &[Sample]) -> I2Result<()> {
        for s in samples {
            match s {
                Sample::I16(v) => self.sink.write_i16::<LittleEndian>(*v)?,
                Sample::I32(v) => self.sink.write_i32::<LittleEndian>(*v)?,
                Sample::F16(bits) => self.sink.write_u16::<LittleEndian>(*bits)?,
                Sample::F32(v) => self.sink.write_f32::<LittleEndian>(*v)?,
            }
        }
        Ok(())
    }

    /// Patches the header pointers and channel count, then flushes the sink.
    pub fn finish(self) -> I2Result<()> {
        if self.stage == Stage::Empty {
            return Err(I2Error::MissingHeader);
        }
        if let Some(missing) = self.channels.iter().position(|c| !c.data_written) {
            return Err(I2Error::MissingChannelData(missing));
        }

        let meta_addr = self.channels.iter().map(|c| c.addr).min();
        let data_addr = self.data_blocks.iter().min().copied();
        let (Some(meta_addr), Some(data_addr)) = (meta_addr, data_addr) else {
            return Err(I2Error::NoChannels);
        };

        self.sink
            .seek(SeekFrom::Start(Header::CHANNEL_META_OFFSET))?;
        self.sink.write_u32::<LittleEndian>(meta_addr.into())?;

        self.sink
            .seek(SeekFrom::Start(Header::CHANNEL_DATA_OFFSET))?;
        self.sink.write_u32::<LittleEndian>(data_addr.into())?;

        self.sink
            .seek(SeekFrom::Start(Header::NUM_CHANNELS_OFFSET))?;
        let num_channels = count_u32("channels", self.channels.len())?;
        self.sink.write_u32::<LittleEndian>(num_channels)?;

        self.sink.flush()?;
        Ok(())
    }

    /// Writes `string` into a NUL padded field of `max_len` bytes, truncating
    /// on a character boundary.
    pub(crate) fn write_string(&mut self, max_len: usize, string: &str) -> I2Result<()> {
        let mut len = string.len().min(max_len);
        while !string.is_char_boundary(len) {
            len -= 1;
        }
        self.sink.write_all(&string.as_bytes()[..len])?;
        self.sink.write_all(&vec![0u8; max_len - len])?;
        Ok(())
    }
}
