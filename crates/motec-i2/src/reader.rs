//! Decoding of `.ld` files.

use crate::addr::FileAddr;
use crate::datatype::{Datatype, Sample};
use crate::error::{I2Error, I2Result};
use crate::structs::{Channel, Event, FileChannel, Header, Vehicle, Venue};
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

/// Upper bound on the sample buffer reserved up front; the count comes from the file.
const MAX_PREALLOCATED_SAMPLES: usize = 1 << 20;

/// Pointers to the top-level structures of a file.
#[derive(Debug, Clone, PartialEq)]
struct AddressTable {
    channel_meta: FileAddr,
    channel_data: FileAddr,
    event: Option<FileAddr>,
    venue: Option<FileAddr>,
    vehicle: Option<FileAddr>,
}

#[derive(Debug)]
pub struct LDReader<'a, S: Read + Seek> {
    source: &'a mut S,
    address_table: Option<AddressTable>,
}

impl<'a, S: Read + Seek> LDReader<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        Self {
            source,
            address_table: None,
        }
    }

    /// Resolves the pointer chain header -> event -> venue -> vehicle once and caches it.
    fn address_table(&mut self) -> I2Result<AddressTable> {
        if let Some(table) = &self.address_table {
            return Ok(table.clone());
        }

        self.source
            .seek(SeekFrom::Start(Header::CHANNEL_META_OFFSET))?;
        let channel_meta = FileAddr::from(self.source.read_u32::<LittleEndian>()?);

        self.source
            .seek(SeekFrom::Start(Header::CHANNEL_DATA_OFFSET))?;
        let channel_data = FileAddr::from(self.source.read_u32::<LittleEndian>()?);

        self.source.seek(SeekFrom::Start(Header::EVENT_OFFSET))?;
        let event = non_zero(FileAddr::from(self.source.read_u32::<LittleEndian>()?));

        let venue = match event {
            Some(event_addr) => {
                self.read_u16_pointer(event_addr.offset(Event::VENUE_ADDR_OFFSET)?)?
            }
            None => None,
        };

        let vehicle = match venue {
            Some(venue_addr) => {
                self.read_u16_pointer(venue_addr.offset(Venue::VEHICLE_ADDR_OFFSET)?)?
            }
            None => None,
        };

        let table = AddressTable {
            channel_meta,
            channel_data,
            event,
            venue,
            vehicle,
        };
        self.address_table = Some(table.clone());
        Ok(table)
    }

    fn read_u16_pointer(&mut self, at: FileAddr) -> I2Result<Option<FileAddr>> {
        self.source.seek(at.seek())?;
        Ok(non_zero(FileAddr::from(
            self.source.read_u16::<LittleEndian>()?,
        )))
    }

    pub fn read_header(&mut self) -> I2Result<Header> {
        self.source.seek(SeekFrom::Start(0))?;

        let marker = self.source.read_u32::<LittleEndian>()?;
        if marker != Header::MARKER {
            return Err(I2Error::InvalidHeaderMarker {
                found: marker,
                expected: Header::MARKER,
            });
        }

        // Pointers are resolved by `address_table`; constants are not validated.
        self.skip(0x46 - 4)?;

        let device_serial = self.source.read_u32::<LittleEndian>()?;
        let device_type = self.read_string(8)?;
        let device_version = self.source.read_u16::<LittleEndian>()?;
        self.skip(2)?;

        let num_channels = self.source.read_u32::<LittleEndian>()?;
        self.skip(4)?;

        let date_string = self.read_string(16)?;
        self.skip(16)?;
        let time_string = self.read_string(16)?;
        self.skip(16)?;

        let driver = self.read_string(64)?;
        let vehicleid = self.read_string(64)?;
        self.skip(64)?;
        let venue = self.read_string(64)?;
        self.skip(64)?;

        self.skip(1024)?;

        let pro_logging = self.source.read_u32::<LittleEndian>()?;
        self.skip(2)?;

        let session = self.read_string(64)?;
        let short_comment = self.read_string(64)?;

        Ok(Header {
            device_serial,
            device_type,
            device_version,
            num_channels,
            date_string,
            time_string,
            driver,
            vehicleid,
            venue,
            session,
            short_comment,
            pro_logging,
        })
    }

    pub fn read_event(&mut self) -> I2Result<Option<Event>> {
        let Some(addr) = self.address_table()?.event else {
            return Ok(None);
        };
        self.source.seek(addr.seek())?;

        let name = self.read_string(64)?;
        let session = self.read_string(64)?;
        let comment = self.read_string(1024)?;

        Ok(Some(Event {
            name,
            session,
            comment,
        }))
    }

    pub fn read_venue(&mut self) -> I2Result<Option<Venue>> {
        let Some(addr) = self.address_table()?.venue else {
            return Ok(None);
        };
        self.source.seek(addr.seek())?;

        let name = self.read_string(64)?;
        Ok(Some(Venue { name }))
    }

    pub fn read_vehicle(&mut self) -> I2Result<Option<Vehicle>> {
        let Some(addr) = self.address_table()?.vehicle else {
            return Ok(None);
        };
        self.source.seek(addr.seek())?;

        let id = self.read_string(64)?;
        self.skip(128)?;
        let weight = self.source.read_u32::<LittleEndian>()?;
        let vehicle_type = self.read_string(32)?;
        let comment = self.read_string(32)?;

        Ok(Some(Vehicle {
            id,
            weight,
            vehicle_type,
            comment,
        }))
    }

    /// Follows the channel metadata list from the header's first pointer.
    pub fn read_channels(&mut self) -> I2Result<Vec<FileChannel>> {
        let mut next = self.address_table()?.channel_meta;
        let mut seen = HashSet::new();
        let mut channels = vec![];

        while !next.is_zero() {
            if !seen.insert(next) {
                return Err(I2Error::ChannelListCycle { addr: next });
            }
            let channel = self.read_file_channel(next)?;
            next = channel.next_addr;
            channels.push(channel);
        }

        Ok(channels)
    }

    fn read_file_channel(&mut self, addr: FileAddr) -> I2Result<FileChannel> {
        self.source.seek(addr.seek())?;

        let prev_addr = FileAddr::from(self.source.read_u32::<LittleEndian>()?);
        let next_addr = FileAddr::from(self.source.read_u32::<LittleEndian>()?);
        let data_addr = FileAddr::from(self.source.read_u32::<LittleEndian>()?);
        let samples = self.source.read_u32::<LittleEndian>()?;

        self.skip(2)?;

        let type_id = self.source.read_u16::<LittleEndian>()?;
        let size = self.source.read_u16::<LittleEndian>()?;
        let datatype = Datatype::from_type_and_size(type_id, size)?;

        let sample_rate = self.source.read_u16::<LittleEndian>()?;
        let offset = self.source.read_u16::<LittleEndian>()?;
        let mul = self.source.read_u16::<LittleEndian>()?;
        let scale = self.source.read_u16::<LittleEndian>()?;
        let dec_places = self.source.read_i16::<LittleEndian>()?;

        let name = self.read_string(32)?;
        let short_name = self.read_string(8)?;
        let unit = self.read_string(12)?;

        Ok(FileChannel {
            prev_addr,
            next_addr,
            data_addr,
            samples,
            channel: Channel {
                datatype,
                sample_rate,
                offset,
                mul,
                scale,
                dec_places,
                name,
                short_name,
                unit,
            },
        })
    }

    /// Reads every sample of `channel`.
    pub fn channel_data(&mut self, channel: &FileChannel) -> I2Result<Vec<Sample>> {
        if channel.samples == 0 {
            return Ok(vec![]);
        }
        self.source.seek(channel.data_addr.seek())?;

        let count = channel.samples as usize;
        let mut data = Vec::with_capacity(count.min(MAX_PREALLOCATED_SAMPLES));
        for _ in 0..count {
            let sample = match channel.channel.datatype {
                Datatype::Beacon16 | Datatype::I16 => {
                    Sample::I16(self.source.read_i16::<LittleEndian>()?)
                }
                Datatype::Beacon32 | Datatype::I32 => {
                    Sample::I32(self.source.read_i32::<LittleEndian>()?)
                }
                Datatype::F16 => Sample::F16(self.source.read_u16::<LittleEndian>()?),
                Datatype::F32 => Sample::F32(self.source.read_f32::<LittleEndian>()?),
                Datatype::Invalid => {
                    return Err(I2Error::UnreadableChannel {
                        channel: channel.channel.name.clone(),
                    })
                }
            };
            data.push(sample);
        }

        Ok(data)
    }

    fn skip(&mut self, bytes: i64) -> I2Result<()> {
        self.source.seek(SeekFrom::Current(bytes))?;
        Ok(())
    }

    /// Reads a fixed-size, NUL padded string field.
    fn read_string(&mut self, size: usize) -> I2Result<String> {
        let mut bytes = vec![0u8; size];
        self.source.read_exact(&mut bytes)?;
        let len = bytes.iter().position(|c| *c == 0).unwrap_or(size);
        Ok(String::from_utf8_lossy(&bytes[..len]).into_owned())
    }
}

fn non_zero(addr: FileAddr) -> Option<FileAddr> {
    if addr.is_zero() {
        None
    } else {
        Some(addr)
    }
}
