//! Dumps the contents of an `.ld` file.
//!
//! Usage: `cargo run --example read [path/to/file.ld]`
//!
//! Without a path a short session is generated in memory and read back.

use anyhow::{Context, Result};
use motec_i2::{Channel, Datatype, Event, Header, LDReader, LDWriter, Sample, Vehicle, Venue};
use std::env;
use std::fs::File;
use std::io::{Cursor, Read, Seek};

fn main() -> Result<()> {
    match env::args().nth(1) {
        Some(path) => {
            println!("Reading file: {}", path);
            let mut file = File::open(&path).with_context(|| format!("Failed to open {}", path))?;
            dump(&mut file)
        }
        None => {
            println!("No file given, reading a generated session");
            let mut cursor = Cursor::new(generated_session()?);
            dump(&mut cursor)
        }
    }
}

fn dump<S: Read + Seek>(source: &mut S) -> Result<()> {
    let mut reader = LDReader::new(source);

    let header = reader.read_header().context("Failed to read header")?;
    println!("Header: {:#?}", header);

    println!("Event: {:#?}", reader.read_event()?);
    println!("Venue: {:#?}", reader.read_venue()?);
    println!("Vehicle: {:#?}", reader.read_vehicle()?);

    let channels = reader.read_channels().context("Failed to read channels")?;
    println!("File has {} channels", channels.len());

    let Some(channel) = channels.first() else {
        return Ok(());
    };
    println!(
        "Reading channel 0: {} ({} samples at {} Hz)",
        channel.channel.name, channel.samples, channel.channel.sample_rate
    );

    let data = reader.channel_data(channel)?;
    for (i, sample) in data.iter().take(6).enumerate() {
        let value = sample.decode_f64(&channel.channel);
        println!(
            "[{}]: {:.1} {} - (Raw Sample: {:?})",
            i, value, channel.channel.unit, sample
        );
    }

    Ok(())
}

fn generated_session() -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = LDWriter::new(&mut cursor);

    writer.write_header(&Header {
        device_serial: 12007,
        device_type: "ADL".to_string(),
        device_version: 420,
        num_channels: 2,
        date_string: "23/11/2005".to_string(),
        time_string: "09:53:00".to_string(),
        driver: "".to_string(),
        vehicleid: "11A".to_string(),
        venue: "Calder".to_string(),
        session: "2".to_string(),
        short_comment: "second warmup".to_string(),
        pro_logging: Header::DEFAULT_PRO_LOGGING,
    })?;
    writer.write_event(
        &Event {
            name: "i2 data day".to_string(),
            session: "2".to_string(),
            comment: "Calder Park, 23/11/05, fine sunny day".to_string(),
        },
        Some(&Venue {
            name: "Calder".to_string(),
        }),
        Some(&Vehicle {
            id: "11A".to_string(),
            weight: 0,
            vehicle_type: "Car".to_string(),
            comment: "".to_string(),
        }),
    )?;

    let air_temp = Channel {
        datatype: Datatype::I16,
        sample_rate: 2,
        offset: 0,
        mul: 1,
        scale: 1,
        dec_places: 1,
        name: "Air Temp Inlet".to_string(),
        short_name: "Air Tem".to_string(),
        unit: "C".to_string(),
    };
    let air_temp_data: Vec<Sample> = [199, 199, 201, 199, 199, 200, 202, 203]
        .into_iter()
        .map(Sample::I16)
        .collect();

    let speed = Channel {
        datatype: Datatype::F32,
        sample_rate: 20,
        offset: 0,
        mul: 1,
        scale: 1,
        dec_places: 0,
        name: "Ground Speed".to_string(),
        short_name: "Gnd Spd".to_string(),
        unit: "km/h".to_string(),
    };
    let speed_data: Vec<Sample> = (0..40).map(|i| Sample::F32(i as f32 * 2.5)).collect();

    let air_temp_id = writer.write_channel(&air_temp, &air_temp_data)?;
    writer.write_channel_data(air_temp_id, &air_temp_data)?;
    let speed_id = writer.write_channel(&speed, &speed_data)?;
    writer.write_channel_data(speed_id, &speed_data)?;

    writer.finish()?;
    Ok(cursor.into_inner())
}
