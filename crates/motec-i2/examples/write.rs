//! Writes a one channel session to disk and checks that it reads back.
//!
//! Usage: `cargo run --example write [output.ld]`

use anyhow::{bail, Context, Result};
use motec_i2::{Channel, Datatype, Header, LDReader, LDWriter, Sample};
use std::env;
use std::fs::File;

fn main() -> Result<()> {
    let filename = env::args().nth(1).unwrap_or_else(|| "test_write.ld".to_string());
    println!("Writing file: {}", filename);

    let channel0 = Channel {
        datatype: Datatype::I16,
        sample_rate: 2,
        offset: 2,
        mul: 1,
        scale: 1,
        dec_places: 1,
        name: "Air Temp Inlet".to_string(),
        short_name: "Air Tem".to_string(),
        unit: "C".to_string(),
    };
    let channel0_data: Vec<Sample> = [
        190, 190, 190, 190, 200, 200, 200, 200, 200, 200, 200, 200, 200, 190, 190, 190,
    ]
    .into_iter()
    .map(Sample::I16)
    .collect();

    {
        let mut file =
            File::create(&filename).with_context(|| format!("Failed to create {}", filename))?;
        let mut writer = LDWriter::new(&mut file);

        writer.write_header(&Header {
            device_serial: 12007,
            device_type: "ADL".to_string(),
            device_version: 420,
            num_channels: 1,
            date_string: "23/11/2005".to_string(),
            time_string: "09:53:00".to_string(),
            driver: "".to_string(),
            vehicleid: "11A".to_string(),
            venue: "Calder".to_string(),
            session: "2".to_string(),
            short_comment: "second warmup".to_string(),
            pro_logging: Header::DEFAULT_PRO_LOGGING,
        })?;

        let id = writer.write_channel(&channel0, &channel0_data)?;
        writer.write_channel_data(id, &channel0_data)?;
        writer.finish()?;
    }

    let mut file = File::open(&filename).with_context(|| format!("Failed to reopen {}", filename))?;
    let mut reader = LDReader::new(&mut file);
    let channels = reader.read_channels()?;
    let Some(channel) = channels.first() else {
        bail!("{} has no channels after writing", filename);
    };
    if channel.channel != channel0 || reader.channel_data(channel)? != channel0_data {
        bail!("{} does not read back as written", filename);
    }

    println!(
        "Wrote {} samples of '{}' to {}",
        channel0_data.len(),
        channel0.name,
        filename
    );
    Ok(())
}
