//! Channel datatypes and raw samples.

use crate::error::{I2Error, I2Result};
use crate::structs::Channel;
use serde::{Deserialize, Serialize};

/// Storage type of a channel's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datatype {
    /// Beacon channels; stored as plain integers of the same width.
    Beacon16,
    Beacon32,

    I16,
    I32,

    F16,
    F32,

    /// Written by some third-party exporters on channels with no samples.
    Invalid,
}

impl Datatype {
    /// Size in bytes of one sample on file.
    pub fn size(&self) -> u16 {
        match self {
            Datatype::Beacon16 | Datatype::I16 | Datatype::F16 => 2,
            Datatype::Beacon32 | Datatype::I32 | Datatype::F32 => 4,
            Datatype::Invalid => 0,
        }
    }

    /// Type id written to the channel block, `None` for [`Datatype::Invalid`].
    pub fn type_id(&self) -> Option<u16> {
        match self {
            Datatype::Beacon16 | Datatype::Beacon32 => Some(0),
            Datatype::I16 | Datatype::I32 => Some(3),
            Datatype::F16 | Datatype::F32 => Some(7),
            Datatype::Invalid => None,
        }
    }

    pub fn from_type_and_size(type_id: u16, size: u16) -> I2Result<Self> {
        match (type_id, size) {
            (0, 2) => Ok(Datatype::Beacon16),
            (0, 4) => Ok(Datatype::Beacon32),
            (3, 2) | (5, 2) => Ok(Datatype::I16),
            (3, 4) | (5, 4) => Ok(Datatype::I32),
            (7, 2) => Ok(Datatype::F16),
            (7, 4) => Ok(Datatype::F32),

            // iRacing exporter artefacts, always on zero-sample channels
            (17536, 5) | (6566, 5) | (29813, 5) | (0, 5) | (15, 5) => Ok(Datatype::Invalid),

            _ => Err(I2Error::UnrecognizedDatatype { type_id, size }),
        }
    }

    /// Whether `sample` is stored with this datatype.
    pub fn accepts(&self, sample: &Sample) -> bool {
        matches!(
            (self, sample),
            (Datatype::Beacon16 | Datatype::I16, Sample::I16(_))
                | (Datatype::Beacon32 | Datatype::I32, Sample::I32(_))
                | (Datatype::F16, Sample::F16(_))
                | (Datatype::F32, Sample::F32(_))
        )
    }
}

/// One raw sample as stored on file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Sample {
    I16(i16),
    I32(i32),
    /// IEEE 754 half precision, kept as raw bits.
    F16(u16),
    F32(f32),
}

impl Sample {
    /// Raw stored value, before channel scaling.
    pub fn raw_f64(&self) -> f64 {
        match self {
            Sample::I16(v) => *v as f64,
            Sample::I32(v) => *v as f64,
            Sample::F16(bits) => f16_to_f32(*bits) as f64,
            Sample::F32(v) => *v as f64,
        }
    }

    /// Physical value of this sample for `channel`.
    ///
    /// `(raw / scale * 10^-dec_places + offset) * mul`
    pub fn decode_f64(&self, channel: &Channel) -> f64 {
        let scale = if channel.scale == 0 {
            1.0
        } else {
            channel.scale as f64
        };
        let value = self.raw_f64() / scale;
        let value = value * 10.0f64.powi(-(channel.dec_places as i32));
        (value + channel.offset as f64) * channel.mul as f64
    }
}

fn f16_to_f32(bits: u16) -> f32 {
    let sign = ((bits >> 15) & 0x1) as u32;
    let exp = ((bits >> 10) & 0x1F) as u32;
    let frac = (bits & 0x3FF) as u32;

    let out = match (exp, frac) {
        (0, 0) => sign << 31,
        (0, _) => {
            // subnormal: frac * 2^-24
            let v = frac as f32 * 2.0f32.powi(-24);
            return if sign == 1 { -v } else { v };
        }
        (0x1F, 0) => (sign << 31) | 0x7F80_0000,
        (0x1F, _) => (sign << 31) | 0x7FC0_0000 | (frac << 13),
        _ => (sign << 31) | ((exp + 112) << 23) | (frac << 13),
    };
    f32::from_bits(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(mul: u16, scale: u16, dec_places: i16, offset: u16) -> Channel {
        Channel {
            datatype: Datatype::I16,
            sample_rate: 2,
            offset,
            mul,
            scale,
            dec_places,
            name: "Air Temp Inlet".to_string(),
            short_name: "Air Tem".to_string(),
            unit: "C".to_string(),
        }
    }

    #[test]
    fn test_known_datatypes() {
        assert_eq!(Datatype::from_type_and_size(3, 2).unwrap(), Datatype::I16);
        assert_eq!(Datatype::from_type_and_size(5, 4).unwrap(), Datatype::I32);
        assert_eq!(Datatype::from_type_and_size(0, 2).unwrap(), Datatype::Beacon16);
        assert_eq!(Datatype::from_type_and_size(7, 2).unwrap(), Datatype::F16);
        assert_eq!(Datatype::from_type_and_size(7, 4).unwrap(), Datatype::F32);
        assert_eq!(
            Datatype::from_type_and_size(17536, 5).unwrap(),
            Datatype::Invalid
        );
    }

    #[test]
    fn test_unrecognized_datatype() {
        let err = Datatype::from_type_and_size(9, 8).unwrap_err();
        assert!(matches!(
            err,
            I2Error::UnrecognizedDatatype {
                type_id: 9,
                size: 8
            }
        ));
    }

    #[test]
    fn test_type_id_round_trips_through_from_type_and_size() {
        for dt in [
            Datatype::Beacon16,
            Datatype::Beacon32,
            Datatype::I16,
            Datatype::I32,
            Datatype::F16,
            Datatype::F32,
        ] {
            let id = dt.type_id().unwrap();
            assert_eq!(Datatype::from_type_and_size(id, dt.size()).unwrap(), dt);
        }
        assert_eq!(Datatype::Invalid.type_id(), None);
    }

    #[test]
    fn test_accepts() {
        assert!(Datatype::I16.accepts(&Sample::I16(1)));
        assert!(Datatype::Beacon32.accepts(&Sample::I32(1)));
        assert!(!Datatype::I16.accepts(&Sample::I32(1)));
        assert!(!Datatype::Invalid.accepts(&Sample::F32(1.0)));
    }

    #[test]
    fn test_decode_with_decimal_places() {
        let ch = channel(1, 1, 1, 0);
        assert!((Sample::I16(199).decode_f64(&ch) - 19.9).abs() < 1e-9);
        assert!((Sample::I16(201).decode_f64(&ch) - 20.1).abs() < 1e-9);
    }

    #[test]
    fn test_decode_with_offset_and_mul() {
        let ch = channel(2, 2, 0, 3);
        // (10 / 2 + 3) * 2
        assert!((Sample::I32(10).decode_f64(&ch) - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_f16_decoding() {
        assert_eq!(f16_to_f32(0x3C00), 1.0);
        assert_eq!(f16_to_f32(0xC000), -2.0);
        assert_eq!(f16_to_f32(0x3555), 0.333_251_95);
        assert_eq!(f16_to_f32(0x0000), 0.0);
        assert!(f16_to_f32(0x7C00).is_infinite());
        assert!(f16_to_f32(0x7E00).is_nan());
        assert_eq!(f16_to_f32(0x0001), 2.0f32.powi(-24));
    }
}
