//! GeoPackage binary geometry encoding.
//!
//! cf. https://www.geopackage.org/spec140/index.html#gpb_format

use crate::envelope::{Envelope, envelope_from_geometry};
use crate::error::{GpkgError, Result};
use wkb::reader::Wkb;

const GPKG_MAGIC: [u8; 2] = [0x47, 0x50];
const HEADER_SIZE: usize = 8;

const FLAG_LITTLE_ENDIAN: u8 = 0b0000_0001;
const FLAG_ENVELOPE_MASK: u8 = 0b0000_1110;
const FLAG_EMPTY: u8 = 0b0001_0000;

/// Decoded fixed header of a GeoPackage geometry blob.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct GpkgGeometryHeader {
    pub srs_id: i32,
    pub envelope: Option<Envelope>,
    pub empty: bool,
    pub wkb_offset: usize,
}

pub(crate) fn parse_gpkg_geometry_header(b: &[u8]) -> Result<GpkgGeometryHeader> {
    if b.len() < HEADER_SIZE {
        return Err(GpkgError::InvalidGpkgGeometryLength {
            len: b.len(),
            minimum: HEADER_SIZE,
        });
    }
    if b[..2] != GPKG_MAGIC {
        return Err(GpkgError::InvalidGpkgGeometryMagic(u16::from_be_bytes([
            b[0], b[1],
        ])));
    }

    let flags = b[3];
    let envelope_size: usize = match flags & FLAG_ENVELOPE_MASK {
        0b00000000 => 0,  // no envelope
        0b00000010 => 32, // envelope is [minx, maxx, miny, maxy], 32 bytes
        0b00000100 => 48, // envelope is [minx, maxx, miny, maxy, minz, maxz], 48 bytes
        0b00000110 => 48, // envelope is [minx, maxx, miny, maxy, minm, maxm], 48 bytes
        0b00001000 => 64, // envelope is [minx, maxx, miny, maxy, minz, maxz, minm, maxm], 64 bytes
        _ => return Err(GpkgError::InvalidGpkgGeometryFlags(flags)),
    };
    let wkb_offset = HEADER_SIZE + envelope_size;
    if b.len() < wkb_offset {
        return Err(GpkgError::InvalidGpkgGeometryEnvelope {
            len: b.len(),
            required: wkb_offset,
        });
    }

    let little_endian = flags & FLAG_LITTLE_ENDIAN != 0;
    let srs_bytes = [b[4], b[5], b[6], b[7]];
    let srs_id = if little_endian {
        i32::from_le_bytes(srs_bytes)
    } else {
        i32::from_be_bytes(srs_bytes)
    };

    let values: Vec<f64> = b[HEADER_SIZE..wkb_offset]
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            if little_endian {
                f64::from_le_bytes(buf)
            } else {
                f64::from_be_bytes(buf)
            }
        })
        .collect();

    let envelope = match (flags & FLAG_ENVELOPE_MASK, values.as_slice()) {
        (0b00000010, [min_x, max_x, min_y, max_y]) => {
            Some(Envelope::new(*min_x, *max_x, *min_y, *max_y))
        }
        (0b00000100, [min_x, max_x, min_y, max_y, min_z, max_z]) => {
            Some(Envelope::new(*min_x, *max_x, *min_y, *max_y).with_z(*min_z, *max_z))
        }
        (0b00000110, [min_x, max_x, min_y, max_y, min_m, max_m]) => {
            Some(Envelope::new(*min_x, *max_x, *min_y, *max_y).with_m(*min_m, *max_m))
        }
        (0b00001000, [min_x, max_x, min_y, max_y, min_z, max_z, min_m, max_m]) => Some(
            Envelope::new(*min_x, *max_x, *min_y, *max_y)
                .with_z(*min_z, *max_z)
                .with_m(*min_m, *max_m),
        ),
        _ => None,
    };

    // Writers may fill the envelope of an empty geometry with NaN.
    let envelope = envelope.filter(|envelope| {
        [
            envelope.min_x,
            envelope.max_x,
            envelope.min_y,
            envelope.max_y,
        ]
        .iter()
        .all(|value| value.is_finite())
    });

    Ok(GpkgGeometryHeader {
        srs_id,
        envelope,
        empty: flags & FLAG_EMPTY != 0,
        wkb_offset,
    })
}

/// Strip GeoPackage header and envelope bytes to access raw WKB.
pub(crate) fn gpkg_geometry_to_wkb(b: &[u8]) -> Result<Wkb<'_>> {
    let header = parse_gpkg_geometry_header(b)?;
    Ok(Wkb::try_new(&b[header.wkb_offset..])?)
}

/// Envelope of a GeoPackage geometry blob.
///
/// The header envelope is used when the writer stored one; otherwise the WKB
/// is decoded and its coordinates are scanned. Empty geometries yield `None`.
pub(crate) fn gpkg_geometry_envelope(b: &[u8]) -> Result<Option<Envelope>> {
    let header = parse_gpkg_geometry_header(b)?;
    if header.empty {
        return Ok(None);
    }
    if header.envelope.is_some() {
        return Ok(header.envelope);
    }
    let wkb = Wkb::try_new(&b[header.wkb_offset..])?;
    Ok(envelope_from_geometry(&wkb))
}

/// Wrap WKB into a GeoPackage geometry blob.
///
/// The header carries the geometry's envelope (with Z and M when present) in
/// little endian, or the empty flag when the geometry has no coordinates.
pub(crate) fn wkb_to_gpkg_geometry(wkb: Wkb<'_>, srs_id: i32) -> Result<Vec<u8>> {
    let envelope = envelope_from_geometry(&wkb);

    let (envelope_flag, envelope_values) = match envelope {
        None => (FLAG_EMPTY, Vec::new()),
        Some(e) => {
            let mut values = vec![e.min_x, e.max_x, e.min_y, e.max_y];
            let flag = match (e.z, e.m) {
                (None, None) => 0b00000010,
                (Some(z), None) => {
                    values.extend([z.min, z.max]);
                    0b00000100
                }
                (None, Some(m)) => {
                    values.extend([m.min, m.max]);
                    0b00000110
                }
                (Some(z), Some(m)) => {
                    values.extend([z.min, z.max, m.min, m.max]);
                    0b00001000
                }
            };
            (flag, values)
        }
    };

    let mut geom = Vec::with_capacity(HEADER_SIZE + envelope_values.len() * 8 + wkb.buf().len());
    geom.extend_from_slice(&[
        GPKG_MAGIC[0],
        GPKG_MAGIC[1],
        0x00u8, // version
        FLAG_LITTLE_ENDIAN | envelope_flag,
    ]);
    geom.extend_from_slice(&srs_id.to_le_bytes());
    for value in envelope_values {
        geom.extend_from_slice(&value.to_le_bytes());
    }
    geom.extend_from_slice(wkb.buf());

    Ok(geom)
}

#[cfg(test)]
mod tests {
    use super::{
        gpkg_geometry_envelope, gpkg_geometry_to_wkb, parse_gpkg_geometry_header,
        wkb_to_gpkg_geometry,
    };
    use crate::Result;
    use crate::envelope::{Envelope, Interval};
    use crate::error::GpkgError;
    use geo_types::{LineString, Point};
    use std::str::FromStr;
    use wkb::reader::Wkb;
    use wkt::Wkt;

    fn wkb_bytes<G: geo_traits::GeometryTrait<T = f64>>(geometry: &G) -> Result<Vec<u8>> {
        let mut wkb = Vec::new();
        wkb::writer::write_geometry(&mut wkb, geometry, &Default::default())?;
        Ok(wkb)
    }

    #[test]
    fn gpkg_geometry_roundtrip() -> Result<()> {
        let bytes = wkb_bytes(&Point::new(3.0, -1.0))?;
        let gpkg_blob = wkb_to_gpkg_geometry(Wkb::try_new(&bytes)?, 4326)?;

        let header = parse_gpkg_geometry_header(&gpkg_blob)?;
        assert_eq!(header.srs_id, 4326);
        assert!(!header.empty);
        assert_eq!(header.envelope, Some(Envelope::from_point(3.0, -1.0)));

        let recovered = gpkg_geometry_to_wkb(&gpkg_blob)?;
        assert_eq!(recovered.buf(), bytes.as_slice());
        Ok(())
    }

    #[test]
    fn header_envelope_carries_z_and_m() -> Result<()> {
        let polygon = Wkt::<f64>::from_str("POLYGON ZM ((0 0 1 10, 2 0 2 11, 2 2 3 12, 0 0 1 10))")
            .expect("valid wkt");
        let bytes = wkb_bytes(&polygon)?;
        let blob = wkb_to_gpkg_geometry(Wkb::try_new(&bytes)?, 4326)?;

        let envelope = gpkg_geometry_envelope(&blob)?.expect("non-empty");
        assert_eq!(envelope.z, Some(Interval::new(1.0, 3.0)));
        assert_eq!(envelope.m, Some(Interval::new(10.0, 12.0)));
        Ok(())
    }

    #[test]
    fn envelope_is_computed_when_header_has_none() -> Result<()> {
        let line = LineString::from(vec![(0.0, 5.0), (-2.0, 1.0)]);
        let mut blob = vec![0x47, 0x50, 0x00, 0x01];
        blob.extend_from_slice(&4326_i32.to_le_bytes());
        blob.extend_from_slice(&wkb_bytes(&line)?);

        assert_eq!(parse_gpkg_geometry_header(&blob)?.envelope, None);
        assert_eq!(
            gpkg_geometry_envelope(&blob)?,
            Some(Envelope::new(-2.0, 0.0, 1.0, 5.0))
        );
        Ok(())
    }

    #[test]
    fn big_endian_header_is_decoded() -> Result<()> {
        let mut blob = vec![0x47, 0x50, 0x00, 0b0000_0010];
        blob.extend_from_slice(&3857_i32.to_be_bytes());
        for value in [1.0_f64, 2.0, 3.0, 4.0] {
            blob.extend_from_slice(&value.to_be_bytes());
        }
        blob.extend_from_slice(&wkb_bytes(&Point::new(1.5, 3.5))?);

        let header = parse_gpkg_geometry_header(&blob)?;
        assert_eq!(header.srs_id, 3857);
        assert_eq!(header.envelope, Some(Envelope::new(1.0, 2.0, 3.0, 4.0)));
        Ok(())
    }

    #[test]
    fn empty_geometry_sets_empty_flag() -> Result<()> {
        let line: LineString<f64> = LineString::new(Vec::new());
        let bytes = wkb_bytes(&line)?;
        let blob = wkb_to_gpkg_geometry(Wkb::try_new(&bytes)?, 4326)?;

        assert!(parse_gpkg_geometry_header(&blob)?.empty);
        assert_eq!(gpkg_geometry_envelope(&blob)?, None);
        Ok(())
    }

    #[test]
    fn gpkg_geometry_rejects_invalid_flags() {
        let mut blob = vec![0x47, 0x50, 0x00, 0x0A, 0, 0, 0, 0];
        blob.extend_from_slice(&[0; 16]);
        let result = gpkg_geometry_to_wkb(&blob);
        assert!(matches!(
            result,
            Err(GpkgError::InvalidGpkgGeometryFlags(0x0A))
        ));
    }

    #[test]
    fn gpkg_geometry_rejects_short_and_foreign_blobs() {
        assert!(matches!(
            parse_gpkg_geometry_header(&[0x47, 0x50, 0x00]),
            Err(GpkgError::InvalidGpkgGeometryLength { len: 3, minimum: 8 })
        ));
        assert!(matches!(
            parse_gpkg_geometry_header(&[0x01, 0x01, 0, 0, 0, 0, 0, 0]),
            Err(GpkgError::InvalidGpkgGeometryMagic(0x0101))
        ));
        assert!(matches!(
            parse_gpkg_geometry_header(&[0x47, 0x50, 0x00, 0x03, 0, 0, 0, 0, 1, 2]),
            Err(GpkgError::InvalidGpkgGeometryEnvelope {
                len: 10,
                required: 40
            })
        ));
    }
}
