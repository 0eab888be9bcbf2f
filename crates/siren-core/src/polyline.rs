//! Encoded polyline codec (precision 5).
//!
//! Each coordinate is stored as a zig-zag, 5-bit chunked delta from the
//! previous point, offset into printable ASCII.

use siren_protocol::Position;

const PRECISION: f64 = 1e5;

/// Encode a sequence of positions.
#[must_use]
pub fn encode(points: &[Position]) -> String {
    let mut out = String::with_capacity(points.len() * 8);
    let (mut prev_lat, mut prev_lng) = (0i64, 0i64);

    for point in points {
        let lat = (point.lat * PRECISION).round() as i64;
        let lng = (point.lng * PRECISION).round() as i64;
        encode_value(lat - prev_lat, &mut out);
        encode_value(lng - prev_lng, &mut out);
        prev_lat = lat;
        prev_lng = lng;
    }

    out
}

fn encode_value(delta: i64, out: &mut String) {
    let mut value = if delta < 0 { !(delta << 1) } else { delta << 1 };

    while value >= 0x20 {
        out.push(char::from((((value & 0x1f) | 0x20) + 63) as u8));
        value >>= 5;
    }
    out.push(char::from((value + 63) as u8));
}

/// Decode an encoded polyline.
///
/// Returns `None` if the string is truncated or contains characters outside
/// the polyline alphabet.
#[must_use]
pub fn decode(encoded: &str) -> Option<Vec<Position>> {
    let mut bytes = encoded.bytes();
    let mut points = Vec::new();
    let (mut lat, mut lng) = (0i64, 0i64);

    loop {
        let Some(d_lat) = decode_value(&mut bytes)? else {
            break;
        };
        let d_lng = decode_value(&mut bytes)??;

        lat += d_lat;
        lng += d_lng;
        points.push(Position::new(lat as f64 / PRECISION, lng as f64 / PRECISION));
    }

    Some(points)
}

/// `None` on malformed input, `Some(None)` at a clean end of input.
fn decode_value(bytes: &mut impl Iterator<Item = u8>) -> Option<Option<i64>> {
    let mut result = 0i64;
    let mut shift = 0u32;
    let mut started = false;

    loop {
        let Some(byte) = bytes.next() else {
            return if started { None } else { Some(None) };
        };
        if !(63..=126).contains(&byte) || shift > 60 {
            return None;
        }
        started = true;

        let chunk = i64::from(byte - 63);
        result |= (chunk & 0x1f) << shift;
        shift += 5;

        if chunk < 0x20 {
            break;
        }
    }

    let value = if result & 1 == 1 { !(result >> 1) } else { result >> 1 };
    Some(Some(value))
}
