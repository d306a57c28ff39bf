//! Angle conversions shared by both protocol engines.
//!
//! NexStar moves angles as fixed-point "steps" (a full rotation maps to
//! 2^16 or 2^32) encoded as uppercase ASCII hex; LX200 moves them as
//! sexagesimal text.  Everything in here is pure math so the engines can be
//! tested without sockets.

/// Hours, minutes, seconds: right ascension and hour angles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hms {
    pub hours: i32,
    pub minutes: i32,
    pub seconds: f64,
}

impl Hms {
    pub fn new(hours: i32, minutes: i32, seconds: f64) -> Self {
        Self {
            hours,
            minutes,
            seconds,
        }
    }

    /// Hours with minutes.frac_minutes, the `HH:MM.T` form.
    pub fn short(hours: i32, minutes: f64) -> Self {
        let min = minutes.floor();
        Self {
            hours,
            minutes: min as i32,
            seconds: (minutes - min) * 60.0,
        }
    }

    pub fn to_hours(self) -> f64 {
        let mut ret = f64::from(self.hours.abs());
        ret += f64::from(self.minutes) / 60.0;
        ret += self.seconds / 3600.0;
        if self.hours < 0 {
            ret *= -1.0;
        }
        ret
    }
}

/// Degrees, minutes, seconds: latitude, longitude, Az, Alt and Dec.
/// Sign lives on the degrees component only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dms {
    pub degrees: i32,
    pub minutes: i32,
    pub seconds: f64,
}

impl Dms {
    pub fn new(degrees: i32, minutes: i32, seconds: f64) -> Self {
        Self {
            degrees,
            minutes,
            seconds,
        }
    }

    /// Degrees with minutes.frac_minutes, the `sDD*MM` form.
    pub fn short(degrees: i32, minutes: f64) -> Self {
        let min = minutes.floor();
        Self {
            degrees,
            minutes: min as i32,
            seconds: (minutes - min) * 60.0,
        }
    }

    pub fn from_degrees(degrees: f64) -> Self {
        let whole = degrees.trunc();
        let frac = (degrees - whole).abs();
        let min = (frac * 60.0).floor();
        let sec = (frac - min / 60.0) * 3600.0;
        Self {
            degrees: whole as i32,
            minutes: min as i32,
            seconds: sec,
        }
    }

    /// Signed degrees, -180..180.
    pub fn to_degrees(self) -> f64 {
        let mut ret = f64::from(self.degrees.abs());
        ret += f64::from(self.minutes) / 60.0;
        ret += self.seconds / 3600.0;
        if self.degrees < 0 {
            ret *= -1.0;
        }
        ret
    }

    /// Degrees as 0..360, the form Alpaca wants for site longitude.
    pub fn to_degrees_positive(self) -> f64 {
        let deg = self.to_degrees();
        if self.degrees < 0 {
            deg + 360.0
        } else {
            deg
        }
    }
}

/*
 * Fixed-point step codecs.  RA maps the full turn to 24 hours, declination
 * to 360 degrees with the upper half of the step range as the negative
 * representatives.  Operation order mirrors the wire tests bit for bit.
 */

const STEPS16: f64 = 65536.0;
const STEPS32: f64 = 4294967296.0;

pub fn steps16_to_ra(steps: u16) -> f64 {
    f64::from(steps) / STEPS16 * 24.0
}

pub fn ra_to_steps16(ra: f64) -> u16 {
    (STEPS16 * ra / 24.0) as u16
}

pub fn steps32_to_ra(steps: u32) -> f64 {
    f64::from(steps) / STEPS32 * 24.0
}

pub fn ra_to_steps32(ra: f64) -> u32 {
    (STEPS32 * ra / 24.0) as u32
}

pub fn steps16_to_dec(steps: u16) -> f64 {
    let mut s = i64::from(steps);
    if s >= 1 << 15 {
        s -= 1 << 16;
    }
    s as f64 / (STEPS16 / 360.0)
}

pub fn dec_to_steps16(dec: f64) -> u16 {
    if dec < 0.0 {
        (STEPS16 / 360.0 * (360.0 + dec)) as u16
    } else {
        (dec / 360.0 * STEPS16) as u16
    }
}

pub fn steps32_to_dec(steps: u32) -> f64 {
    let mut s = i64::from(steps);
    if s >= 1 << 31 {
        s -= 1 << 32;
    }
    s as f64 / (STEPS32 / 360.0)
}

pub fn dec_to_steps32(dec: f64) -> u32 {
    if dec < 0.0 {
        (STEPS32 / 360.0 * (360.0 + dec)) as u32
    } else {
        (dec / 360.0 * STEPS32) as u32
    }
}

/// Azimuth shares the RA scale (full turn = whole step range) rather than
/// the signed declination scale, even though both ride the same wire width.
pub fn az_to_steps16(az: f64) -> u16 {
    (az / 360.0 * STEPS16) as u16
}

pub fn az_to_steps32(az: f64) -> u32 {
    (az / 360.0 * STEPS32) as u32
}

/*
 * ASCII-hex step framing: %04X,%04X# or %08X,%08X#.
 */

pub fn format_step_pair(first: u32, second: u32, high_precision: bool) -> String {
    if high_precision {
        format!("{:08X},{:08X}#", first, second)
    } else {
        format!("{:04X},{:04X}#", first, second)
    }
}

/// Parse the payload of a step-pair frame (everything between the opcode
/// and the trailing `#`).  Some legacy firmware pads a ninth hex digit
/// before the comma; only the leading digits of each field are significant.
pub fn parse_step_pair(payload: &[u8], high_precision: bool) -> Option<(u32, u32)> {
    let digits = if high_precision { 8 } else { 4 };
    let text = std::str::from_utf8(payload).ok()?;
    let text = text.strip_suffix('#').unwrap_or(text);
    let (first, second) = text.split_once(',')?;
    let first = first.get(..digits)?;
    let second = second.get(..digits)?;
    Some((
        u32::from_str_radix(first, 16).ok()?,
        u32::from_str_radix(second, 16).ok()?,
    ))
}

/*
 * LX200 sexagesimal formatters.
 */

/// Signed degrees as `sDD*MM` (low precision) or `sDD*MM'SS` (high).
pub fn format_degrees(deg: f64, high_precision: bool) -> String {
    let sign = if deg < 0.0 { '-' } else { '+' };
    let abs = deg.abs();
    let dd = abs as i32;
    let remain = abs - f64::from(dd);
    let mm = (remain * 60.0) as i32;
    if high_precision {
        let ss = ((remain - f64::from(mm) / 60.0) * 3600.0) as i32;
        format!("{}{:02}*{:02}'{:02}", sign, dd, mm, ss)
    } else {
        format!("{}{:02}*{:02}", sign, dd, mm)
    }
}

/// Latitude as `sDD*MM`.
pub fn format_latitude(deg: f64) -> String {
    let sign = if deg < 0.0 { '-' } else { '+' };
    let abs = deg.abs();
    let dd = abs as i32;
    let mm = ((abs - f64::from(dd)) * 60.0) as i32;
    format!("{}{:02}*{:02}", sign, dd, mm)
}

/// Longitude as `sDDD*MM`.
pub fn format_longitude(deg: f64) -> String {
    let sign = if deg < 0.0 { '-' } else { '+' };
    let abs = deg.abs();
    let dd = abs as i32;
    let mm = ((abs - f64::from(dd)) * 60.0) as i32;
    format!("{}{:03}*{:02}", sign, dd, mm)
}

/*
 * NexStar site-location pack: 8 bytes ABCDEFGH where A/B/C are latitude
 * deg/min/sec, D is the latitude sign flag (1 = negative) and E..H mirror
 * that for longitude.
 */

pub fn pack_site_location(latitude: f64, longitude: f64) -> [u8; 8] {
    let lat = Dms::from_degrees(latitude.abs());
    let long = Dms::from_degrees(longitude.abs());
    [
        lat.degrees as u8,
        lat.minutes as u8,
        lat.seconds.round() as u8,
        u8::from(latitude < 0.0),
        long.degrees as u8,
        long.minutes as u8,
        long.seconds.round() as u8,
        u8::from(longitude < 0.0),
    ]
}

pub fn unpack_site_location(bytes: &[u8; 8]) -> (f64, f64) {
    let mut lat =
        f64::from(bytes[0]) + f64::from(bytes[1]) / 60.0 + f64::from(bytes[2]) / 3600.0;
    if bytes[3] == 1 {
        lat *= -1.0;
    }
    let mut long =
        f64::from(bytes[4]) + f64::from(bytes[5]) / 60.0 + f64::from(bytes[6]) / 3600.0;
    if bytes[7] == 1 {
        long *= -1.0;
    }
    (lat, long)
}

/// NexStar GPS devices report a single latitude or longitude as a 24-bit
/// fraction of the full rotation, followed by `#`.
pub fn gps_fraction_bytes(value: f64) -> [u8; 4] {
    let positive = if value < 0.0 { value + 360.0 } else { value };
    let v = (positive * f64::from(1u32 << 24) / 360.0).round() as u32;
    [(v >> 16) as u8, (v >> 8) as u8, v as u8, b'#']
}
