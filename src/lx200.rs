//! Meade LX200 hand-controller protocol over TCP.
//!
//! The stream is a mix of one binary byte (0x06, the alignment query) and
//! variable-length ASCII commands `:CMD…#`.  Clients like SkySafari batch
//! several commands into one write, so the engine splits on terminators and
//! handles them in order.  Unlike NexStar, a session carries real state:
//! precision mode, clock format, slew rate and a partially assembled
//! date/time.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::alpaca_client::AxisRate;
use crate::angles::{self, Dms, Hms};
use crate::telescope::{AlignmentMode, Axis, Telescope, TrackingMode};

const ACK: u8 = 0x06;

/// Autostar and the LX200GPS reply to `:CM#` with this static string.
const SYNC_REPLY: &str = "M31 EX GAL MAG 3.5 SZ178.0'#";

pub struct Lx200 {
    pub auto_track: bool,
    pub high_precision: bool,
    pub twenty_four_hour: bool,
    pub max_slew: f64,
    pub min_slew: f64,
    pub slew_rate: i32,
    utc_offset: Option<f64>,
    have_time: bool,
    have_date: bool,
    hour: u32,
    minute: u32,
    second: u32,
    day: u32,
    month: u32,
    year: i32,
}

impl Lx200 {
    pub fn new(
        auto_track: bool,
        high_precision: bool,
        twenty_four_hour: bool,
        rates: AxisRate,
    ) -> Self {
        Self {
            auto_track,
            high_precision,
            twenty_four_hour,
            max_slew: rates.maximum,
            min_slew: rates.minimum,
            slew_rate: rates.maximum as i32,
            utc_offset: None,
            have_time: false,
            have_date: false,
            hour: 0,
            minute: 0,
            second: 0,
            day: 0,
            month: 0,
            year: 0,
        }
    }

    pub async fn handle_connection(&mut self, mut stream: TcpStream, scope: &Telescope) {
        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            while let Some(len) = next_command_len(&buf) {
                let command: Vec<u8> = buf.drain(..len).collect();
                let reply = self.execute(&command, scope).await;
                if reply.is_empty() {
                    // many LX200 commands don't generate a reply
                    debug!(?command, "command returned a zero length reply");
                    continue;
                }
                if let Err(e) = stream.write_all(&reply).await {
                    warn!("writing reply to LX200 client: {}", e);
                    return;
                }
            }
            if buf.len() > 256 {
                warn!("discarding {} unterminated bytes", buf.len());
                buf.clear();
            }

            match stream.read(&mut chunk).await {
                // EOF: client sent a Fin, don't log that
                Ok(0) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    warn!("reading from LX200 client: {}", e);
                    return;
                }
            }
        }
    }

    /// Run one command (`0x06` or `:CMD…#`) and produce the reply bytes.
    /// An empty reply means the command has none.
    pub async fn execute(&mut self, command: &[u8], scope: &Telescope) -> Vec<u8> {
        if command.first() == Some(&ACK) {
            return match scope.alignment_mode().await {
                Ok(AlignmentMode::Polar) | Ok(AlignmentMode::GermanPolar) => b"P".to_vec(),
                Ok(AlignmentMode::AltAz) => b"A".to_vec(),
                Err(e) => {
                    warn!("Unable to determine alignmentmode: {}", e);
                    b"A".to_vec()
                }
            };
        }

        let Ok(text) = std::str::from_utf8(command) else {
            warn!("Non-ASCII command: {:?}", command);
            return Vec::new();
        };
        let Some(prefix) = text.get(0..3) else {
            warn!("Unexpected/invalid command: '{}'", text);
            return Vec::new();
        };
        debug!(command = text, "LX200 command");

        let reply = match prefix {
            ":CM" => match scope.sync_to_target().await {
                Ok(()) => SYNC_REPLY.to_string(),
                Err(e) => {
                    warn!("Unable to sync on target: {}", e);
                    String::new()
                }
            },

            ":GA" => {
                let alt = self.get_f64_or_zero(scope.altitude().await, ":GA");
                angles::format_degrees(alt, self.high_precision) + "#"
            }

            ":GD" => {
                let dec = self.get_f64_or_zero(scope.declination().await, ":GD");
                angles::format_degrees(dec, self.high_precision) + "#"
            }

            ":GZ" => {
                let az = self.get_f64_or_zero(scope.azimuth().await, ":GZ");
                angles::format_degrees(az, self.high_precision) + "#"
            }

            // the signed-degrees formatter does double duty for RA hours
            ":GR" => {
                let ra = self.get_f64_or_zero(scope.right_ascension().await, ":GR");
                angles::format_degrees(ra, self.high_precision) + "#"
            }

            ":Gd" => {
                let dec = self.get_f64_or_zero(scope.target_declination().await, ":Gd");
                angles::format_degrees(dec, self.high_precision) + "#"
            }

            ":GC" => {
                let date = match scope.utc_date().await {
                    Ok(date) => date,
                    Err(e) => {
                        warn!("Unable to get telescope time (:GC#): {}", e);
                        Utc.timestamp_opt(0, 0).single().unwrap_or_default()
                    }
                };
                use chrono::Datelike;
                let mut year = date.year();
                // two-digit years; 2100 is someone else's problem
                if year > 2000 {
                    year -= 2000;
                } else if year > 1900 {
                    year -= 1900;
                }
                format!("{:02}/{:02}/{:02}#", date.month(), date.day(), year)
            }

            ":Gg" => {
                let long = self.get_f64_or_zero(scope.site_longitude().await, ":Gg");
                angles::format_longitude(long) + "#"
            }

            ":Gt" => {
                let lat = self.get_f64_or_zero(scope.site_latitude().await, ":Gt");
                angles::format_latitude(lat) + "#"
            }

            // recognized but unanswered, like the hand controllers we mimic
            ":Ga" | ":GL" | ":Gc" | ":GG" => String::new(),

            ":H#" => {
                self.twenty_four_hour = !self.twenty_four_hour;
                String::new()
            }

            // slew to target alt/az is not supported
            ":MA" => "1".to_string(),

            ":P#" => {
                self.high_precision = !self.high_precision;
                if self.high_precision {
                    "HIGH PRECISION".to_string()
                } else {
                    "LOW PRECISION".to_string()
                }
            }

            ":Me" => self.move_axis(scope, Axis::AzmRa, false).await,
            ":Mw" => self.move_axis(scope, Axis::AzmRa, true).await,
            ":Mn" => self.move_axis(scope, Axis::AltDec, true).await,
            ":Ms" => self.move_axis(scope, Axis::AltDec, false).await,

            ":MS" => {
                if self.auto_track {
                    self.auto_enable_tracking(scope).await;
                }
                if let Err(e) = scope.slew_to_target_async().await {
                    warn!("Unable to slew to target: {}", e);
                }
                // Alpaca gives no useful verdict here, so always report ok
                "0".to_string()
            }

            ":Q#" => {
                if let Err(e) = scope.abort_slew().await {
                    warn!("Unable to abort slew: {}", e);
                }
                String::new()
            }

            ":Qe" | ":Qw" => self.halt_axis(scope, Axis::AzmRa).await,
            ":Qn" | ":Qs" => self.halt_axis(scope, Axis::AltDec).await,

            ":RG" => {
                self.slew_rate = 1;
                String::new()
            }
            ":RC" => {
                self.slew_rate = 2;
                String::new()
            }
            ":RM" => {
                self.slew_rate = self.max_slew as i32 - 1;
                String::new()
            }
            ":RS" => {
                self.slew_rate = self.max_slew as i32;
                String::new()
            }

            ":Sd" => self.set_target_declination(text, scope).await,
            ":Sr" => self.set_target_right_ascension(text, scope).await,
            ":Sg" => self.set_site_longitude(text, scope).await,
            ":St" => self.set_site_latitude(text, scope).await,
            ":SG" => self.set_utc_offset(text, scope).await,
            ":SC" => self.set_date(text, scope).await,
            ":SL" => self.set_time(text, scope).await,

            _ => {
                warn!("Unsupported command: '{}'", text);
                String::new()
            }
        };

        reply.into_bytes()
    }

    fn get_f64_or_zero(
        &self,
        result: Result<f64, crate::alpaca_client::AlpacaError>,
        what: &str,
    ) -> f64 {
        result.unwrap_or_else(|e| {
            warn!("Unable to get telescope value ({}#): {}", what, e);
            0.0
        })
    }

    fn rate_to_ascom(&self, positive: bool) -> i32 {
        if positive {
            self.slew_rate
        } else {
            -self.slew_rate
        }
    }

    async fn move_axis(&self, scope: &Telescope, axis: Axis, positive: bool) -> String {
        let rate = self.rate_to_ascom(positive);
        if let Err(e) = scope.move_axis(axis, rate).await {
            warn!("Unable to move axis: {}", e);
        }
        String::new()
    }

    async fn halt_axis(&self, scope: &Telescope, axis: Axis) -> String {
        if let Err(e) = scope.move_axis(axis, 0).await {
            warn!("Unable to halt axis: {}", e);
        }
        String::new()
    }

    async fn auto_enable_tracking(&self, scope: &Telescope) {
        match scope.tracking().await {
            Ok(TrackingMode::NotTracking) => {
                // any non-NotTracking value means true on the wire
                if let Err(e) = scope.set_tracking(TrackingMode::AltAz).await {
                    warn!("Unable to auto-enable tracking: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Unable to get tracking mode: {}", e),
        }
    }

    /// `:SdsDD*MM#` or `:SdsDD*MM:SS#`; the form is chosen by the number of
    /// colons.  Legacy firmware encodes the minus sign as 0x45 ('E'), so
    /// accept both.
    async fn set_target_declination(&mut self, text: &str, scope: &Telescope) -> String {
        let colons = text.matches(':').count();
        let bytes = text.as_bytes();
        let parsed = (|| -> Option<f64> {
            let sign = *bytes.get(3)?;
            let degrees: i32 = text.get(4..6)?.parse().ok()?;
            if bytes.get(6) != Some(&b'*') {
                return None;
            }
            let minutes: i32 = text.get(7..9)?.parse().ok()?;
            let dms = match colons {
                2 => {
                    if bytes.get(9) != Some(&b':') {
                        return None;
                    }
                    let seconds: f64 = text.get(10..12)?.parse().ok()?;
                    Dms::new(degrees, minutes, seconds)
                }
                1 => Dms::short(degrees, f64::from(minutes)),
                _ => return None,
            };
            let value = dms.to_degrees();
            // 'E' (0x45) is the legacy encoding of '-'
            if sign == b'-' || sign == 0x45 {
                Some(-value)
            } else {
                Some(value)
            }
        })();

        match parsed {
            Some(dec) => match scope.set_target_declination(dec).await {
                Ok(()) => "1".to_string(),
                Err(e) => {
                    warn!("Unable to set target declination: {}", e);
                    "0".to_string()
                }
            },
            None => {
                warn!("Error parsing '{}'", text);
                "0".to_string()
            }
        }
    }

    /// `:SrHH:MM:SS#` or `:SrHH:MM.T#` (T = tenths of a minute).
    async fn set_target_right_ascension(&mut self, text: &str, scope: &Telescope) -> String {
        let colons = text.matches(':').count();
        let parsed = (|| -> Option<f64> {
            let hours: i32 = text.get(3..5)?.parse().ok()?;
            let minutes: i32 = text.get(6..8)?.parse().ok()?;
            let hms = match colons {
                3 => {
                    let seconds: f64 = text.get(9..11)?.parse().ok()?;
                    Hms::new(hours, minutes, seconds)
                }
                2 => {
                    let tenths: f64 = text.get(9..10)?.parse().ok()?;
                    Hms::short(hours, f64::from(minutes) + tenths / 10.0)
                }
                _ => return None,
            };
            Some(hms.to_hours())
        })();

        match parsed {
            Some(ra) => match scope.set_target_right_ascension(ra).await {
                Ok(()) => "1".to_string(),
                Err(e) => {
                    warn!("Unable to set target right ascension: {}", e);
                    "0".to_string()
                }
            },
            None => {
                warn!("Error parsing '{}'", text);
                "0".to_string()
            }
        }
    }

    /// `:SgDDD*MM#`; LX200 longitude is unsigned 0..360.
    async fn set_site_longitude(&mut self, text: &str, scope: &Telescope) -> String {
        let parsed = (|| -> Option<f64> {
            let degrees: i32 = text.get(3..6)?.parse().ok()?;
            if text.as_bytes().get(6) != Some(&b'*') {
                return None;
            }
            let minutes: i32 = text.get(7..9)?.parse().ok()?;
            Some(Dms::new(degrees, minutes, 0.0).to_degrees_positive())
        })();

        match parsed {
            Some(long) => match scope.set_site_longitude(long).await {
                Ok(()) => "1".to_string(),
                Err(e) => {
                    warn!("Unable to set site longitude: {}", e);
                    "0".to_string()
                }
            },
            None => {
                warn!("Error parsing '{}'", text);
                "0".to_string()
            }
        }
    }

    /// `:StsDD*MM#`.
    async fn set_site_latitude(&mut self, text: &str, scope: &Telescope) -> String {
        let parsed = (|| -> Option<f64> {
            let sign = *text.as_bytes().get(3)?;
            let degrees: i32 = text.get(4..6)?.parse().ok()?;
            if text.as_bytes().get(6) != Some(&b'*') {
                return None;
            }
            let minutes: i32 = text.get(7..9)?.parse().ok()?;
            let value = Dms::new(degrees, minutes, 0.0).to_degrees();
            if sign == b'-' {
                Some(-value)
            } else {
                Some(value)
            }
        })();

        match parsed {
            Some(lat) => match scope.set_site_latitude(lat).await {
                Ok(()) => "1".to_string(),
                Err(e) => {
                    warn!("Unable to set site latitude: {}", e);
                    "0".to_string()
                }
            },
            None => {
                warn!("Error parsing '{}'", text);
                "0".to_string()
            }
        }
    }

    /// `:SGsHH.H#` per the docs, but SkySafari actually sends `:SGsHH#`.
    async fn set_utc_offset(&mut self, text: &str, scope: &Telescope) -> String {
        let parsed = (|| -> Option<f64> {
            let sign = *text.as_bytes().get(3)?;
            let digits = text.get(4..)?.trim_end_matches('#');
            let hours: f64 = digits.parse().ok()?;
            if sign == b'-' {
                Some(-hours)
            } else {
                Some(hours)
            }
        })();

        match parsed {
            Some(offset) => {
                self.utc_offset = Some(offset);
                self.send_date_time(scope).await;
                "1".to_string()
            }
            None => {
                warn!("Error parsing '{}'", text);
                "0".to_string()
            }
        }
    }

    /// `:SCMM/DD/YY#`.
    async fn set_date(&mut self, text: &str, scope: &Telescope) -> String {
        let parsed = (|| -> Option<(u32, u32, i32)> {
            let month: u32 = text.get(3..5)?.parse().ok()?;
            let day: u32 = text.get(6..8)?.parse().ok()?;
            let year: i32 = text.get(9..11)?.parse().ok()?;
            Some((month, day, year))
        })();

        match parsed {
            Some((month, day, year)) => {
                self.month = month;
                self.day = day;
                self.year = year + 2000;
                self.have_date = true;
                self.send_date_time(scope).await;
                // the real hand controller chews on its ephemeris here
                "1Updating Planetary Data#".to_string()
            }
            None => {
                warn!("Unable to parse date '{}'", text);
                "0".to_string()
            }
        }
    }

    /// `:SLHH:MM:SS#` in 24-hour format.
    async fn set_time(&mut self, text: &str, scope: &Telescope) -> String {
        let parsed = (|| -> Option<(u32, u32, u32)> {
            let hour: u32 = text.get(3..5)?.parse().ok()?;
            let minute: u32 = text.get(6..8)?.parse().ok()?;
            let second: u32 = text.get(9..11)?.parse().ok()?;
            Some((hour, minute, second))
        })();

        match parsed {
            Some((hour, minute, second)) => {
                self.hour = hour;
                self.minute = minute;
                self.second = second;
                self.have_time = true;
                self.send_date_time(scope).await;
                "1".to_string()
            }
            None => {
                warn!("Unable to parse time '{}'", text);
                "0".to_string()
            }
        }
    }

    /// LX200 splits date, time and UTC offset over three commands where
    /// Alpaca takes one timestamp, so accumulate and send once the triple is
    /// complete.  Adding the offset to local time yields UTC.
    async fn send_date_time(&mut self, scope: &Telescope) {
        let Some(offset) = self.utc_offset else {
            debug!("skipping date/time send, no UTC offset yet");
            return;
        };
        if !self.have_time || !self.have_date || offset.abs() > 24.0 {
            debug!("skipping date/time send, incomplete");
            return;
        }

        let Some(local) = NaiveDate::from_ymd_opt(self.year, self.month, self.day)
            .and_then(|d| d.and_hms_opt(self.hour, self.minute, self.second))
        else {
            warn!(
                "invalid date/time {}-{}-{} {}:{}:{}",
                self.year, self.month, self.day, self.hour, self.minute, self.second
            );
            return;
        };

        let utc = local.and_utc() + Duration::seconds((offset * 3600.0).round() as i64);
        debug!("sending utcdate: {}", utc);
        match scope.set_utc_date(utc.fixed_offset()).await {
            Ok(()) => {
                // one PUT per assembled triple
                self.have_time = false;
                self.have_date = false;
            }
            Err(e) => warn!("Unable to set telescope date/time: {}", e),
        }
    }
}

/// Length of the first complete command in the buffer, if any.
fn next_command_len(buf: &[u8]) -> Option<usize> {
    match buf.first() {
        None => None,
        Some(&ACK) => Some(1),
        Some(_) => buf.iter().position(|&b| b == b'#').map(|i| i + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alpaca_client::AlpacaClient;
    use crate::test_server::MockAlpaca;
    use serde_json::json;
    use std::sync::Arc;

    fn session() -> Lx200 {
        Lx200::new(
            true,
            false,
            true,
            AxisRate {
                minimum: 0.0,
                maximum: 3.0,
            },
        )
    }

    async fn scope(mock: &MockAlpaca, mode: TrackingMode) -> Telescope {
        let client = Arc::new(AlpacaClient::new("127.0.0.1", mock.port(), 11));
        Telescope::new(0, mode, client)
    }

    #[test]
    fn command_framing() {
        assert_eq!(next_command_len(b""), None);
        assert_eq!(next_command_len(&[0x06]), Some(1));
        assert_eq!(next_command_len(b":GR#:GD#"), Some(4));
        assert_eq!(next_command_len(b":Sd+12*30"), None);
    }

    #[tokio::test]
    async fn ack_reports_alignment() {
        let mock = MockAlpaca::start().await;
        mock.set_value("alignmentmode", json!(0)).await;
        let scope = scope(&mock, TrackingMode::AltAz).await;
        let mut lx = session();

        assert_eq!(lx.execute(&[0x06], &scope).await, b"A");

        mock.set_value("alignmentmode", json!(1)).await;
        assert_eq!(lx.execute(&[0x06], &scope).await, b"P");
    }

    #[tokio::test]
    async fn precision_toggle_is_an_involution() {
        let mock = MockAlpaca::start().await;
        mock.set_value("altitude", json!(45.5)).await;
        let scope = scope(&mock, TrackingMode::AltAz).await;
        let mut lx = session();

        assert_eq!(lx.execute(b":GA#", &scope).await, b"+45*30#");

        assert_eq!(lx.execute(b":P#", &scope).await, b"HIGH PRECISION");
        assert_eq!(lx.execute(b":GA#", &scope).await, b"+45*30'00#");

        assert_eq!(lx.execute(b":P#", &scope).await, b"LOW PRECISION");
        assert!(!lx.high_precision);
        assert_eq!(lx.execute(b":GA#", &scope).await, b"+45*30#");
    }

    #[tokio::test]
    async fn high_precision_ra_read() {
        let mock = MockAlpaca::start().await;
        mock.set_value("rightascension", json!(12.505)).await;
        let scope = scope(&mock, TrackingMode::AltAz).await;
        let mut lx = session();

        assert_eq!(lx.execute(b":P#", &scope).await, b"HIGH PRECISION");
        assert_eq!(lx.execute(b":GR#", &scope).await, b"+12*30'18#");
    }

    #[tokio::test]
    async fn legacy_minus_target_declination() {
        let mock = MockAlpaca::start().await;
        let scope = scope(&mock, TrackingMode::AltAz).await;
        let mut lx = session();

        let reply = lx.execute(b":SdE12*30:15#", &scope).await;
        assert_eq!(reply, b"1");

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(
            requests[0].starts_with("PUT targetdeclination"),
            "{}",
            requests[0]
        );
        assert!(
            requests[0].contains("TargetDeclination=-12.504166"),
            "{}",
            requests[0]
        );
    }

    #[tokio::test]
    async fn target_right_ascension_forms() {
        let mock = MockAlpaca::start().await;
        let scope = scope(&mock, TrackingMode::AltAz).await;
        let mut lx = session();

        assert_eq!(lx.execute(b":Sr23:59:59#", &scope).await, b"1");
        assert_eq!(lx.execute(b":Sr06:30.5#", &scope).await, b"1");
        assert_eq!(lx.execute(b":Srgarbage#", &scope).await, b"0");

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 2);
        assert!(
            requests[0].contains("TargetRightAscension=23.99972"),
            "{}",
            requests[0]
        );
        assert!(
            requests[1].contains("TargetRightAscension=6.508333"),
            "{}",
            requests[1]
        );
    }

    #[tokio::test]
    async fn date_time_triple_sends_exactly_one_put() {
        let mock = MockAlpaca::start().await;
        let scope = scope(&mock, TrackingMode::AltAz).await;
        let mut lx = session();

        assert_eq!(lx.execute(b":SG+08#", &scope).await, b"1");
        assert!(mock.requests().await.is_empty());

        assert_eq!(lx.execute(b":SL19:30:00#", &scope).await, b"1");
        assert!(mock.requests().await.is_empty());

        let reply = lx.execute(b":SC03/04/21#", &scope).await;
        assert_eq!(reply, b"1Updating Planetary Data#");

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("PUT utcdate"), "{}", requests[0]);
        // 19:30 local at UTC-8 (offset +08 added) is 03:30 the next day
        assert!(
            requests[0].contains("2021-03-05T03%3A30%3A00Z"),
            "{}",
            requests[0]
        );

        // a lone time update must not re-send until the triple is complete
        assert_eq!(lx.execute(b":SL20:00:00#", &scope).await, b"1");
        assert_eq!(mock.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn slew_to_target_with_auto_track() {
        let mock = MockAlpaca::start().await;
        mock.set_value("tracking", json!(false)).await;
        let scope = scope(&mock, TrackingMode::EqNorth).await;
        let mut lx = session();

        assert_eq!(lx.execute(b":MS#", &scope).await, b"0");

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 3);
        assert!(requests[0].starts_with("GET tracking"), "{}", requests[0]);
        assert!(requests[1].contains("Tracking=true"), "{}", requests[1]);
        assert!(
            requests[2].starts_with("PUT slewtotargetasync"),
            "{}",
            requests[2]
        );
    }

    #[tokio::test]
    async fn sync_to_target_mimics_autostar() {
        let mock = MockAlpaca::start().await;
        let scope = scope(&mock, TrackingMode::AltAz).await;
        let mut lx = session();

        let reply = lx.execute(b":CM#", &scope).await;
        assert_eq!(reply, SYNC_REPLY.as_bytes());

        let requests = mock.requests().await;
        assert!(requests[0].starts_with("PUT synctotarget"), "{}", requests[0]);
    }

    #[tokio::test]
    async fn slew_rates_and_directional_moves() {
        let mock = MockAlpaca::start().await;
        let scope = scope(&mock, TrackingMode::AltAz).await;
        let mut lx = session();
        assert_eq!(lx.slew_rate, 3);

        assert!(lx.execute(b":RG#", &scope).await.is_empty());
        assert_eq!(lx.slew_rate, 1);
        assert!(lx.execute(b":RM#", &scope).await.is_empty());
        assert_eq!(lx.slew_rate, 2);
        assert!(lx.execute(b":RS#", &scope).await.is_empty());
        assert_eq!(lx.slew_rate, 3);

        // east is the negative direction on the Azm/RA axis
        assert!(lx.execute(b":Me#", &scope).await.is_empty());
        // halting sends a zero-rate move
        assert!(lx.execute(b":Qe#", &scope).await.is_empty());
        assert!(lx.execute(b":Qn#", &scope).await.is_empty());

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 3);
        assert!(requests[0].contains("Axis=0"), "{}", requests[0]);
        assert!(requests[0].contains("Rate=-3"), "{}", requests[0]);
        assert!(requests[1].contains("Rate=0"), "{}", requests[1]);
        assert!(requests[2].contains("Axis=1"), "{}", requests[2]);
        assert!(requests[2].contains("Rate=0"), "{}", requests[2]);
    }

    #[tokio::test]
    async fn site_getters_format_sexagesimal() {
        let mock = MockAlpaca::start().await;
        mock.set_value("sitelatitude", json!(37.5)).await;
        mock.set_value("sitelongitude", json!(-121.25)).await;
        let scope = scope(&mock, TrackingMode::AltAz).await;
        let mut lx = session();

        assert_eq!(lx.execute(b":Gt#", &scope).await, b"+37*30#");
        assert_eq!(lx.execute(b":Gg#", &scope).await, b"-121*15#");
    }

    #[tokio::test]
    async fn site_setters() {
        let mock = MockAlpaca::start().await;
        let scope = scope(&mock, TrackingMode::AltAz).await;
        let mut lx = session();

        assert_eq!(lx.execute(b":St-37*30#", &scope).await, b"1");
        assert_eq!(lx.execute(b":Sg121*15#", &scope).await, b"1");

        let requests = mock.requests().await;
        assert!(requests[0].contains("SiteLatitude=-37.5"), "{}", requests[0]);
        assert!(requests[1].contains("SiteLongitude=121.25"), "{}", requests[1]);
    }

    #[tokio::test]
    async fn current_date_as_two_digit_year() {
        let mock = MockAlpaca::start().await;
        mock.set_value("utcdate", json!("2021-03-04T05:06:07Z")).await;
        let scope = scope(&mock, TrackingMode::AltAz).await;
        let mut lx = session();

        assert_eq!(lx.execute(b":GC#", &scope).await, b"03/04/21#");
    }

    #[tokio::test]
    async fn unsupported_commands_stay_silent() {
        let mock = MockAlpaca::start().await;
        let scope = scope(&mock, TrackingMode::AltAz).await;
        let mut lx = session();

        assert!(lx.execute(b":XYZ#", &scope).await.is_empty());
        assert_eq!(lx.execute(b":MA#", &scope).await, b"1");
        assert!(lx.execute(b":H#", &scope).await.is_empty());
        assert!(!lx.twenty_four_hour);
    }
}
