//! Celestron NexStar hand-controller protocol over TCP.
//!
//! Each command is a fixed-length frame whose total size is determined by
//! its first byte, so framing is a lookup table rather than a delimiter
//! scan.  Replies are a hybrid of raw bytes and ASCII hex, always
//! terminated with `#`.

use chrono::{Datelike, FixedOffset, Offset, TimeZone, Timelike, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::angles;
use crate::telescope::{Axis, Telescope, TrackingMode};

/// Total frame length (opcode included) for each command byte.
fn frame_length(opcode: u8) -> usize {
    match opcode {
        b'K' | b'T' => 2,
        b'P' => 8,
        b'W' | b'H' => 9,
        b'S' | b'R' => 10,
        b's' | b'r' => 18,
        _ => 1,
    }
}

/// NexStar is stateless apart from the auto-track policy; a fresh instance
/// serves each accepted connection.
pub struct NexStar {
    pub auto_track: bool,
}

impl NexStar {
    pub fn new(auto_track: bool) -> Self {
        Self { auto_track }
    }

    pub async fn handle_connection(&self, mut stream: TcpStream, scope: &Telescope) {
        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            while let Some(&opcode) = buf.first() {
                let need = frame_length(opcode);
                if buf.len() < need {
                    break;
                }
                let frame: Vec<u8> = buf.drain(..need).collect();
                debug!(?frame, "NexStar command");
                let reply = self.execute(&frame, scope).await;
                if let Err(e) = stream.write_all(&reply).await {
                    warn!("writing reply to NexStar client: {}", e);
                    return;
                }
            }

            match stream.read(&mut chunk).await {
                // EOF: client hung up, nothing to report
                Ok(0) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    warn!("reading from NexStar client: {}", e);
                    return;
                }
            }
        }
    }

    /// Run one complete frame and produce the reply bytes.
    pub async fn execute(&self, frame: &[u8], scope: &Telescope) -> Vec<u8> {
        match frame[0] {
            // echo, used by clients as a link check
            b'K' => vec![frame[1], b'#'],

            b'E' => {
                let (ra, dec) = self.ra_dec_or_zero(scope).await;
                angles::format_step_pair(
                    u32::from(angles::ra_to_steps16(ra)),
                    u32::from(angles::dec_to_steps16(dec)),
                    false,
                )
                .into_bytes()
            }

            b'e' => {
                let (ra, dec) = self.ra_dec_or_zero(scope).await;
                angles::format_step_pair(
                    angles::ra_to_steps32(ra),
                    angles::dec_to_steps32(dec),
                    true,
                )
                .into_bytes()
            }

            // Azm is 0..360 and shares the RA scale; Alt is +/-90 and uses
            // the signed scale.  Same wire width, two meanings.
            b'Z' => {
                let (azm, alt) = self.azm_alt_or_zero(scope).await;
                angles::format_step_pair(
                    u32::from(angles::az_to_steps16(azm)),
                    u32::from(angles::dec_to_steps16(alt)),
                    false,
                )
                .into_bytes()
            }

            b'z' => {
                let (azm, alt) = self.azm_alt_or_zero(scope).await;
                angles::format_step_pair(
                    angles::az_to_steps32(azm),
                    angles::dec_to_steps32(alt),
                    true,
                )
                .into_bytes()
            }

            b't' => {
                let mode = match scope.tracking().await {
                    Ok(mode) => mode,
                    Err(e) => {
                        warn!("Unable to get tracking mode: {}", e);
                        TrackingMode::NotTracking
                    }
                };
                vec![mode as u8, b'#']
            }

            b'T' => {
                let mode = TrackingMode::from_byte(frame[1]);
                if let Err(e) = scope.set_tracking(mode).await {
                    warn!("Unable to set tracking mode: {}", e);
                }
                vec![b'#']
            }

            b'V' => b"50#".to_vec(),

            b'P' => self.passthrough(frame, scope).await,

            b'S' | b's' => {
                let high = frame[0] == b's';
                if let Some((ra_steps, dec_steps)) = angles::parse_step_pair(&frame[1..], high) {
                    let (ra, dec) = steps_to_ra_dec(ra_steps, dec_steps, high);
                    if let Err(e) = scope.sync_to_coordinates(ra, dec).await {
                        warn!("Unable to sync on RA/Dec: {}", e);
                    }
                } else {
                    warn!("Unable to parse sync frame: {:?}", frame);
                }
                vec![b'#']
            }

            b'R' | b'r' => {
                let high = frame[0] == b'r';
                if let Some((ra_steps, dec_steps)) = angles::parse_step_pair(&frame[1..], high) {
                    let (ra, dec) = steps_to_ra_dec(ra_steps, dec_steps, high);
                    self.auto_enable_tracking(scope).await;
                    if let Err(e) = scope.slew_to_coordinates_async(ra, dec).await {
                        warn!("Unable to slew to RA/Dec: {}", e);
                    }
                } else {
                    warn!("Unable to parse goto frame: {:?}", frame);
                }
                vec![b'#']
            }

            b'w' => {
                let (lat, long) = self.site_or_zero(scope).await;
                let mut reply = angles::pack_site_location(lat, long).to_vec();
                reply.push(b'#');
                reply
            }

            b'W' => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&frame[1..9]);
                let (lat, long) = angles::unpack_site_location(&bytes);
                if let Err(e) = scope.set_site_latitude(lat).await {
                    warn!("Error setting site latitude: {}", e);
                }
                if let Err(e) = scope.set_site_longitude(long).await {
                    warn!("Error setting site longitude: {}", e);
                }
                vec![b'#']
            }

            b'h' => match scope.utc_date().await {
                Ok(date) => vec![
                    date.hour() as u8,
                    date.minute() as u8,
                    date.second() as u8,
                    date.month() as u8,
                    date.day() as u8,
                    (date.year() - 2000).clamp(0, 255) as u8,
                    0, // GMT offset: the gateway's clock is UTC
                    0, // not DST
                    b'#',
                ],
                Err(e) => {
                    warn!("Unable to get telescope time: {}", e);
                    vec![0, 0, 0, 0, 0, 0, 0, 0, b'#']
                }
            },

            b'H' => {
                // offsets above 128 are negative zones stored as 256-x
                let mut tz = i32::from(frame[7]);
                if tz > 128 {
                    tz = (256 - tz) * -1;
                }
                let offset = FixedOffset::east_opt(tz * 3600).unwrap_or_else(|| Utc.fix());
                let date = offset.with_ymd_and_hms(
                    i32::from(frame[6]) + 2000,
                    u32::from(frame[4]),
                    u32::from(frame[5]),
                    u32::from(frame[1]),
                    u32::from(frame[2]),
                    u32::from(frame[3]),
                );
                match date.single() {
                    Some(date) => {
                        if let Err(e) = scope.set_utc_date(date).await {
                            warn!("Unable to set date/time: {}", e);
                        }
                    }
                    None => warn!("Invalid date/time frame: {:?}", frame),
                }
                vec![b'#']
            }

            // alignment is always complete from the client's point of view
            b'J' => vec![1, b'#'],

            b'L' => match scope.slewing().await {
                Ok(true) => b"1#".to_vec(),
                Ok(false) => b"0#".to_vec(),
                Err(e) => {
                    warn!("Unable to get slewing state: {}", e);
                    b"0#".to_vec()
                }
            },

            b'm' => b"12#".to_vec(),

            b'M' => {
                if let Err(e) = scope.abort_slew().await {
                    warn!("Unable to abort slew: {}", e);
                }
                vec![b'#']
            }

            other => {
                warn!("Unsupported command: {}", other as char);
                vec![b'#']
            }
        }
    }

    /// `P` multiplexes axis moves, the GPS unit and the RTC behind one
    /// 8-byte frame; byte 2 selects the sub-device.
    async fn passthrough(&self, frame: &[u8], scope: &Telescope) -> Vec<u8> {
        // sub-device firmware version query
        if frame[3] == 254 {
            return match frame[2] {
                176 | 178 => vec![1, 6, b'#'],
                _ => vec![5, 0, b'#'],
            };
        }

        match frame[2] {
            // fixed-rate axis slew; byte 1 (variable vs fixed) and byte 5
            // (the variable "slow" rate) are ignored
            16 | 17 => {
                let axis = if frame[2] == 16 {
                    Axis::AzmRa
                } else {
                    Axis::AltDec
                };
                let positive = matches!(frame[3], 6 | 36);
                let rate = rate_to_ascom(positive, frame[4]);
                if let Err(e) = scope.move_axis(axis, rate).await {
                    warn!("Unable to slew axis: {}", e);
                }
                vec![b'#']
            }

            // GPS and RTC share their date/time sub-commands
            176 | 178 => self.gps_command(frame[3], scope).await,

            other => {
                warn!("Unsupported passthrough device: {}", other);
                vec![b'#']
            }
        }
    }

    async fn gps_command(&self, sub: u8, scope: &Telescope) -> Vec<u8> {
        match sub {
            // GPS linked?  The mount is connected before clients are
            // served, so the virtual GPS always has a fix.
            55 => vec![1, b'#'],

            1 => {
                let lat = scope.site_latitude().await.unwrap_or_else(|e| {
                    warn!("Unable to get site latitude: {}", e);
                    0.0
                });
                angles::gps_fraction_bytes(lat).to_vec()
            }

            2 => {
                let long = scope.site_longitude().await.unwrap_or_else(|e| {
                    warn!("Unable to get site longitude: {}", e);
                    0.0
                });
                angles::gps_fraction_bytes(long).to_vec()
            }

            3 => match scope.utc_date().await {
                Ok(date) => vec![date.month() as u8, date.day() as u8, b'#'],
                Err(e) => {
                    warn!("Unable to get telescope date: {}", e);
                    vec![0, 0, b'#']
                }
            },

            4 => match scope.utc_date().await {
                Ok(date) => {
                    let year = date.year() as u16;
                    vec![(year >> 8) as u8, year as u8, b'#']
                }
                Err(e) => {
                    warn!("Unable to get telescope year: {}", e);
                    vec![0, 0, b'#']
                }
            },

            51 => match scope.utc_date().await {
                Ok(date) => vec![
                    date.hour() as u8,
                    date.minute() as u8,
                    date.second() as u8,
                    b'#',
                ],
                Err(e) => {
                    warn!("Unable to get telescope time: {}", e);
                    vec![0, 0, 0, b'#']
                }
            },

            other => {
                warn!("Unsupported GPS sub-command: {}", other);
                vec![b'#']
            }
        }
    }

    /// Goto with tracking disabled leaves the mount drifting as soon as the
    /// slew lands, so optionally switch tracking on first.
    async fn auto_enable_tracking(&self, scope: &Telescope) {
        if !self.auto_track {
            return;
        }
        match scope.tracking().await {
            Ok(TrackingMode::NotTracking) => {
                if let Err(e) = scope.set_tracking(TrackingMode::AltAz).await {
                    warn!("Unable to auto-enable tracking: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Unable to get tracking mode: {}", e),
        }
    }

    async fn ra_dec_or_zero(&self, scope: &Telescope) -> (f64, f64) {
        scope.ra_dec().await.unwrap_or_else(|e| {
            warn!("Unable to get RA/Dec: {}", e);
            (0.0, 0.0)
        })
    }

    async fn azm_alt_or_zero(&self, scope: &Telescope) -> (f64, f64) {
        scope.azm_alt().await.unwrap_or_else(|e| {
            warn!("Unable to get Azm/Alt: {}", e);
            (0.0, 0.0)
        })
    }

    async fn site_or_zero(&self, scope: &Telescope) -> (f64, f64) {
        let lat = match scope.site_latitude().await {
            Ok(lat) => lat,
            Err(e) => {
                warn!("Unable to get site latitude: {}", e);
                0.0
            }
        };
        let long = match scope.site_longitude().await {
            Ok(long) => long,
            Err(e) => {
                warn!("Unable to get site longitude: {}", e);
                0.0
            }
        };
        (lat, long)
    }
}

fn steps_to_ra_dec(ra_steps: u32, dec_steps: u32, high_precision: bool) -> (f64, f64) {
    if high_precision {
        (
            angles::steps32_to_ra(ra_steps),
            angles::steps32_to_dec(dec_steps),
        )
    } else {
        (
            angles::steps16_to_ra(ra_steps as u16),
            angles::steps16_to_dec(dec_steps as u16),
        )
    }
}

/// NexStar rates run 0..9 per direction; ASCOM folds direction into the
/// sign of a -3..3 rate.
fn rate_to_ascom(positive: bool, rate: u8) -> i32 {
    let rate = match rate {
        0 => 0,
        1..=3 => 1,
        4..=6 => 2,
        _ => 3,
    };
    if positive {
        rate
    } else {
        -rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alpaca_client::AlpacaClient;
    use crate::test_server::MockAlpaca;
    use serde_json::json;
    use std::sync::Arc;

    async fn scope(mock: &MockAlpaca, mode: TrackingMode) -> Telescope {
        let client = Arc::new(AlpacaClient::new("127.0.0.1", mock.port(), 3));
        Telescope::new(0, mode, client)
    }

    #[test]
    fn frame_lengths() {
        assert_eq!(frame_length(b'K'), 2);
        assert_eq!(frame_length(b'E'), 1);
        assert_eq!(frame_length(b'P'), 8);
        assert_eq!(frame_length(b'S'), 10);
        assert_eq!(frame_length(b's'), 18);
        assert_eq!(frame_length(b'R'), 10);
        assert_eq!(frame_length(b'r'), 18);
        assert_eq!(frame_length(b'W'), 9);
        assert_eq!(frame_length(b'H'), 9);
        assert_eq!(frame_length(b'x'), 1);
    }

    #[test]
    fn rate_mapping() {
        assert_eq!(rate_to_ascom(true, 0), 0);
        assert_eq!(rate_to_ascom(true, 2), 1);
        assert_eq!(rate_to_ascom(true, 5), 2);
        assert_eq!(rate_to_ascom(true, 9), 3);
        assert_eq!(rate_to_ascom(false, 9), -3);
        assert_eq!(rate_to_ascom(false, 0), 0);
    }

    #[tokio::test]
    async fn low_precision_ra_dec_read() {
        let mock = MockAlpaca::start().await;
        mock.set_value("rightascension", json!(6.0)).await;
        mock.set_value("declination", json!(45.0)).await;
        let scope = scope(&mock, TrackingMode::AltAz).await;

        let reply = NexStar::new(true).execute(b"E", &scope).await;
        assert_eq!(reply, b"4000,2000#");
    }

    #[tokio::test]
    async fn high_precision_slew_with_auto_track() {
        let mock = MockAlpaca::start().await;
        mock.set_value("tracking", json!(false)).await;
        let scope = scope(&mock, TrackingMode::AltAz).await;

        let reply = NexStar::new(true)
            .execute(b"r40000000,20000000#", &scope)
            .await;
        assert_eq!(reply, b"#");

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 3);
        assert!(requests[0].starts_with("GET tracking"), "{}", requests[0]);
        assert!(requests[1].starts_with("PUT tracking"), "{}", requests[1]);
        assert!(requests[1].contains("Tracking=true"), "{}", requests[1]);
        assert!(
            requests[2].starts_with("PUT slewtocoordinatesasync"),
            "{}",
            requests[2]
        );
        assert!(requests[2].contains("RightAscension=6"), "{}", requests[2]);
        assert!(requests[2].contains("Declination=45"), "{}", requests[2]);
    }

    #[tokio::test]
    async fn slew_without_auto_track_skips_tracking() {
        let mock = MockAlpaca::start().await;
        let scope = scope(&mock, TrackingMode::AltAz).await;

        let reply = NexStar::new(false)
            .execute(b"r40000000,20000000#", &scope)
            .await;
        assert_eq!(reply, b"#");

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(
            requests[0].starts_with("PUT slewtocoordinatesasync"),
            "{}",
            requests[0]
        );
    }

    #[tokio::test]
    async fn set_site_location() {
        let mock = MockAlpaca::start().await;
        let scope = scope(&mock, TrackingMode::AltAz).await;

        let mut frame = vec![b'W'];
        frame.extend_from_slice(&[37, 20, 22, 0, 121, 53, 42, 0]);
        let reply = NexStar::new(true).execute(&frame, &scope).await;
        assert_eq!(reply, b"#");

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("PUT sitelatitude"), "{}", requests[0]);
        assert!(requests[0].contains("SiteLatitude=37.339"), "{}", requests[0]);
        assert!(
            requests[1].starts_with("PUT sitelongitude"),
            "{}",
            requests[1]
        );
        assert!(requests[1].contains("SiteLongitude=121.89"), "{}", requests[1]);
    }

    #[tokio::test]
    async fn abort_slew() {
        let mock = MockAlpaca::start().await;
        let scope = scope(&mock, TrackingMode::AltAz).await;

        let reply = NexStar::new(true).execute(b"M", &scope).await;
        assert_eq!(reply, b"#");

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("PUT abortslew"), "{}", requests[0]);
    }

    #[tokio::test]
    async fn azm_alt_read_uses_both_scales() {
        let mock = MockAlpaca::start().await;
        mock.set_value("azimuth", json!(180.0)).await;
        mock.set_value("altitude", json!(-45.0)).await;
        let scope = scope(&mock, TrackingMode::AltAz).await;

        let reply = NexStar::new(true).execute(b"Z", &scope).await;
        assert_eq!(reply, b"8000,E000#");
    }

    #[tokio::test]
    async fn axis_slew_passthrough() {
        let mock = MockAlpaca::start().await;
        let scope = scope(&mock, TrackingMode::AltAz).await;

        let frame = [b'P', 2, 17, 7, 9, 0, 0, 0];
        let reply = NexStar::new(true).execute(&frame, &scope).await;
        assert_eq!(reply, b"#");

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("PUT moveaxis"), "{}", requests[0]);
        assert!(requests[0].contains("Axis=1"), "{}", requests[0]);
        assert!(requests[0].contains("Rate=-3"), "{}", requests[0]);
    }

    #[tokio::test]
    async fn device_version_passthrough() {
        let mock = MockAlpaca::start().await;
        let scope = scope(&mock, TrackingMode::AltAz).await;
        let nexstar = NexStar::new(true);

        let frame = [b'P', 1, 176, 254, 0, 0, 0, 2];
        assert_eq!(nexstar.execute(&frame, &scope).await, vec![1, 6, b'#']);

        let frame = [b'P', 1, 16, 254, 0, 0, 0, 2];
        assert_eq!(nexstar.execute(&frame, &scope).await, vec![5, 0, b'#']);
    }

    #[tokio::test]
    async fn gps_passthrough_latitude() {
        let mock = MockAlpaca::start().await;
        mock.set_value("sitelatitude", json!(90.0)).await;
        let scope = scope(&mock, TrackingMode::AltAz).await;

        let frame = [b'P', 1, 176, 1, 0, 0, 0, 3];
        let reply = NexStar::new(true).execute(&frame, &scope).await;
        assert_eq!(reply, vec![0x40, 0x00, 0x00, b'#']);
    }

    #[tokio::test]
    async fn get_date_time() {
        let mock = MockAlpaca::start().await;
        mock.set_value("utcdate", json!("2021-03-04T05:06:07.00Z")).await;
        let scope = scope(&mock, TrackingMode::AltAz).await;

        let reply = NexStar::new(true).execute(b"h", &scope).await;
        assert_eq!(reply, vec![5, 6, 7, 3, 4, 21, 0, 0, b'#']);
    }

    #[tokio::test]
    async fn set_date_time_with_negative_zone() {
        let mock = MockAlpaca::start().await;
        let scope = scope(&mock, TrackingMode::AltAz).await;

        // 2021-03-04 05:06:07 UTC-8 (248 = 256 - 8)
        let frame = [b'H', 5, 6, 7, 3, 4, 21, 248];
        let mut full = frame.to_vec();
        full.push(0);
        let reply = NexStar::new(true).execute(&full, &scope).await;
        assert_eq!(reply, b"#");

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("PUT utcdate"), "{}", requests[0]);
        assert!(
            requests[0].contains("2021-03-04T05%3A06%3A07-08%3A00"),
            "{}",
            requests[0]
        );
    }

    #[tokio::test]
    async fn echo_and_static_replies() {
        let mock = MockAlpaca::start().await;
        let scope = scope(&mock, TrackingMode::AltAz).await;
        let nexstar = NexStar::new(true);

        assert_eq!(nexstar.execute(&[b'K', 0x42], &scope).await, vec![0x42, b'#']);
        assert_eq!(nexstar.execute(b"V", &scope).await, b"50#");
        assert_eq!(nexstar.execute(b"J", &scope).await, vec![1, b'#']);
        assert_eq!(nexstar.execute(b"m", &scope).await, b"12#");
        // unknown opcodes still get a terminator
        assert_eq!(nexstar.execute(b"x", &scope).await, b"#");
    }

    #[tokio::test]
    async fn tracking_mode_round_trip() {
        let mock = MockAlpaca::start().await;
        mock.set_value("tracking", json!(true)).await;
        let scope = scope(&mock, TrackingMode::EqNorth).await;
        let nexstar = NexStar::new(true);

        let reply = nexstar.execute(b"t", &scope).await;
        assert_eq!(reply, vec![TrackingMode::EqNorth as u8, b'#']);

        let reply = nexstar.execute(&[b'T', 2], &scope).await;
        assert_eq!(reply, b"#");
        let requests = mock.requests().await;
        assert!(requests[1].contains("Tracking=true"), "{}", requests[1]);
    }
}
