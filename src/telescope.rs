use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use std::sync::Arc;

use crate::alpaca_client::{AlpacaClient, AlpacaError, AlpacaResult, AxisRate};

const DEVICE: &str = "telescope";

/// NexStar tracking modes.  Alpaca only knows a tracking boolean, so the
/// gateway maps "on" to whichever mode matches the configured mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    NotTracking = 0,
    AltAz = 1,
    EqNorth = 2,
    EqSouth = 3,
}

impl TrackingMode {
    pub fn from_byte(value: u8) -> Self {
        match value {
            1 => TrackingMode::AltAz,
            2 => TrackingMode::EqNorth,
            3 => TrackingMode::EqSouth,
            _ => TrackingMode::NotTracking,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentMode {
    AltAz,
    Polar,
    GermanPolar,
}

impl AlignmentMode {
    fn from_i32(value: i32) -> Self {
        match value {
            1 => AlignmentMode::Polar,
            2 => AlignmentMode::GermanPolar,
            _ => AlignmentMode::AltAz,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    AzmRa = 0,
    AltDec = 1,
}

/// Binding of one Alpaca telescope device: its id, the tracking preference
/// chosen at startup, and the shared HTTP client.
#[derive(Debug)]
pub struct Telescope {
    client: Arc<AlpacaClient>,
    pub id: u32,
    pub tracking_mode: TrackingMode,
}

impl Telescope {
    pub fn new(id: u32, tracking_mode: TrackingMode, client: Arc<AlpacaClient>) -> Self {
        Self {
            client,
            id,
            tracking_mode,
        }
    }

    pub async fn name(&self) -> AlpacaResult<String> {
        self.client.get_string(DEVICE, self.id, "name").await
    }

    pub async fn description(&self) -> AlpacaResult<String> {
        self.client.get_string(DEVICE, self.id, "description").await
    }

    pub async fn connected(&self) -> AlpacaResult<bool> {
        self.client.get_bool(DEVICE, self.id, "connected").await
    }

    pub async fn supported_actions(&self) -> AlpacaResult<Vec<String>> {
        self.client
            .get_string_list(DEVICE, self.id, "supportedactions")
            .await
    }

    pub async fn alignment_mode(&self) -> AlpacaResult<AlignmentMode> {
        let mode = self.client.get_i32(DEVICE, self.id, "alignmentmode").await?;
        Ok(AlignmentMode::from_i32(mode))
    }

    pub async fn altitude(&self) -> AlpacaResult<f64> {
        self.client.get_f64(DEVICE, self.id, "altitude").await
    }

    pub async fn azimuth(&self) -> AlpacaResult<f64> {
        self.client.get_f64(DEVICE, self.id, "azimuth").await
    }

    pub async fn declination(&self) -> AlpacaResult<f64> {
        self.client.get_f64(DEVICE, self.id, "declination").await
    }

    pub async fn right_ascension(&self) -> AlpacaResult<f64> {
        self.client.get_f64(DEVICE, self.id, "rightascension").await
    }

    pub async fn can_park(&self) -> AlpacaResult<bool> {
        self.client.get_bool(DEVICE, self.id, "canpark").await
    }

    pub async fn can_find_home(&self) -> AlpacaResult<bool> {
        self.client.get_bool(DEVICE, self.id, "canfindhome").await
    }

    pub async fn can_slew(&self) -> AlpacaResult<bool> {
        self.client.get_bool(DEVICE, self.id, "canslew").await
    }

    pub async fn can_slew_altaz(&self) -> AlpacaResult<bool> {
        self.client.get_bool(DEVICE, self.id, "canslewaltaz").await
    }

    pub async fn can_slew_async(&self) -> AlpacaResult<bool> {
        self.client.get_bool(DEVICE, self.id, "canslewasync").await
    }

    pub async fn can_slew_altaz_async(&self) -> AlpacaResult<bool> {
        self.client
            .get_bool(DEVICE, self.id, "canslewaltazasync")
            .await
    }

    pub async fn slewing(&self) -> AlpacaResult<bool> {
        self.client.get_bool(DEVICE, self.id, "slewing").await
    }

    pub async fn site_latitude(&self) -> AlpacaResult<f64> {
        self.client.get_f64(DEVICE, self.id, "sitelatitude").await
    }

    pub async fn site_longitude(&self) -> AlpacaResult<f64> {
        self.client.get_f64(DEVICE, self.id, "sitelongitude").await
    }

    pub async fn target_declination(&self) -> AlpacaResult<f64> {
        self.client
            .get_f64(DEVICE, self.id, "targetdeclination")
            .await
    }

    pub async fn target_right_ascension(&self) -> AlpacaResult<f64> {
        self.client
            .get_f64(DEVICE, self.id, "targetrightascension")
            .await
    }

    /// The tracking state mapped through the configured mount preference:
    /// Alpaca only reports a boolean.
    pub async fn tracking(&self) -> AlpacaResult<TrackingMode> {
        let tracking = self.client.get_bool(DEVICE, self.id, "tracking").await?;
        if tracking {
            Ok(self.tracking_mode)
        } else {
            Ok(TrackingMode::NotTracking)
        }
    }

    /// UTC date as ISO 8601 with fractional seconds.
    pub async fn utc_date(&self) -> AlpacaResult<DateTime<Utc>> {
        let text = self.client.get_string(DEVICE, self.id, "utcdate").await?;
        if text.is_empty() {
            // sometimes we get no error, but an empty string
            return Err(AlpacaError::InvalidResponse(
                "got an empty UTCDate string".to_string(),
            ));
        }
        if let Ok(date) = DateTime::parse_from_rfc3339(&text) {
            return Ok(date.with_timezone(&Utc));
        }
        // some servers omit the zone suffix; those dates are already UTC
        chrono::NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| AlpacaError::InvalidResponse(format!("bad UTCDate '{}': {}", text, e)))
    }

    /// The Minimum/Maximum rate (deg/sec) the given axis can move.
    pub async fn axis_rates(&self, axis: Axis) -> AlpacaResult<AxisRate> {
        self.client
            .get_axis_rates(DEVICE, self.id, axis as i32)
            .await
    }

    pub async fn set_connected(&self, connected: bool) -> AlpacaResult<()> {
        self.client
            .put(
                DEVICE,
                self.id,
                "connected",
                &[("Connected", connected.to_string())],
            )
            .await
    }

    pub async fn move_axis(&self, axis: Axis, rate: i32) -> AlpacaResult<()> {
        self.client
            .put(
                DEVICE,
                self.id,
                "moveaxis",
                &[
                    ("Axis", (axis as i32).to_string()),
                    ("Rate", rate.to_string()),
                ],
            )
            .await
    }

    pub async fn sync_to_coordinates(&self, ra: f64, dec: f64) -> AlpacaResult<()> {
        self.client
            .put(
                DEVICE,
                self.id,
                "synctocoordinates",
                &[
                    ("RightAscension", ra.to_string()),
                    ("Declination", dec.to_string()),
                ],
            )
            .await
    }

    pub async fn slew_to_coordinates_async(&self, ra: f64, dec: f64) -> AlpacaResult<()> {
        self.client
            .put(
                DEVICE,
                self.id,
                "slewtocoordinatesasync",
                &[
                    ("RightAscension", ra.to_string()),
                    ("Declination", dec.to_string()),
                ],
            )
            .await
    }

    pub async fn slew_to_coordinates(&self, ra: f64, dec: f64) -> AlpacaResult<()> {
        self.client
            .put(
                DEVICE,
                self.id,
                "slewtocoordinates",
                &[
                    ("RightAscension", ra.to_string()),
                    ("Declination", dec.to_string()),
                ],
            )
            .await
    }

    pub async fn set_site_latitude(&self, latitude: f64) -> AlpacaResult<()> {
        self.client
            .put(
                DEVICE,
                self.id,
                "sitelatitude",
                &[("SiteLatitude", latitude.to_string())],
            )
            .await
    }

    pub async fn set_site_longitude(&self, longitude: f64) -> AlpacaResult<()> {
        self.client
            .put(
                DEVICE,
                self.id,
                "sitelongitude",
                &[("SiteLongitude", longitude.to_string())],
            )
            .await
    }

    pub async fn set_target_right_ascension(&self, ra: f64) -> AlpacaResult<()> {
        self.client
            .put(
                DEVICE,
                self.id,
                "targetrightascension",
                &[("TargetRightAscension", ra.to_string())],
            )
            .await
    }

    pub async fn set_target_declination(&self, dec: f64) -> AlpacaResult<()> {
        self.client
            .put(
                DEVICE,
                self.id,
                "targetdeclination",
                &[("TargetDeclination", dec.to_string())],
            )
            .await
    }

    pub async fn set_utc_date(&self, date: DateTime<FixedOffset>) -> AlpacaResult<()> {
        self.client
            .put(
                DEVICE,
                self.id,
                "utcdate",
                &[(
                    "UTCDate",
                    date.to_rfc3339_opts(SecondsFormat::Secs, true),
                )],
            )
            .await
    }

    pub async fn abort_slew(&self) -> AlpacaResult<()> {
        self.client.put(DEVICE, self.id, "abortslew", &[]).await
    }

    pub async fn slew_to_target_async(&self) -> AlpacaResult<()> {
        self.client
            .put(DEVICE, self.id, "slewtotargetasync", &[])
            .await
    }

    pub async fn sync_to_target(&self) -> AlpacaResult<()> {
        self.client.put(DEVICE, self.id, "synctotarget", &[]).await
    }

    pub async fn set_tracking(&self, tracking: TrackingMode) -> AlpacaResult<()> {
        let enable = tracking != TrackingMode::NotTracking;
        self.client
            .put(
                DEVICE,
                self.id,
                "tracking",
                &[("Tracking", enable.to_string())],
            )
            .await
    }

    /// RA (hours) and Dec (degrees) together.
    pub async fn ra_dec(&self) -> AlpacaResult<(f64, f64)> {
        let ra = self.right_ascension().await?;
        let dec = self.declination().await?;
        Ok((ra, dec))
    }

    /// Azimuth and altitude (degrees) together.
    pub async fn azm_alt(&self) -> AlpacaResult<(f64, f64)> {
        let azm = self.azimuth().await?;
        let alt = self.altitude().await?;
        Ok((azm, alt))
    }
}
