#![forbid(unsafe_code)]

//! Closed enumeration of editable station fields.
//!
//! Every [`StationField`] is statically bound to a [`FieldSpec`] (type,
//! required-ness, and optional domain). Coercion from raw input goes through
//! [`StationField::coerce`], which never fails: unparseable numbers become
//! "unset" (or the field default), and out-of-domain numbers are clamped to
//! the nearest bound.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Latitude domain (degrees).
pub const LATITUDE_RANGE: (f64, f64) = (8.066_666_7, 37.100);
/// Longitude domain (degrees).
pub const LONGITUDE_RANGE: (f64, f64) = (68.066_666_7, 92.100);
/// Coverage radius domain (km).
pub const SAFE_RADIUS_RANGE: (f64, f64) = (7.0, 25.0);
/// Frequency slot domain.
pub const FREQUENCY_RANGE: (f64, f64) = (1.0, 7.0);

pub const DEFAULT_SAFE_RADIUS_KM: f64 = 12.0;
pub const DEFAULT_ALLOCATED_FREQUENCY: u8 = 4;

/// Maximum number of digits in a Kavach ID.
pub const KAVACH_ID_MAX_LEN: usize = 10;

/// Declared storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Int,
    Float,
}

/// Static description of a field: type, required-ness, and domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl FieldSpec {
    #[must_use]
    pub const fn text(required: bool) -> Self {
        Self {
            kind: FieldKind::Text,
            required,
            min: None,
            max: None,
        }
    }

    #[must_use]
    pub const fn numeric(kind: FieldKind, required: bool, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            kind,
            required,
            min,
            max,
        }
    }

    /// Clamp `value` into `[min, max]`, honoring whichever bounds exist.
    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        let mut v = value;
        if let Some(min) = self.min
            && v < min
        {
            v = min;
        }
        if let Some(max) = self.max
            && v > max
        {
            v = max;
        }
        v
    }
}

/// A field of a planning station that the user can edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StationField {
    KavachId,
    StationCode,
    StationName,
    Latitude,
    Longitude,
    OptimumStaticProfileTransfer,
    OnboardSlots,
    SafeRadiusKm,
    AllocatedFrequency,
}

impl StationField {
    /// All fields in card display order.
    pub const ALL: [StationField; 9] = [
        StationField::KavachId,
        StationField::StationCode,
        StationField::StationName,
        StationField::Latitude,
        StationField::Longitude,
        StationField::OptimumStaticProfileTransfer,
        StationField::OnboardSlots,
        StationField::SafeRadiusKm,
        StationField::AllocatedFrequency,
    ];

    #[must_use]
    pub const fn spec(self) -> FieldSpec {
        match self {
            Self::KavachId | Self::StationCode | Self::StationName => FieldSpec::text(true),
            Self::Latitude => FieldSpec::numeric(
                FieldKind::Float,
                true,
                Some(LATITUDE_RANGE.0),
                Some(LATITUDE_RANGE.1),
            ),
            Self::Longitude => FieldSpec::numeric(
                FieldKind::Float,
                true,
                Some(LONGITUDE_RANGE.0),
                Some(LONGITUDE_RANGE.1),
            ),
            Self::OptimumStaticProfileTransfer | Self::OnboardSlots => {
                FieldSpec::numeric(FieldKind::Int, true, Some(0.0), None)
            }
            Self::SafeRadiusKm => FieldSpec::numeric(
                FieldKind::Float,
                false,
                Some(SAFE_RADIUS_RANGE.0),
                Some(SAFE_RADIUS_RANGE.1),
            ),
            Self::AllocatedFrequency => FieldSpec::numeric(
                FieldKind::Int,
                false,
                Some(FREQUENCY_RANGE.0),
                Some(FREQUENCY_RANGE.1),
            ),
        }
    }

    /// Wire/storage name of the field (camelCase).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::KavachId => "kavachId",
            Self::StationCode => "stationCode",
            Self::StationName => "stationName",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
            Self::OptimumStaticProfileTransfer => "optimumStaticProfileTransfer",
            Self::OnboardSlots => "onboardSlots",
            Self::SafeRadiusKm => "safeRadiusKm",
            Self::AllocatedFrequency => "allocatedFrequency",
        }
    }

    /// Human-readable label used in validation messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::KavachId => "Stationary Kavach ID",
            Self::StationCode => "Station Code",
            Self::StationName => "Station Name",
            Self::Latitude => "Stationary Unit Tower Latitude",
            Self::Longitude => "Stationary Unit Tower Longitude",
            Self::OptimumStaticProfileTransfer => {
                "Optimum no. of Simultaneous Exclusive Static Profile Transfer"
            }
            Self::OnboardSlots => "Onboard Slots",
            Self::SafeRadiusKm => "Radius (km)",
            Self::AllocatedFrequency => "Frequency",
        }
    }

    /// Value a freshly added station carries for this field.
    #[must_use]
    pub fn default_value(self) -> FieldValue {
        match self {
            Self::KavachId | Self::StationCode | Self::StationName => {
                FieldValue::Text(String::new())
            }
            Self::Latitude | Self::Longitude => FieldValue::Float(None),
            Self::OptimumStaticProfileTransfer | Self::OnboardSlots => FieldValue::Int(Some(0)),
            Self::SafeRadiusKm => FieldValue::Float(Some(DEFAULT_SAFE_RADIUS_KM)),
            Self::AllocatedFrequency => {
                FieldValue::Int(Some(i64::from(DEFAULT_ALLOCATED_FREQUENCY)))
            }
        }
    }

    /// Whether an unparseable value falls back to the field default instead
    /// of becoming unset. True for the slider-driven fields.
    #[must_use]
    pub const fn has_fallback(self) -> bool {
        matches!(self, Self::SafeRadiusKm | Self::AllocatedFrequency)
    }

    /// Coerce raw user input into a typed, clamped value.
    #[must_use]
    pub fn coerce(self, raw: &str) -> FieldValue {
        let spec = self.spec();
        let coerced = match spec.kind {
            FieldKind::Text => {
                if self == Self::KavachId {
                    FieldValue::Text(sanitize_kavach_id(raw))
                } else {
                    FieldValue::Text(raw.to_owned())
                }
            }
            FieldKind::Float => FieldValue::Float(parse_float(raw)),
            FieldKind::Int => FieldValue::Int(parse_int(raw)),
        };
        self.normalize(coerced)
    }

    /// Bring an already-typed value into this field's type and domain.
    ///
    /// Mismatched kinds are converted where it makes sense (a float assigned
    /// to an int field is truncated, a number assigned to a text field is
    /// formatted).
    #[must_use]
    pub fn normalize(self, value: FieldValue) -> FieldValue {
        let spec = self.spec();
        let typed = match (spec.kind, value) {
            (FieldKind::Text, FieldValue::Text(s)) => {
                if self == Self::KavachId {
                    FieldValue::Text(sanitize_kavach_id(&s))
                } else {
                    FieldValue::Text(s)
                }
            }
            (FieldKind::Text, other) => return self.coerce(&other.to_raw()),
            (FieldKind::Float, FieldValue::Float(v)) => {
                FieldValue::Float(v.filter(|f| f.is_finite()).map(|f| spec.clamp(f)))
            }
            (FieldKind::Float, FieldValue::Int(v)) => {
                FieldValue::Float(v.map(|i| spec.clamp(i as f64)))
            }
            (FieldKind::Float, FieldValue::Text(s)) => {
                FieldValue::Float(parse_float(&s).map(|f| spec.clamp(f)))
            }
            (FieldKind::Int, FieldValue::Int(v)) => FieldValue::Int(v.map(|i| clamp_int(&spec, i))),
            (FieldKind::Int, FieldValue::Float(v)) => FieldValue::Int(
                v.filter(|f| f.is_finite())
                    .map(|f| clamp_int(&spec, f.trunc() as i64)),
            ),
            (FieldKind::Int, FieldValue::Text(s)) => {
                FieldValue::Int(parse_int(&s).map(|i| clamp_int(&spec, i)))
            }
        };
        if typed.is_unset() && self.has_fallback() {
            return self.default_value();
        }
        typed
    }
}

impl fmt::Display for StationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A field name that does not belong to the closed [`StationField`] set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown station field `{0}`")]
pub struct UnknownField(pub String);

impl FromStr for StationField {
    type Err = UnknownField;

    /// Accepts the camelCase storage names as well as the legacy form
    /// control names (`KavachID`, `safe_radius_km`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field = match s {
            "kavachId" | "KavachID" => Self::KavachId,
            "stationCode" | "StationCode" => Self::StationCode,
            "stationName" => Self::StationName,
            "latitude" => Self::Latitude,
            "longitude" => Self::Longitude,
            "optimumStaticProfileTransfer" | "optimum_static_profile_transfer" => {
                Self::OptimumStaticProfileTransfer
            }
            "onboardSlots" | "onboard_slots" => Self::OnboardSlots,
            "safeRadiusKm" | "safe_radius_km" => Self::SafeRadiusKm,
            "allocatedFrequency" | "allocated_frequency" => Self::AllocatedFrequency,
            other => return Err(UnknownField(other.to_owned())),
        };
        Ok(field)
    }
}

/// A typed field value after coercion. `None` means "unset".
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(Option<i64>),
    Float(Option<f64>),
}

impl FieldValue {
    #[must_use]
    pub fn is_unset(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::Int(v) => v.is_none(),
            Self::Float(v) => v.is_none(),
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Text(s) => parse_float(s),
            Self::Int(v) => v.map(|i| i as f64),
            Self::Float(v) => *v,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value the way an input control would show it; unset is "".
    #[must_use]
    pub fn to_raw(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Int(Some(i)) => i.to_string(),
            Self::Float(Some(f)) => f.to_string(),
            Self::Int(None) | Self::Float(None) => String::new(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_raw())
    }
}

fn sanitize_kavach_id(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_digit)
        .take(KAVACH_ID_MAX_LEN)
        .collect()
}

fn clamp_int(spec: &FieldSpec, value: i64) -> i64 {
    let mut v = value;
    if let Some(min) = spec.min {
        v = v.max(min as i64);
    }
    if let Some(max) = spec.max {
        v = v.min(max as i64);
    }
    v
}

pub(crate) fn parse_float(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Integers accept a fractional form and truncate it, like a number input
/// feeding an integer slot.
pub(crate) fn parse_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(i);
    }
    parse_float(trimmed).map(|f| f.trunc() as i64)
}
