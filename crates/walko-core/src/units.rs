//! Distance and speed conversions
//!
//! One rotation of the belt roller covers 34.56 cm.

pub const CM_PER_ROTATION: f32 = 34.56;
pub const METERS_PER_MILE: f32 = 1609.344;
pub const METERS_PER_KM: f32 = 1000.0;

pub const MILES_PER_ROTATION: f32 = CM_PER_ROTATION / 100.0 / METERS_PER_MILE;
pub const KM_PER_ROTATION: f32 = CM_PER_ROTATION / 100.0 / METERS_PER_KM;

/// Unit the user reads distances in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DistanceUnit {
    #[default]
    Miles,
    Kilometers,
}

impl DistanceUnit {
    pub const fn from_metric(metric: bool) -> Self {
        if metric { Self::Kilometers } else { Self::Miles }
    }

    pub const fn per_rotation(self) -> f32 {
        match self {
            Self::Miles => MILES_PER_ROTATION,
            Self::Kilometers => KM_PER_ROTATION,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Miles => "mi",
            Self::Kilometers => "km",
        }
    }

    pub const fn speed_label(self) -> &'static str {
        match self {
            Self::Miles => "mph",
            Self::Kilometers => "km/h",
        }
    }

    pub fn distance(self, rotations: u32) -> f32 {
        rotations as f32 * self.per_rotation()
    }

    /// Whole rotations covering `distance`; negative or NaN input gives 0
    pub fn rotations(self, distance: f32) -> u32 {
        let rotations = distance / self.per_rotation();
        if rotations.is_nan() || rotations <= 0.0 {
            0
        } else if rotations >= u32::MAX as f32 {
            u32::MAX
        } else {
            rotations as u32
        }
    }

    /// Speed in this unit per hour for a rotation rate
    pub fn speed(self, rotations_per_second: f32) -> f32 {
        rotations_per_second * 3600.0 * self.per_rotation()
    }
}

/// Whole seconds in `hours`, clamped like [`DistanceUnit::rotations`]
pub fn hours_to_seconds(hours: f32) -> u32 {
    let seconds = hours * 3600.0;
    if seconds.is_nan() || seconds <= 0.0 {
        0
    } else if seconds >= u32::MAX as f32 {
        u32::MAX
    } else {
        seconds as u32
    }
}
