//! Heart-rate based energy expenditure.
//!
//! Uses the Keytel et al. (2005) regression, which predicts kJ/min from heart
//! rate, weight and age, converted to kcal/min.

/// Kilojoules per kilocalorie.
const KJ_PER_KCAL: f64 = 4.184;

/// Biological sex, selecting the regression coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Sex {
    /// Male coefficients.
    #[default]
    Male,
    /// Female coefficients.
    Female,
}

/// Personal parameters of the regression.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BodyProfile {
    /// Biological sex.
    pub sex: Sex,
    /// Body weight in kilograms.
    pub weight_kg: f64,
    /// Age in years.
    pub age_years: u32,
}

impl Default for BodyProfile {
    /// Male, 75 kg, 35 years.
    fn default() -> Self {
        Self {
            sex: Sex::Male,
            weight_kg: 75.0,
            age_years: 35,
        }
    }
}

/// Maps a heart rate to an energy rate.
pub trait EnergyEstimator: Send + Sync {
    /// Estimated expenditure in kcal per minute at `bpm`.
    fn kcal_per_minute(&self, bpm: u8) -> f64;
}

/// Keytel regression estimator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalorieEstimator {
    profile: BodyProfile,
}

impl CalorieEstimator {
    /// Create an estimator for a body profile.
    pub fn new(profile: BodyProfile) -> Self {
        Self { profile }
    }

    /// The profile in use.
    pub fn profile(&self) -> &BodyProfile {
        &self.profile
    }
}

impl EnergyEstimator for CalorieEstimator {
    /// Negative predictions (very low heart rates) are reported as zero.
    fn kcal_per_minute(&self, bpm: u8) -> f64 {
        let hr = f64::from(bpm);
        let kg = self.profile.weight_kg;
        let age = f64::from(self.profile.age_years);

        let kj_per_minute = match self.profile.sex {
            Sex::Male => -55.0969 + 0.6309 * hr + 0.1988 * kg + 0.2017 * age,
            Sex::Female => -20.4022 + 0.4472 * hr - 0.1263 * kg + 0.074 * age,
        };

        (kj_per_minute / KJ_PER_KCAL).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_default_profile() {
        let profile = BodyProfile::default();
        assert_eq!(profile.sex, Sex::Male);
        assert_eq!(profile.weight_kg, 75.0);
        assert_eq!(profile.age_years, 35);
    }

    #[test]
    fn test_male_regression() {
        let estimator = CalorieEstimator::default();
        // (-55.0969 + 0.6309*120 + 0.1988*75 + 0.2017*35) / 4.184
        let expected = (-55.0969 + 75.708 + 14.91 + 7.0595) / 4.184;
        assert!(approx(estimator.kcal_per_minute(120), expected));
    }

    #[test]
    fn test_female_regression() {
        let estimator = CalorieEstimator::new(BodyProfile {
            sex: Sex::Female,
            weight_kg: 60.0,
            age_years: 30,
        });
        let expected = (-20.4022 + 0.4472 * 140.0 - 0.1263 * 60.0 + 0.074 * 30.0) / 4.184;
        assert!(approx(estimator.kcal_per_minute(140), expected));
    }

    #[test]
    fn test_rate_increases_with_heart_rate() {
        let estimator = CalorieEstimator::default();
        assert!(estimator.kcal_per_minute(150) > estimator.kcal_per_minute(100));
    }

    #[test]
    fn test_low_heart_rate_is_not_negative() {
        let estimator = CalorieEstimator::default();
        assert_eq!(estimator.kcal_per_minute(1), 0.0);
    }
}
