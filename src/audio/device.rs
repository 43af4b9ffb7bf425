// Device profiles - per-device volume normalization values
//
// Profiles are plain values injected into AudioManager and PitchEngine.
// Classification is a pure function of a platform hint string.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Pc,
    IPhone,
    IPad,
}

/// Read-only record consumed by volume normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub device_class: DeviceClass,
    /// Default microphone gain
    pub sensitivity: f32,
    pub noise_gate: f32,
    pub divisor: f32,
    pub gain_compensation: f32,
    pub noise_threshold: f32,
}

impl DeviceProfile {
    pub fn pc() -> Self {
        Self {
            device_class: DeviceClass::Pc,
            sensitivity: 1.0,
            noise_gate: 0.02,
            divisor: 6.0,
            gain_compensation: 1.0,
            noise_threshold: 5.0,
        }
    }

    pub fn iphone() -> Self {
        Self {
            device_class: DeviceClass::IPhone,
            sensitivity: 2.0,
            noise_gate: 0.018,
            divisor: 4.0,
            gain_compensation: 1.5,
            noise_threshold: 12.0,
        }
    }

    pub fn ipad() -> Self {
        Self {
            device_class: DeviceClass::IPad,
            sensitivity: 7.0,
            noise_gate: 0.01,
            divisor: 4.0,
            gain_compensation: 1.5,
            noise_threshold: 12.0,
        }
    }

    pub fn for_class(class: DeviceClass) -> Self {
        match class {
            DeviceClass::Pc => Self::pc(),
            DeviceClass::IPhone => Self::iphone(),
            DeviceClass::IPad => Self::ipad(),
        }
    }

    /// Map a mean-absolute level to a 0..=100 volume percentage.
    pub fn volume_percent(&self, level: f32) -> f32 {
        let scaled = level * self.gain_compensation * 100.0 / self.divisor * 6.0;
        (scaled - self.noise_threshold).clamp(0.0, 100.0)
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::pc()
    }
}

/// Coarse classification from a platform hint (user agent, OS name, model).
pub fn classify_device(hint: &str) -> DeviceClass {
    let hint = hint.to_ascii_lowercase();
    if hint.contains("ipad") {
        DeviceClass::IPad
    } else if hint.contains("iphone") || hint.contains("ipod") {
        DeviceClass::IPhone
    } else {
        DeviceClass::Pc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(classify_device("Mozilla/5.0 (iPad; CPU OS 17_0)"), DeviceClass::IPad);
        assert_eq!(classify_device("iPhone14,2"), DeviceClass::IPhone);
        assert_eq!(classify_device("linux x86_64"), DeviceClass::Pc);
    }

    #[test]
    fn test_profiles_by_class() {
        assert_eq!(DeviceProfile::for_class(DeviceClass::IPad).sensitivity, 7.0);
        assert_eq!(DeviceProfile::for_class(DeviceClass::IPhone).divisor, 4.0);
        assert_eq!(DeviceProfile::default(), DeviceProfile::pc());
    }

    #[test]
    fn test_volume_percent_scaling() {
        let pc = DeviceProfile::pc();
        assert_eq!(pc.volume_percent(0.0), 0.0);
        // 0.1 * 100 / 6 * 6 - 5 = 5
        assert!((pc.volume_percent(0.1) - 5.0).abs() < 1e-4);
        assert_eq!(pc.volume_percent(10.0), 100.0);
    }
}
