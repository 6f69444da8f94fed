use serde::{Deserialize, Serialize};

/// A reconstructed multi-strip detector signal
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Cluster {
    pub event: u64,
    pub adc: f32,
    pub position_x: f32,
    pub size: u32,
    pub time_bin: i32,
    pub eta: i32,
    pub phi: i32,
}

/// A single strip detector signal
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Hit {
    pub event: u64,
    pub adc: f32,
    pub position_x: f32,
    pub strip: i32,
    pub time_bin: i32,
    pub eta: i32,
    pub phi: i32,
}

/// Selection cuts applied to clusters before they are given to the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSelection {
    pub adc_noise: f32,
    pub size_min: u32,
    pub size_max: u32,
    pub time_min: i32,
    pub time_max: i32,
}

impl Default for ClusterSelection {
    fn default() -> Self {
        Self {
            adc_noise: 0.0,
            size_min: 1,
            size_max: 20,
            time_min: 0,
            time_max: 30,
        }
    }
}

impl ClusterSelection {
    pub fn passes(&self, cluster: &Cluster) -> bool {
        cluster.adc >= self.adc_noise
            && cluster.size >= self.size_min
            && cluster.size <= self.size_max
            && cluster.time_bin >= self.time_min
            && cluster.time_bin <= self.time_max
    }
}

/// Selection cuts applied to hits before they are given to the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitSelection {
    pub adc_noise: f32,
    pub adc_saturation: f32,
    pub time_min: i32,
    pub time_max: i32,
}

impl Default for HitSelection {
    fn default() -> Self {
        Self {
            adc_noise: 0.0,
            adc_saturation: 1500.0,
            time_min: 0,
            time_max: 30,
        }
    }
}

impl HitSelection {
    pub fn passes(&self, hit: &Hit) -> bool {
        hit.adc >= self.adc_noise
            && hit.adc < self.adc_saturation
            && hit.time_bin >= self.time_min
            && hit.time_bin <= self.time_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_selection() {
        let selection = ClusterSelection {
            adc_noise: 50.0,
            size_min: 2,
            size_max: 5,
            time_min: 1,
            time_max: 10,
        };
        let good = Cluster {
            adc: 100.0,
            size: 3,
            time_bin: 4,
            ..Default::default()
        };
        assert!(selection.passes(&good));
        assert!(!selection.passes(&Cluster { adc: 10.0, ..good }));
        assert!(!selection.passes(&Cluster { size: 6, ..good }));
        assert!(!selection.passes(&Cluster { time_bin: 0, ..good }));
    }

    #[test]
    fn test_hit_saturation() {
        let selection = HitSelection::default();
        let hit = Hit {
            adc: 1500.0,
            time_bin: 3,
            ..Default::default()
        };
        assert!(!selection.passes(&hit));
        assert!(selection.passes(&Hit { adc: 200.0, ..hit }));
    }
}
