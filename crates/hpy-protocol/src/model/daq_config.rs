use serde::{Deserialize, Serialize};

/// Sensor acquisition configuration (`GET_DAQ_CONFIG` / `SET_DAQ_CONFIG`).
///
/// Field order follows the wire layout. Periods are milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaqConfig {
    pub version: u8,
    pub mode: u8,
    pub ambient_light_en: bool,
    pub ambient_light_period_ms: u32,
    pub ambient_temp_en: bool,
    pub ambient_temp_period_ms: u32,
    pub skin_temp_en: bool,
    pub skin_temp_period_ms: u32,
    pub ppg_cycle_time_ms: u32,
    pub ppg_interval_time_ms: u32,
    pub ppg_on_during_sleep_en: bool,
    pub compressed_sensing_en: bool,
    pub multi_spectral_en: bool,
    pub multi_spectral_period_ms: u32,
    pub sf_max_latency_ms: u32,
    pub ppg_fsr: u8,
    pub eda_sweep_en: bool,
    pub eda_sweep_period_ms: u32,
    pub acc_ulp_en: u8,
    pub opp_sample_en: bool,
    pub opp_sample_period_ms: u32,
    pub opp_sample_alt_mode: u8,
    pub memfault_config: u8,
    pub opp_sample_on_time_ms: u32,
    pub acc_2g_during_sleep_en: bool,
    pub acc_inactivity_config: u8,
    pub ppg_stop_config: u8,
    pub ppg_agc_channel_config: u8,
    pub sleep_thresh_config: u8,
    pub cs_mode: u8,
    pub reset_ring_cfg: u8,
    pub eda_sweep_param_cfg: u8,
    pub daily_daq_mode_cfg: u8,
}

const MODE_NAMES: [&str; 27] = [
    "ALL_SENSORS_OFF",
    "ACC_EDA_ONLY",
    "ACC_ONLY",
    "IR_HR",
    "SPO2_50",
    "SPO2_100",
    "G_IR_HR_50",
    "G_IR_HR_100",
    "G_IR_HR_200",
    "IR_HR_200_1",
    "IR_HR_200_2",
    "SPO2_200",
    "PTT_100",
    "ACC_HI_FREQ_LO_RES",
    "IR_HR_400",
    "G_HR_400",
    "R_HR_400",
    "ACC_ONLY_LP_1",
    "ACC_ONLY_LP_2",
    "RGBIR_50",
    "RGBIR_100",
    "PTT_200",
    "ACC_52_8G",
    "ACC_52_2G",
    "ACC_104_EDA",
    "RGBIR_100_ACC_104_8G",
    "RGBIR_100_ACC_104_2G",
];

impl DaqConfig {
    pub fn mode_string(&self) -> String {
        MODE_NAMES
            .get(self.mode as usize)
            .map(|name| name.to_string())
            .unwrap_or_else(|| format!("Unknown({})", self.mode))
    }

    pub fn cs_mode_string(&self) -> String {
        match self.cs_mode {
            0 => "Off".into(),
            1 => "On".into(),
            other => format!("Unknown({})", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names() {
        let mut config = DaqConfig::default();
        assert_eq!(config.mode_string(), "ALL_SENSORS_OFF");
        config.mode = 26;
        assert_eq!(config.mode_string(), "RGBIR_100_ACC_104_2G");
        config.mode = 27;
        assert_eq!(config.mode_string(), "Unknown(27)");
    }
}
