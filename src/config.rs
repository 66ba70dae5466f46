use confique::Config;
use serde::Deserialize;

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub measurement: MeasurementSettings,
    /// One entry per board, indexed by board number.
    pub cameras: Vec<CameraSettings>,
    #[config(nested)]
    pub sim: SimSettings,
}

#[derive(Config, Debug, Clone, PartialEq, Eq)]
pub struct MeasurementSettings {
    /// Bit n selects board n.
    #[config(default = 1, env = "LSC_BOARD_SEL")]
    pub board_sel: u32,
    /// Samples per block.
    #[config(env = "LSC_NOS")]
    pub nos: u32,
    /// Blocks per measurement.
    #[config(env = "LSC_NOB")]
    pub nob: u32,
    #[config(default = false)]
    pub continuous: bool,
    #[config(default = 0)]
    pub cont_pause_in_microseconds: u64,
    /// Backoff of every busy-wait; 0 yields instead of sleeping.
    #[config(default = 0)]
    pub poll_interval_us: u64,
}

impl MeasurementSettings {
    /// Selected board numbers in increasing order.
    pub fn selected_boards(&self) -> impl Iterator<Item = usize> + '_ {
        (0..u32::BITS as usize).filter(move |drvno| (self.board_sel >> drvno) & 1 == 1)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CameraSettings {
    pub pixel: u32,
    /// Cameras on the fiber. 0 disables the camera presence check.
    pub camcnt: u32,
    pub dma_buffer_size_in_scans: u32,
    pub use_software_polling: bool,
    pub write_to_disk: bool,
    pub use_sw_trig: bool,
    pub sti_mode: u8,
    pub bti_mode: u8,
    pub stime_in_microsec: u32,
    pub btime_in_microsec: u32,
    /// Scan trigger slope: 0 high, 1 low, 2 both.
    pub sslope: u8,
    /// Block trigger slope: 0 negative, 1 positive, 2 both.
    pub bslope: u32,
    pub sdat_in_10ns: u32,
    pub bdat_in_10ns: u32,
    pub bec_in_10ns: u32,
    pub xckdelay_in_10ns: u32,
    /// Trigger input divider, 0 disables it.
    pub ticnt: u8,
    /// Trigger output divider, 0 disables it.
    pub tocnt: u8,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            pixel: 1088,
            camcnt: 1,
            dma_buffer_size_in_scans: 1000,
            use_software_polling: true,
            write_to_disk: false,
            use_sw_trig: false,
            sti_mode: 4,
            bti_mode: 4,
            stime_in_microsec: 1000,
            btime_in_microsec: 1_000_000,
            sslope: 0,
            bslope: 1,
            sdat_in_10ns: 0,
            bdat_in_10ns: 0,
            bec_in_10ns: 0,
            xckdelay_in_10ns: 0,
            ticnt: 0,
            tocnt: 0,
        }
    }
}

#[derive(Config, Debug, Clone)]
pub struct SimSettings {
    #[config(default = 1)]
    pub boards: usize,
    /// Time between two simulated scans.
    #[config(default = 0)]
    pub scan_period_us: u64,
    /// Amplitude of the noise added to simulated data pixels.
    #[config(default = 0)]
    pub noise: u16,
}
