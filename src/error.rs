use thiserror::Error;

/// Status codes reported by the OS driver glue for register and DMA calls.
#[repr(i32)]
#[derive(Error, Clone, Copy, PartialEq, Eq, Debug)]
pub enum DriverStatus {
    #[error("success")]
    Success = 0,
    #[error("register read failed")]
    ReadFailed = -1,
    #[error("register write failed")]
    WriteFailed = -2,
    #[error("invalid driver number")]
    InvalidDriverNumber = -3,
    #[error("invalid driver handle")]
    InvalidDriverHandle = -4,
    #[error("getting DMA buffer failed")]
    DmaBufferFailed = -5,
    #[error("enabling interrupts failed")]
    InterruptFailed = -6,
    #[error("device not found")]
    DeviceNotFound = -7,
    #[error("communication error")]
    Comm = -8,
    #[error("unknown driver status")]
    Unknown = 1,
}

impl From<i32> for DriverStatus {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::Success,
            -1 => Self::ReadFailed,
            -2 => Self::WriteFailed,
            -3 => Self::InvalidDriverNumber,
            -4 => Self::InvalidDriverHandle,
            -5 => Self::DmaBufferFailed,
            -6 => Self::InterruptFailed,
            -7 => Self::DeviceNotFound,
            -8 => Self::Comm,
            _ => Self::Unknown,
        }
    }
}

impl DriverStatus {
    /// Turns a raw status returned by the OS glue into a `Result`.
    pub fn check(code: i32) -> Result<(), DriverStatus> {
        match DriverStatus::from(code) {
            DriverStatus::Success => Ok(()),
            status => Err(status),
        }
    }
}

/// Everything that can go wrong while setting up or running a measurement.
#[derive(Error, Debug)]
pub enum BoardError {
    #[error("board {0} does not exist")]
    InvalidBoard(usize),

    #[error("no board selected")]
    NoBoardSelected,

    #[error("{name} = {value} is out of range (must be < {limit})")]
    OutOfRange {
        name: &'static str,
        value: u64,
        limit: u64,
    },

    #[error("invalid measurement settings: {0}")]
    InvalidSettings(String),

    #[error("invalid pixel count {0}")]
    InvalidPixelCount(u32),

    #[error("not enough RAM: {needed} bytes needed, {available} bytes free")]
    NotEnoughRam { needed: u64, available: u64 },

    #[error("allocating user memory failed")]
    AllocationFailed,

    #[error("no user buffer allocated for board {0}")]
    NoUserBuffer(usize),

    #[error("write of {len} samples at {position} exceeds user buffer of {capacity} samples")]
    BufferOverflow {
        position: usize,
        len: usize,
        capacity: usize,
    },

    #[error("querying free memory failed: {0}")]
    MemoryQuery(std::io::Error),

    #[error("register access failed: {0}")]
    Register(#[from] DriverStatus),

    #[error("camera or fiber not found on board {0}")]
    CameraNotFound(usize),

    #[error("measurement already running")]
    AlreadyRunning,

    #[error("ingest pipeline of board {0} stopped unexpectedly")]
    IngestFailed(usize),

    #[error("setting thread priority failed: {0}")]
    Priority(std::io::Error),

    #[error("scan {sample} of block {block}, camera {camera} on board {drvno} is not acquired yet")]
    NotYetAcquired {
        drvno: usize,
        sample: u32,
        block: u32,
        camera: u32,
    },

    #[error("measurement aborted")]
    Aborted,
}

impl BoardError {
    /// Abortion is a normal cooperative outcome, not a fault.
    pub fn is_abortion(&self) -> bool {
        matches!(self, BoardError::Aborted)
    }
}

pub type BoardResult<T> = std::result::Result<T, BoardError>;
