use thiserror::Error;

/// Status codes reported with [`TempStatsError::Device`].
///
/// The values follow the OpenCL status table so that a failure reads the same
/// whichever backend produced it.
pub mod status {
    pub const OUT_OF_RESOURCES: i32 = -5;
    pub const MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
    pub const BUILD_PROGRAM_FAILURE: i32 = -11;
    pub const INVALID_VALUE: i32 = -30;
    pub const INVALID_PLATFORM: i32 = -32;
    pub const INVALID_DEVICE: i32 = -33;
    pub const INVALID_KERNEL_NAME: i32 = -46;
    pub const INVALID_WORK_GROUP_SIZE: i32 = -54;
    pub const INVALID_BUFFER_SIZE: i32 = -61;
    pub const INVALID_GLOBAL_WORK_SIZE: i32 = -63;

    /// Human-readable name for a status code
    pub fn describe(code: i32) -> &'static str {
        match code {
            OUT_OF_RESOURCES => "CL_OUT_OF_RESOURCES",
            MEM_OBJECT_ALLOCATION_FAILURE => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
            BUILD_PROGRAM_FAILURE => "CL_BUILD_PROGRAM_FAILURE",
            INVALID_VALUE => "CL_INVALID_VALUE",
            INVALID_PLATFORM => "CL_INVALID_PLATFORM",
            INVALID_DEVICE => "CL_INVALID_DEVICE",
            INVALID_KERNEL_NAME => "CL_INVALID_KERNEL_NAME",
            INVALID_WORK_GROUP_SIZE => "CL_INVALID_WORK_GROUP_SIZE",
            INVALID_BUFFER_SIZE => "CL_INVALID_BUFFER_SIZE",
            INVALID_GLOBAL_WORK_SIZE => "CL_INVALID_GLOBAL_WORK_SIZE",
            _ => "Unknown OpenCL error",
        }
    }
}

#[derive(Error, Debug)]
pub enum TempStatsError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Device error {code} ({name}): {message}")]
    Device {
        code: i32,
        name: &'static str,
        message: String,
    },

    #[error("Kernel program build failed (status: {status})\nBuild options: {options}\nBuild log: {log}")]
    Build {
        status: String,
        options: String,
        log: String,
    },

    #[error("Malformed record {record}: {message}")]
    Data { record: usize, message: String },

    #[error("Cannot compute statistics over an empty series")]
    EmptySeries,

    #[error("{statistic} would overflow the 64-bit accumulator: {message}")]
    Overflow { statistic: String, message: String },

    #[error("Stage out of order: {0}")]
    StageOrder(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TempStatsError {
    pub(crate) fn device(code: i32, message: impl Into<String>) -> Self {
        Self::Device {
            code,
            name: status::describe(code),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TempStatsError>;
