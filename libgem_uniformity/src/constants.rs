/// Version of the HDF5 output layout
pub const OUTPUT_FORMAT_VERSION: &str = "1.0";

/// Default number of position slices per phi sector
pub const DEFAULT_GRANULARITY: usize = 4;

/// The eta level ADC vs. position distribution is binned this many times finer than a phi
/// sector's slicing
pub const ETA_POSITION_BIN_FACTOR: usize = 3;

/// Magic bytes at the start of a record file
pub const RECORD_FILE_MAGIC: [u8; 4] = *b"GEMR";
pub const RECORD_FILE_VERSION: u16 = 1;

/// Extension of the run record files
pub const RECORD_FILE_EXTENSION: &str = "gemrec";
