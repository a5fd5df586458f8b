pub const APP_NAME: &str = "layerbuild";

/// Version of the on-disk layer and base metadata format.
pub const LAYER_FORMAT_VERSION: u32 = 1;

/// Version mixed into every cache key. Bump to invalidate all cached layers.
pub const CACHE_KEY_VERSION: u32 = 1;

pub const LAYER_METADATA_FILE: &str = "layer.json";
pub const LAYER_DIFF_DIR: &str = "diff";

pub const BASE_METADATA_FILE: &str = "base.json";
pub const BASE_ROOTFS_DIR: &str = "rootfs";

/// Built-in empty base image.
pub const SCRATCH_BASE: &str = "scratch";

/// Length of the hashed directory name used for registered bases.
pub const BASE_DIR_HASH_LEN: usize = 16;

/// Number of trailing stderr lines kept on a failed command.
pub const STDERR_TAIL_LINES: usize = 20;

pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
