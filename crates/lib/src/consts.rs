pub const APP_NAME: &str = "craft";

/// Configuration document version written by this release.
pub const CONFIG_VERSION: &str = "0.1";

/// Every configuration `version` this release accepts.
pub const SUPPORTED_CONFIG_VERSIONS: &[&str] = &["0.1"];

/// Length of truncated object hashes used in cache keys.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Default file name of the rendered build descriptor.
pub const DESCRIPTOR_FILENAME: &str = "Dockerfile";

/// Name the entry-point script is staged under inside a build directory.
pub const ENTRY_POINT_FILENAME: &str = "entry_point.sh";

/// Schema file looked up next to the first root document.
pub const SCHEMA_OVERRIDE_FILENAME: &str = "craft_schema.json";

pub const USER_AGENT: &str = concat!("craft/", env!("CARGO_PKG_VERSION"), " (container build pipeline)");
