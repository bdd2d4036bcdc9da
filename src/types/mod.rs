mod address;
mod name;
mod segment;
mod split_feat;

pub use self::address::{AddressPoint, AddressProps, cmp_address_points, sort_address_points};
pub use self::name::{Name, display_names};
pub use self::segment::Segment;
pub use self::split_feat::{KeyedCoord, SplitFeat, SplitFeatError, SplitFeatRecord};

/// JSON object used for free-form address and feature properties
pub type JsonObject = serde_json::Map<String, serde_json::Value>;
