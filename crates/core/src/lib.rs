pub mod asset;
pub mod config;
pub mod cron;
pub mod error;
pub mod partitions;
pub mod slice;
pub mod wipe;

pub use asset::*;
pub use config::Config;
pub use error::*;
pub use partitions::{PartitionKeyRange, PartitionsDefinition, StaticPartitions, TimeWindow, TimeWindowPartitions};
pub use slice::AssetSlice;
pub use wipe::{update_partition_wipe_records, AssetDetails, PartitionWipeRecord};
