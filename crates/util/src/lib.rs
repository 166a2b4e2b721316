//! # Probe Utility Library
//!
//! Shape-shifting helpers shared by the engine and the action plugins:
//! recursive map merging, serde-backed parameter binding, duration parsing
//! for the `wait`/`interval` authoring forms, and the JSON coercions applied
//! at the plugin RPC boundary.

pub mod duration;
pub mod json;
pub mod maps;
pub mod record;
pub mod text;

pub use duration::{format_duration, format_secs, parse_duration, wait_duration};
pub use json::{looks_like_json, normalize_recorded_bodies, restore_integers};
pub use maps::{merge_maps, merge_string_maps};
pub use record::{map_to_record, record_to_map, RecordError};
pub use text::{header_to_string_value, title_case};
