//! Text-to-FHiCL conversion: the converter registry, derived-file
//! generators and the import-side directory preparation built on them.

mod convert;
mod prepare;
mod util;

pub use convert::{
    converter_for, fhiclize_boot, fhiclize_environment, fhiclize_known_boardreaders_list,
    fhiclize_metadata, fhiclize_ranks, fhiclize_settings, fhiclize_setup, generate_run_history,
    generate_run_history2,
};
pub use prepare::{resolve_config_name, FclPreparer};
pub use util::{clean_non_ascii, format_fhicl_array, is_numeric, normalize_key, quote_value};
