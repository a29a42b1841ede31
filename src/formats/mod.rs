//! Built-in container format adapters

pub mod tar;
pub mod zip;

use crate::registry::FormatDescriptor;

/// Every format compiled into this build
pub fn builtin_formats() -> Vec<FormatDescriptor> {
    vec![
        zip::ZIP_FORMAT,
        tar::TAR_FORMAT,
        tar::TAR_GZ_FORMAT,
        tar::TGZ_FORMAT,
        #[cfg(feature = "zstd-support")]
        tar::TAR_ZST_FORMAT,
    ]
}
