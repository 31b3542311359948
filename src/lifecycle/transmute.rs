//! Pairing of conda package archive formats.

use std::collections::BTreeSet;

/// Extension of legacy conda packages.
pub const TAR_BZ2: &str = ".tar.bz2";

/// Extension of current conda packages.
pub const CONDA: &str = ".conda";

/// A conversion of one package archive to the other format.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Conversion {
    /// Existing archive name.
    pub file: String,
    /// Extension of the archive to produce.
    pub extension: &'static str,
}

/// Whether `name` is a conda package archive in either format.
#[must_use]
pub fn is_package_archive(name: &str) -> bool {
    name.ends_with(TAR_BZ2) || name.ends_with(CONDA)
}

/// Lists the conversions needed so every archive in `names` exists in both
/// formats.
///
/// Presence of the sibling name is taken as proof the conversion happened.
#[must_use]
pub fn plan_conversions<S: AsRef<str>>(names: &[S]) -> Vec<Conversion> {
    let present: BTreeSet<&str> = names.iter().map(AsRef::as_ref).collect();
    present
        .iter()
        .filter_map(|name| {
            let (stem, extension) = if let Some(stem) = name.strip_suffix(TAR_BZ2) {
                (stem, CONDA)
            } else {
                (name.strip_suffix(CONDA)?, TAR_BZ2)
            };
            let sibling = format!("{stem}{extension}");
            (!present.contains(sibling.as_str())).then(|| Conversion {
                file: (*name).to_owned(),
                extension,
            })
        })
        .collect()
}
