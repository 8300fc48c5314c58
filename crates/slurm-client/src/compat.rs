// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Compatibility matrix between Slurm releases and REST API revisions.
//!
//! The matrix is an ordered list of entries, each mapping a product version
//! (either one exact release or a half-open release range) to the non-empty
//! set of API revisions that release can serve. It is built once and is
//! read-only afterwards, so it is shared between threads without locking.
//!
//! Resolution is fail-closed: a product version outside every entry yields
//! [`NoMatchError`] instead of a guessed revision.

use std::collections::BTreeSet;
use std::fmt;

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::version::{ApiVersion, ProductVersion};

/// The reported product version is not covered by the matrix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no compatibility entry covers Slurm {product_version}")]
pub struct NoMatchError {
    pub product_version: ProductVersion,
}

/// A matrix could not be built because it violates an invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
    #[error("entry {range} has no supported API versions")]
    EmptySupportedSet { range: ProductVersionRange },

    #[error("range {range} is empty")]
    EmptyRange { range: ProductVersionRange },

    #[error("entries {first} and {second} overlap")]
    Overlapping {
        first: ProductVersionRange,
        second: ProductVersionRange,
    },
}

/// The product versions a matrix entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductVersionRange {
    /// Exactly one release. Takes precedence over any range containing it.
    Exact(ProductVersion),
    /// Every release `v` with `start <= v < end`.
    Range {
        start: ProductVersion,
        end: ProductVersion,
    },
}

impl ProductVersionRange {
    pub fn contains(&self, version: &ProductVersion) -> bool {
        match self {
            Self::Exact(exact) => exact == version,
            Self::Range { start, end } => start <= version && version < end,
        }
    }

    fn start(&self) -> ProductVersion {
        match self {
            Self::Exact(v) => *v,
            Self::Range { start, .. } => *start,
        }
    }
}

impl fmt::Display for ProductVersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "={}", v),
            Self::Range { start, end } => write!(f, "[{}, {})", start, end),
        }
    }
}

/// One row of the matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixEntry {
    range: ProductVersionRange,
    supported: BTreeSet<ApiVersion>,
}

impl MatrixEntry {
    pub fn range(&self) -> &ProductVersionRange {
        &self.range
    }

    /// Supported API versions, ascending.
    pub fn supported(&self) -> &BTreeSet<ApiVersion> {
        &self.supported
    }
}

/// Static table mapping Slurm releases to the API revisions they serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityMatrix {
    entries: Vec<MatrixEntry>,
}

fn release_range(start: (u32, u32), end: (u32, u32), api_patches: &[u32]) -> MatrixEntry {
    MatrixEntry {
        range: ProductVersionRange::Range {
            start: ProductVersion::new(start.0, start.1, 0),
            end: ProductVersion::new(end.0, end.1, 0),
        },
        supported: api_patches
            .iter()
            .map(|patch| ApiVersion::new(0, 0, *patch))
            .collect(),
    }
}

// Each Slurm release serves the API revision it introduced plus the two before it.
static BUILTIN: Lazy<CompatibilityMatrix> = Lazy::new(|| {
    CompatibilityMatrix {
        entries: vec![
            release_range((24, 5), (24, 11), &[39, 40, 41]),
            release_range((24, 11), (25, 5), &[40, 41, 42]),
            release_range((25, 5), (25, 11), &[41, 42, 43]),
            release_range((25, 11), (26, 5), &[42, 43, 44]),
        ],
    }
});

impl CompatibilityMatrix {
    /// The matrix compiled into this crate.
    pub fn builtin() -> &'static CompatibilityMatrix {
        &BUILTIN
    }

    /// Start building a custom matrix.
    pub fn builder() -> CompatibilityMatrixBuilder {
        CompatibilityMatrixBuilder::default()
    }

    pub fn entries(&self) -> &[MatrixEntry] {
        &self.entries
    }

    /// Resolve the API versions a product version can serve.
    ///
    /// An exact entry always wins over a range entry containing the same
    /// version.
    pub fn resolve(
        &self,
        product_version: &ProductVersion,
    ) -> Result<&BTreeSet<ApiVersion>, NoMatchError> {
        let exact = self.entries.iter().find(|entry| {
            matches!(entry.range, ProductVersionRange::Exact(v) if v == *product_version)
        });

        exact
            .or_else(|| {
                self.entries.iter().find(|entry| {
                    matches!(entry.range, ProductVersionRange::Range { .. })
                        && entry.range.contains(product_version)
                })
            })
            .map(|entry| &entry.supported)
            .ok_or(NoMatchError {
                product_version: *product_version,
            })
    }

    fn validate(entries: &[MatrixEntry]) -> Result<(), MatrixError> {
        for entry in entries {
            if entry.supported.is_empty() {
                return Err(MatrixError::EmptySupportedSet { range: entry.range });
            }
            if let ProductVersionRange::Range { start, end } = entry.range {
                if start >= end {
                    return Err(MatrixError::EmptyRange { range: entry.range });
                }
            }
        }

        let ranges: Vec<&ProductVersionRange> = entries
            .iter()
            .map(|e| &e.range)
            .filter(|r| matches!(r, ProductVersionRange::Range { .. }))
            .collect();
        for pair in ranges.windows(2) {
            if let (
                ProductVersionRange::Range { end, .. },
                ProductVersionRange::Range { start, .. },
            ) = (pair[0], pair[1])
            {
                if start < end {
                    return Err(MatrixError::Overlapping {
                        first: *pair[0],
                        second: *pair[1],
                    });
                }
            }
        }

        let exacts: Vec<&ProductVersionRange> = entries
            .iter()
            .map(|e| &e.range)
            .filter(|r| matches!(r, ProductVersionRange::Exact(_)))
            .collect();
        for pair in exacts.windows(2) {
            if pair[0] == pair[1] {
                return Err(MatrixError::Overlapping {
                    first: *pair[0],
                    second: *pair[1],
                });
            }
        }

        Ok(())
    }
}

/// Builder for a [`CompatibilityMatrix`].
#[derive(Debug, Default)]
pub struct CompatibilityMatrixBuilder {
    entries: Vec<MatrixEntry>,
}

impl CompatibilityMatrixBuilder {
    /// Map one exact release to a set of API versions.
    pub fn exact(
        mut self,
        version: ProductVersion,
        supported: impl IntoIterator<Item = ApiVersion>,
    ) -> Self {
        self.entries.push(MatrixEntry {
            range: ProductVersionRange::Exact(version),
            supported: supported.into_iter().collect(),
        });
        self
    }

    /// Map the half-open release range `[start, end)` to a set of API versions.
    pub fn range(
        mut self,
        start: ProductVersion,
        end: ProductVersion,
        supported: impl IntoIterator<Item = ApiVersion>,
    ) -> Self {
        self.entries.push(MatrixEntry {
            range: ProductVersionRange::Range { start, end },
            supported: supported.into_iter().collect(),
        });
        self
    }

    /// Sort the entries ascending and check the matrix invariants.
    pub fn build(mut self) -> Result<CompatibilityMatrix, MatrixError> {
        self.entries.sort_by_key(|entry| entry.range.start());
        CompatibilityMatrix::validate(&self.entries)?;
        Ok(CompatibilityMatrix {
            entries: self.entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pv(s: &str) -> ProductVersion {
        ProductVersion::parse(s).unwrap()
    }

    fn api(s: &str) -> ApiVersion {
        ApiVersion::parse(s).unwrap()
    }

    #[test]
    fn test_builtin_matrix_is_valid() {
        let matrix = CompatibilityMatrix::builtin();
        assert!(CompatibilityMatrix::validate(matrix.entries()).is_ok());
        assert_eq!(matrix.entries().len(), 4);
    }

    #[test]
    fn test_builtin_resolves_range() {
        let supported = CompatibilityMatrix::builtin()
            .resolve(&pv("25.05.3"))
            .unwrap();
        let versions: Vec<_> = supported.iter().map(|v| v.to_string()).collect();
        assert_eq!(versions, ["v0.0.41", "v0.0.42", "v0.0.43"]);
    }

    #[test]
    fn test_range_end_is_exclusive() {
        let supported = CompatibilityMatrix::builtin()
            .resolve(&pv("25.11.0"))
            .unwrap();
        assert!(supported.contains(&api("v0.0.44")));
        assert!(!supported.contains(&api("v0.0.41")));
    }

    #[test]
    fn test_unknown_product_version_fails_closed() {
        let err = CompatibilityMatrix::builtin()
            .resolve(&pv("23.02.7"))
            .unwrap_err();
        assert_eq!(err.product_version, pv("23.02.7"));
    }

    #[test]
    fn test_exact_entry_wins_over_range() {
        let matrix = CompatibilityMatrix::builder()
            .range(pv("23.11.0"), pv("24.05.0"), [api("v0.0.41"), api("v0.0.42")])
            .exact(pv("23.11.4"), [api("v0.0.40")])
            .build()
            .unwrap();

        let exact = matrix.resolve(&pv("23.11.4")).unwrap();
        assert_eq!(exact.iter().copied().collect::<Vec<_>>(), [api("v0.0.40")]);

        let ranged = matrix.resolve(&pv("23.11.0")).unwrap();
        assert_eq!(ranged.len(), 2);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let matrix = CompatibilityMatrix::builtin();
        let first = matrix.resolve(&pv("24.11.1")).unwrap().clone();
        for _ in 0..10 {
            assert_eq!(matrix.resolve(&pv("24.11.1")).unwrap(), &first);
        }
    }

    #[test]
    fn test_builder_sorts_and_dedups_supported_set() {
        let matrix = CompatibilityMatrix::builder()
            .range(
                pv("24.05.0"),
                pv("24.11.0"),
                [api("v0.0.41"), api("v0.0.40"), api("v0.0.41")],
            )
            .build()
            .unwrap();
        let supported: Vec<_> = matrix.entries()[0].supported().iter().copied().collect();
        assert_eq!(supported, [api("v0.0.40"), api("v0.0.41")]);
    }

    #[test]
    fn test_builder_rejects_overlap() {
        let err = CompatibilityMatrix::builder()
            .range(pv("24.05.0"), pv("25.05.0"), [api("v0.0.40")])
            .range(pv("24.11.0"), pv("25.11.0"), [api("v0.0.41")])
            .build()
            .unwrap_err();
        assert!(matches!(err, MatrixError::Overlapping { .. }));
    }

    #[test]
    fn test_builder_rejects_empty_set_and_range() {
        let err = CompatibilityMatrix::builder()
            .range(pv("24.05.0"), pv("24.11.0"), [])
            .build()
            .unwrap_err();
        assert!(matches!(err, MatrixError::EmptySupportedSet { .. }));

        let err = CompatibilityMatrix::builder()
            .range(pv("24.11.0"), pv("24.05.0"), [api("v0.0.40")])
            .build()
            .unwrap_err();
        assert!(matches!(err, MatrixError::EmptyRange { .. }));
    }
}
