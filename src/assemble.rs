//! Build entry point: validate → accumulate → finalize → reference check.

use crate::accumulate::{accumulate_electrodes, AccumulationFailure, AdditionalData};
use crate::types::{BuildOutcome, BuilderOptions, Diagnostics, ElectrodeTables, Mesh, TdcsError};
use crate::validate::{validate_electrodes, validate_stiffness};
use sprs::{CsMat, TriMat};
use tracing::{info, info_span};

pub const MISSING_REFERENCE_ADVISORY: &str =
    "the TDCS matrix is not referenced yet: set the potential of at least one node to 0 \
     by clearing its row and column except for a unit diagonal entry";

// ─────────────────────────────────────────────────────────────
//  Finalizer
// ─────────────────────────────────────────────────────────────

/// Merge stiffness and accumulated deltas into a `dim × dim` CSR matrix.
///
/// Cells present in both are summed (`K + Δ`); delta-only cells extend the
/// matrix into the electrode rows / columns; stiffness-only cells pass
/// through unchanged.
pub fn finalize(stiffness: &CsMat<f64>, delta: &AdditionalData, dim: usize) -> CsMat<f64> {
    let mut tri = TriMat::with_capacity((dim, dim), stiffness.nnz() + delta.nnz());
    for (&v, (r, c)) in stiffness.iter() {
        tri.add_triplet(r, c, v);
    }
    for (r, c, v) in delta.iter() {
        tri.add_triplet(r, c, v);
    }
    // Duplicate triplets are summed on conversion.
    tri.to_csr()
}

// ─────────────────────────────────────────────────────────────
//  Top-level build
// ─────────────────────────────────────────────────────────────

/// Build the augmented TDCS system matrix of size
/// `(#mesh nodes + #electrodes)²`.
///
/// Never panics on bad input: every failure is reported through
/// `BuildOutcome::status` and mirrored as an error diagnostic.  A partial
/// matrix accompanies the failure only for tetrahedral electrodes with a
/// non-positive Jacobian or impedance.
pub fn build_tdcs_matrix(
    mesh: &Mesh,
    stiffness: &CsMat<f64>,
    tables: &ElectrodeTables,
    options: &BuilderOptions,
) -> BuildOutcome {
    let nn = mesh.num_nodes();
    let _span = info_span!("tdcs_build", mesh_nodes = nn, rows = tables.num_rows()).entered();
    let mut diagnostics = Diagnostics::new();

    let validated = validate_electrodes(mesh, tables).and_then(|layout| {
        validate_stiffness(stiffness, nn)?;
        Ok(layout)
    });
    let layout = match validated {
        Ok(layout) => layout,
        Err(error) => {
            diagnostics.error(error.to_string());
            return BuildOutcome {
                matrix: None,
                status: Err(error),
                num_mesh_nodes: nn,
                num_electrodes: 0,
                diagnostics,
            };
        }
    };

    let dim = layout.system_dim();
    match accumulate_electrodes(mesh, stiffness, &layout, options, &mut diagnostics) {
        Ok(delta) => {
            let matrix = finalize(stiffness, &delta, dim);
            info!(
                dim,
                electrodes = layout.num_electrodes,
                nnz = matrix.nnz(),
                "TDCS matrix assembled"
            );
            if options.check_reference_node {
                check_reference_node(&matrix, &mut diagnostics);
            }
            BuildOutcome {
                matrix: Some(matrix),
                status: Ok(()),
                num_mesh_nodes: nn,
                num_electrodes: layout.num_electrodes,
                diagnostics,
            }
        }
        Err(AccumulationFailure { error, partial }) => {
            let matrix = partial.map(|delta| finalize(stiffness, &delta, dim));
            if matrix.is_some() {
                diagnostics.error(format!("{error} (partial matrix kept for inspection)"));
            } else {
                diagnostics.error(error.to_string());
            }
            BuildOutcome {
                matrix,
                status: Err(error),
                num_mesh_nodes: nn,
                num_electrodes: layout.num_electrodes,
                diagnostics,
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Reference node
// ─────────────────────────────────────────────────────────────

/// `true` if some row holds exactly one stored entry equal to `1.0`,
/// i.e. a node whose potential has been pinned.
pub fn has_reference_node(matrix: &CsMat<f64>) -> bool {
    let scan = |rows: &CsMat<f64>| {
        rows.outer_iterator()
            .any(|row| row.nnz() == 1 && row.data()[0] == 1.0)
    };
    if matrix.is_csr() {
        scan(matrix)
    } else {
        scan(&matrix.to_csr())
    }
}

/// Post-build check.  Adds the missing-reference advisory when needed and
/// returns whether a reference node was found.
pub fn check_reference_node(matrix: &CsMat<f64>, diagnostics: &mut Diagnostics) -> bool {
    let found = has_reference_node(matrix);
    if !found {
        diagnostics.warning(MISSING_REFERENCE_ADVISORY);
    }
    found
}

/// Copy of `matrix` with the potential of `node` fixed to zero: row and
/// column `node` cleared, diagonal set to 1.
pub fn apply_reference_node(matrix: &CsMat<f64>, node: usize) -> Result<CsMat<f64>, TdcsError> {
    let (nr, nc) = matrix.shape();
    if node >= nr || node >= nc {
        return Err(TdcsError::ReferenceNodeOutOfRange { node, dim: nr.min(nc) });
    }

    let mut tri = TriMat::with_capacity((nr, nc), matrix.nnz() + 1);
    for (&v, (r, c)) in matrix.iter() {
        if r != node && c != node {
            tri.add_triplet(r, c, v);
        }
    }
    tri.add_triplet(node, node, 1.0);
    Ok(tri.to_csr())
}
