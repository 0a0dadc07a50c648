//! Input validation: electrode tables against the mesh, and the stiffness
//! matrix against the mesh.
//!
//! Everything here runs before a single value is accumulated, so a failed
//! check never leaves a partial matrix behind.

use crate::types::{
    ElectrodeElement, ElectrodeGeometry, ElectrodeLayout, ElectrodeTables, ElementKind, Mesh,
    TdcsError,
};
use ndarray::Array2;
use sprs::CsMat;
use std::collections::BTreeSet;
use tracing::debug;

/// Widest node-definition row (tetrahedron).
pub const MAX_DEFINITION_COLUMNS: usize = 4;

// ─────────────────────────────────────────────────────────────
//  Electrode tables
// ─────────────────────────────────────────────────────────────

/// Check the electrode tables against the mesh and turn every row into a
/// typed [`ElectrodeElement`].
pub fn validate_electrodes(mesh: &Mesh, tables: &ElectrodeTables) -> Result<ElectrodeLayout, TdcsError> {
    let nn = mesh.num_nodes();
    if nn == 0 {
        return Err(TdcsError::EmptyMesh);
    }

    let elc = &tables.electrode_elements;
    let typ = &tables.element_types;
    let def = &tables.element_definitions;

    // 1. Shapes
    let rows = elc.nrows();
    if !(rows == typ.nrows() && typ.nrows() == def.nrows()) {
        return Err(TdcsError::RowCountMismatch {
            elements: rows,
            types: typ.nrows(),
            definitions: def.nrows(),
        });
    }
    let def_cols = def.ncols();
    if !(elc.ncols() == 1 && typ.ncols() == 1 && (1..=MAX_DEFINITION_COLUMNS).contains(&def_cols)) {
        return Err(TdcsError::ColumnWidth {
            elements: elc.ncols(),
            types: typ.ncols(),
            definitions: def_cols,
        });
    }
    if rows > nn {
        return Err(TdcsError::TooManyRows { rows, num_nodes: nn });
    }
    if rows == 0 {
        return Err(TdcsError::NoElectrodeElements);
    }

    // 2. Per-row content
    let mut electrodes = BTreeSet::new();
    let mut elements = Vec::with_capacity(rows);

    for i in 0..rows {
        let electrode = table_index("electrode element", elc[[i, 0]], i, 0)?;
        if electrode >= nn {
            return Err(TdcsError::ElectrodeIndexOutOfRange { row: i, index: electrode, limit: nn });
        }

        let code = typ[[i, 0]];
        let kind = ElementKind::from_code(code)
            .ok_or(TdcsError::UnsupportedElementType { row: i, code })?;

        let mut nodes = [0usize; MAX_DEFINITION_COLUMNS];
        for j in 0..def_cols {
            let node = table_index("electrode element definition", def[[i, j]], i, j)?;
            if node >= nn {
                return Err(TdcsError::NodeOutOfRange { row: i, col: j, node, num_nodes: nn });
            }
            nodes[j] = node;
        }
        if kind.num_nodes() > def_cols {
            return Err(TdcsError::MissingDefinitionNodes {
                row: i,
                kind,
                required: kind.num_nodes(),
                available: def_cols,
            });
        }

        let geometry = match kind {
            ElementKind::Point => ElectrodeGeometry::Point(nodes[0]),
            ElementKind::Triangle => ElectrodeGeometry::Triangle([nodes[0], nodes[1], nodes[2]]),
            ElementKind::Tetrahedron => ElectrodeGeometry::Tetrahedron(nodes),
        };

        electrodes.insert(electrode);
        elements.push(ElectrodeElement {
            row: i,
            electrode,
            geometry,
            impedance: 1.0,
        });
    }

    // 3. Electrode numbering
    let num_electrodes = check_numbering(&elements, &electrodes)?;

    // 4. Contact impedance
    let impedance = contact_impedance(tables.contact_impedance.as_ref(), rows)?;
    for (el, z) in elements.iter_mut().zip(impedance) {
        el.impedance = z;
    }

    debug!(
        rows,
        num_electrodes,
        mesh_nodes = nn,
        "electrode tables validated"
    );

    Ok(ElectrodeLayout {
        elements,
        num_electrodes,
        num_mesh_nodes: nn,
    })
}

/// Convert a table entry to an index.  Must be a finite, non-negative
/// integer.
fn table_index(table: &'static str, value: f64, row: usize, col: usize) -> Result<usize, TdcsError> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= usize::MAX as f64 {
        Ok(value as usize)
    } else {
        Err(TdcsError::InvalidIndex { table, row, col, value })
    }
}

/// Numbering starts at 0 (first row) and covers `0..n` without gaps.
fn check_numbering(elements: &[ElectrodeElement], distinct: &BTreeSet<usize>) -> Result<usize, TdcsError> {
    if let Some(first) = elements.first() {
        if first.electrode != 0 {
            return Err(TdcsError::ElectrodeNumbering(format!(
                "first row belongs to electrode {}",
                first.electrode
            )));
        }
    }
    let n = distinct.len();
    match distinct.iter().next_back() {
        Some(&max) if max + 1 != n => Err(TdcsError::ElectrodeNumbering(format!(
            "{n} distinct electrodes but the largest index is {max}"
        ))),
        _ => Ok(n),
    }
}

/// Contact impedance column, or all ones if absent.
fn contact_impedance(impedance: Option<&Array2<f64>>, rows: usize) -> Result<Vec<f64>, TdcsError> {
    match impedance {
        Some(z) => {
            if z.nrows() != rows || z.ncols() != 1 {
                return Err(TdcsError::ContactImpedanceShape {
                    rows: z.nrows(),
                    cols: z.ncols(),
                    expected_rows: rows,
                });
            }
            Ok(z.column(0).to_vec())
        }
        None => Ok(vec![1.0; rows]),
    }
}

// ─────────────────────────────────────────────────────────────
//  Stiffness matrix
// ─────────────────────────────────────────────────────────────

/// Stiffness must be non-empty, square, sized to the mesh and structurally
/// sound.
pub fn validate_stiffness(stiffness: &CsMat<f64>, num_mesh_nodes: usize) -> Result<(), TdcsError> {
    let (nr, nc) = stiffness.shape();
    if !(nr > 0 && nr == nc) {
        return Err(TdcsError::Stiffness(format!(
            "should be square and non-empty, got {nr}x{nc}"
        )));
    }
    if nr != num_mesh_nodes {
        return Err(TdcsError::Stiffness(format!(
            "has {nr} rows but the mesh has {num_mesh_nodes} nodes"
        )));
    }
    check_compressed_structure(
        stiffness.inner_dims(),
        stiffness.indptr().raw_storage(),
        stiffness.indices(),
        stiffness.data().len(),
    )
}

/// Structural check of raw compressed (CSR or CSC) storage:
///
/// - `indptr` has `outer + 1` entries, starts at 0, is non-decreasing and
///   ends at `indices.len()`
/// - every inner index is below `inner_dim` and strictly increasing within
///   its outer slice
/// - `data_len == indices.len()`
pub fn check_compressed_structure(
    inner_dim: usize,
    indptr: &[usize],
    indices: &[usize],
    data_len: usize,
) -> Result<(), TdcsError> {
    let broken = |msg: String| Err(TdcsError::Stiffness(format!("is broken: {msg}")));

    if indptr.is_empty() {
        return broken("empty indptr".into());
    }
    if indptr[0] != 0 {
        return broken(format!("indptr starts at {}", indptr[0]));
    }
    let nnz = indptr[indptr.len() - 1];
    if nnz != indices.len() || data_len != indices.len() {
        return broken(format!(
            "indptr ends at {nnz}, {} indices, {data_len} values",
            indices.len()
        ));
    }
    for (outer, w) in indptr.windows(2).enumerate() {
        if w[1] < w[0] || w[1] > indices.len() {
            return broken(format!("indptr decreases or overruns at outer index {outer}"));
        }
        let slice = &indices[w[0]..w[1]];
        if let Some(&bad) = slice.iter().find(|&&i| i >= inner_dim) {
            return broken(format!("inner index {bad} out of range in outer index {outer}"));
        }
        if slice.windows(2).any(|p| p[1] <= p[0]) {
            return broken(format!("unsorted or duplicate inner indices in outer index {outer}"));
        }
    }
    Ok(())
}
