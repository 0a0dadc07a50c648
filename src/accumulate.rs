//! Electrode contact terms, accumulated per electrode element.
//!
//! Each electrode `k` gets a virtual node `e = #mesh_nodes + k`.  An
//! element touching mesh nodes `p_i` with contact impedance `Z` adds
//!
//! ```text
//!   A  (p_i, p_j)   mesh-node self coupling
//!   Bᵗ (e,   p_i)   electrode → node, mirrored into B (p_i, e)
//!   C  (e,   e)     electrode self term
//! ```
//!
//! Values go into [`AdditionalData`], a sparse map of deltas that the
//! finalizer later adds onto the stiffness matrix.  The stiffness matrix
//! itself is only read (to reject NaN / Inf entries), never written.

use crate::geometry::{tetrahedron_jacobian, triangle_area};
use crate::types::{
    BuilderOptions, Diagnostics, ElectrodeGeometry, ElectrodeLayout, Mesh, TdcsError,
};
use sprs::CsMat;
use std::collections::BTreeMap;
use tracing::debug;

// ─────────────────────────────────────────────────────────────
//  Sparse accumulator
// ─────────────────────────────────────────────────────────────

/// Row → column → value map of contributions to the augmented matrix.
///
/// Ordered maps so the finalizer can emit CSR rows with sorted columns
/// without a separate sort.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdditionalData {
    rows: BTreeMap<usize, BTreeMap<usize, f64>>,
}

impl AdditionalData {
    pub fn new() -> Self {
        Self::default()
    }

    /// `A(row, col) += value`; returns the updated entry.
    pub fn add(&mut self, row: usize, col: usize, value: f64) -> f64 {
        let cell = self.rows.entry(row).or_default().entry(col).or_insert(0.0);
        *cell += value;
        *cell
    }

    /// `A(row, col) = value`.
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.rows.entry(row).or_default().insert(col, value);
    }

    /// Accumulated value, zero if never written.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.rows
            .get(&row)
            .and_then(|r| r.get(&col))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.rows.get(&row).map_or(false, |r| r.contains_key(&col))
    }

    pub fn row(&self, row: usize) -> Option<&BTreeMap<usize, f64>> {
        self.rows.get(&row)
    }

    /// Number of stored cells.
    pub fn nnz(&self) -> usize {
        self.rows.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `(row, col, value)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.rows
            .iter()
            .flat_map(|(&r, cols)| cols.iter().map(move |(&c, &v)| (r, c, v)))
    }
}

// ─────────────────────────────────────────────────────────────
//  Failure with optional partial result
// ─────────────────────────────────────────────────────────────

/// Accumulation error.  `partial` carries everything accumulated before
/// the failing row when the failure is one that keeps a partial result
/// (tetrahedron Jacobian / impedance).
#[derive(Debug)]
pub struct AccumulationFailure {
    pub error: TdcsError,
    pub partial: Option<AdditionalData>,
}

// ─────────────────────────────────────────────────────────────
//  Accumulator
// ─────────────────────────────────────────────────────────────

struct Accumulator<'a> {
    mesh: &'a Mesh,
    stiffness: &'a CsMat<f64>,
    options: &'a BuilderOptions,
    diagnostics: &'a mut Diagnostics,
    data: AdditionalData,
    zero_remarked: bool,
}

impl<'a> Accumulator<'a> {
    /// Read `K(row, col)` (zero if not stored) and reject NaN / Inf.
    fn stiffness_entry(&mut self, row: usize, col: usize) -> Result<f64, TdcsError> {
        let value = self.stiffness.get(row, col).copied().unwrap_or(0.0);
        if !value.is_finite() {
            return Err(TdcsError::InvalidStiffnessEntry { row, col, value });
        }
        if row == col && value == 0.0 && self.options.remark_zero_stiffness && !self.zero_remarked {
            self.zero_remarked = true;
            self.diagnostics.remark(format!(
                "stiffness matrix has a zero diagonal entry at ({row},{row}) under an electrode; \
                 review the units used for conductivity and mesh coordinates"
            ));
        }
        Ok(value)
    }

    /// Check every `K(p_i, p_j)` the element is about to touch.
    fn check_block(&mut self, nodes: &[usize]) -> Result<(), TdcsError> {
        for &pi in nodes {
            for &pj in nodes {
                self.stiffness_entry(pi, pj)?;
            }
        }
        Ok(())
    }

    /// A(p_i,p_i) += diag, A(p_i,p_j) += off for i ≠ j.
    fn add_mass_block(&mut self, nodes: &[usize], diag: f64, off: f64) {
        for &pi in nodes {
            for &pj in nodes {
                self.data.add(pi, pj, if pi == pj { diag } else { off });
            }
        }
    }

    /// Bᵗ(e, p_i) += coupling, then B(p_i, e) mirrors the updated Bᵗ entry.
    fn add_coupling(&mut self, e: usize, nodes: &[usize], coupling: f64) {
        for &p in nodes {
            let bt = self.data.add(e, p, coupling);
            self.data.set(p, e, bt);
        }
    }

    // ── Point electrode ──────────────────────────────────────

    fn add_point(&mut self, row: usize, e: usize, p1: usize, impedance: f64) -> Result<(), TdcsError> {
        if !(impedance > 0.0) {
            return Err(TdcsError::NonPositiveImpedance { row, impedance });
        }
        self.stiffness_entry(p1, p1)?;

        let g = 1.0 / impedance;
        let half = g / 2.0;
        self.data.add(p1, p1, half);
        self.data.add(e, p1, -half);
        self.data.add(p1, e, -half);
        self.data.add(e, e, g * 0.5);
        Ok(())
    }

    // ── Triangle electrode ───────────────────────────────────

    fn add_triangle(&mut self, row: usize, e: usize, p: [usize; 3], impedance: f64) -> Result<(), TdcsError> {
        let area = triangle_area(self.mesh.point(p[0]), self.mesh.point(p[1]), self.mesh.point(p[2]));
        if !(area > 0.0) {
            return Err(TdcsError::DegenerateTriangle { row, area });
        }
        if !(impedance > 0.0) {
            return Err(TdcsError::NonPositiveImpedance { row, impedance });
        }
        self.check_block(&p)?;

        let k = (2.0 * area) / impedance;
        self.add_coupling(e, &p, -k / 6.0);
        self.add_mass_block(&p, k / 12.0, k / 24.0);
        self.data.add(e, e, 0.5 * k);
        Ok(())
    }

    // ── Tetrahedral electrode ────────────────────────────────

    fn add_tetrahedron(&mut self, row: usize, e: usize, p: [usize; 4], impedance: f64) -> Result<(), TdcsError> {
        let det = tetrahedron_jacobian(
            self.mesh.point(p[0]),
            self.mesh.point(p[1]),
            self.mesh.point(p[2]),
            self.mesh.point(p[3]),
        );
        if !(det > 0.0) {
            return Err(TdcsError::NonPositiveJacobian { row, det });
        }
        if !(impedance > 0.0) {
            return Err(TdcsError::NonPositiveImpedance { row, impedance });
        }
        self.check_block(&p)?;

        let volume = det / 6.0;
        let v_14 = -(volume / 4.0) / impedance;
        let v_110 = (volume / 10.0) / impedance;
        let v_120 = (volume / 20.0) / impedance;

        self.add_coupling(e, &p, v_14);
        self.add_mass_block(&p, v_110, v_120);
        self.data.add(e, e, volume / impedance);
        Ok(())
    }
}

/// Whether a failed row keeps the accumulator for inspection.
fn keeps_partial(geometry: &ElectrodeGeometry, error: &TdcsError) -> bool {
    matches!(geometry, ElectrodeGeometry::Tetrahedron(_))
        && matches!(
            error,
            TdcsError::NonPositiveJacobian { .. } | TdcsError::NonPositiveImpedance { .. }
        )
}

/// Run every validated electrode element through its handler.
///
/// A failing row never leaves half of its own contributions behind: all
/// geometry, impedance and stiffness checks for a row happen before its
/// first write.
pub fn accumulate_electrodes(
    mesh: &Mesh,
    stiffness: &CsMat<f64>,
    layout: &ElectrodeLayout,
    options: &BuilderOptions,
    diagnostics: &mut Diagnostics,
) -> Result<AdditionalData, AccumulationFailure> {
    let mut acc = Accumulator {
        mesh,
        stiffness,
        options,
        diagnostics,
        data: AdditionalData::new(),
        zero_remarked: false,
    };

    for el in &layout.elements {
        let e = layout.electrode_node(el.electrode);
        let result = match el.geometry {
            ElectrodeGeometry::Point(p1) => acc.add_point(el.row, e, p1, el.impedance),
            ElectrodeGeometry::Triangle(p) => acc.add_triangle(el.row, e, p, el.impedance),
            ElectrodeGeometry::Tetrahedron(p) => acc.add_tetrahedron(el.row, e, p, el.impedance),
        };
        if let Err(error) = result {
            let partial = keeps_partial(&el.geometry, &error).then(|| std::mem::take(&mut acc.data));
            return Err(AccumulationFailure { error, partial });
        }
    }

    debug!(
        elements = layout.elements.len(),
        nnz = acc.data.nnz(),
        "electrode contributions accumulated"
    );
    Ok(acc.data)
}
