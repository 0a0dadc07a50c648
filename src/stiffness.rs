//! Volume-conductor stiffness matrix for linear tetrahedra.
//!
//! K(i,j) = Σ_e σ_e · V_e · ∇φ_i · ∇φ_j
//!
//! This is the matrix the TDCS builder augments.  Isotropic conductivity,
//! one value per element.

use crate::geometry::{gradient_dot, shape_gradients, tetrahedron_jacobian};
use crate::types::{Mesh, TdcsError};
use sprs::{CsMat, TriMat};
use tracing::debug;

/// Assemble the conductance operator of a linear-tetrahedron mesh.
///
/// `conductivities` holds one positive finite value per element.  Elements
/// must be positively oriented (positive Jacobian).
pub fn assemble_stiffness(mesh: &Mesh, conductivities: &[f64]) -> Result<CsMat<f64>, TdcsError> {
    let nn = mesh.num_nodes();
    let ne = mesh.num_elements();
    let elements = mesh.elements();

    if nn == 0 {
        return Err(TdcsError::EmptyMesh);
    }
    if elements.ncols() != 4 {
        return Err(TdcsError::Stiffness(format!(
            "linear tetrahedra need 4 nodes per element, mesh has {}",
            elements.ncols()
        )));
    }
    if conductivities.len() != ne {
        return Err(TdcsError::Conductivity(format!(
            "{} values for {ne} elements",
            conductivities.len()
        )));
    }
    if let Some((e, &s)) = conductivities.iter().enumerate().find(|(_, s)| !(s.is_finite() && **s > 0.0)) {
        return Err(TdcsError::Conductivity(format!("element {e} has conductivity {s}")));
    }

    let mut tri = TriMat::with_capacity((nn, nn), 16 * ne);
    for (e, row) in elements.outer_iter().enumerate() {
        let nodes = [row[0], row[1], row[2], row[3]];
        let p = nodes.map(|n| mesh.point(n));

        let det = tetrahedron_jacobian(p[0], p[1], p[2], p[3]);
        if !(det > 0.0) {
            return Err(TdcsError::DegenerateMeshElement { element: e, det });
        }
        let grads = shape_gradients(p[0], p[1], p[2], p[3])
            .ok_or(TdcsError::DegenerateMeshElement { element: e, det })?;
        let scale = conductivities[e] * det / 6.0;

        for i in 0..4 {
            for j in 0..4 {
                tri.add_triplet(nodes[i], nodes[j], scale * gradient_dot(grads[i], grads[j]));
            }
        }
    }

    // Duplicate triplets are summed on conversion.
    let k = tri.to_csr();
    debug!(nodes = nn, elements = ne, nnz = k.nnz(), "stiffness matrix assembled");
    Ok(k)
}
