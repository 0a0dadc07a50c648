//! **tdcs**: transcranial direct-current stimulation system-matrix builder.
//!
//! Takes a volume-conductor stiffness matrix and augments it with the
//! contact-impedance terms of point, triangle and tetrahedral electrodes:
//!
//! 1. **Validation** (`validate`): electrode tables vs. mesh and stiffness.
//! 2. **Accumulation** (`accumulate`): per-element A / B / Bᵗ / C blocks
//!    into a sparse map keyed by node pairs.
//! 3. **Finalisation** (`assemble`): merge into a CSR matrix of size
//!    (#nodes + #electrodes)², then check for a reference node.
//! 4. **Stiffness** (`stiffness`): linear-tetrahedron conductance operator.
//! 5. **FFI** (`ffi`): C-compatible API.

pub mod types;
pub mod geometry;
pub mod validate;
pub mod accumulate;
pub mod assemble;
pub mod stiffness;
pub mod ffi;

pub use assemble::{apply_reference_node, build_tdcs_matrix, has_reference_node};
pub use types::{BuildOutcome, BuilderOptions, ElectrodeTables, Mesh, TdcsError};
