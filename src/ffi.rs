//! C-compatible FFI.
//!
//! All functions are `#[no_mangle] extern "C"`.
//!
//! Memory convention:
//!   - Caller allocates flat arrays and passes pointers + lengths.
//!   - Dense tables are row-major `f64`.
//!   - The opaque `*mut TdcsHandle` is created by Rust and freed by Rust
//!     via `tdcs_free`.
//!   - Failures return a non-zero code; the message is kept per thread and
//!     read back with `tdcs_last_error`.

use crate::assemble::{apply_reference_node, build_tdcs_matrix, has_reference_node};
use crate::types::{BuildOutcome, BuilderOptions, ElectrodeTables, Mesh};
use crate::validate::check_compressed_structure;
use ndarray::Array2;
use sprs::CsMat;
use std::cell::RefCell;
use std::slice;

pub const TDCS_OK: i32 = 0;
pub const TDCS_ERROR: i32 = 1;
/// Build failed but a partial matrix is available for inspection.
pub const TDCS_PARTIAL: i32 = 2;

// ─────────────────────────────────────────────────────────────
//  Thread-local error message
// ─────────────────────────────────────────────────────────────

thread_local! {
    static LAST_ERROR: RefCell<String> = RefCell::new(String::new());
}

fn set_last_error(msg: impl Into<String>) {
    LAST_ERROR.with(|e| *e.borrow_mut() = msg.into());
}

fn clear_last_error() {
    LAST_ERROR.with(|e| e.borrow_mut().clear());
}

/// Copy the last error message (UTF-8, not NUL-terminated) into `buf`.
/// Returns the number of bytes written, 0 if there is no error.
///
/// # Safety
/// `buf` must be valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn tdcs_last_error(buf: *mut u8, len: usize) -> i32 {
    LAST_ERROR.with(|e| {
        let msg = e.borrow();
        if msg.is_empty() || buf.is_null() {
            return 0;
        }
        let n = msg.len().min(len).min(i32::MAX as usize);
        slice::from_raw_parts_mut(buf, n).copy_from_slice(&msg.as_bytes()[..n]);
        n as i32
    })
}

// ─────────────────────────────────────────────────────────────
//  Opaque handle
// ─────────────────────────────────────────────────────────────

/// Mesh + stiffness, plus the outcome of the last build.
pub struct TdcsHandle {
    pub mesh: Mesh,
    pub stiffness: CsMat<f64>,
    pub options: BuilderOptions,
    pub outcome: Option<BuildOutcome>,
}

impl TdcsHandle {
    fn matrix(&self) -> Option<&CsMat<f64>> {
        self.outcome.as_ref().and_then(|o| o.matrix.as_ref())
    }
}

/// Create a handle from node coordinates and a CSR stiffness matrix.
/// Returns null on error (see `tdcs_last_error`).
///
/// # Safety
/// `coords` must hold `num_nodes * 3` values, `indptr` `num_nodes + 1`,
/// `indices` and `values` `nnz` each.
#[no_mangle]
pub unsafe extern "C" fn tdcs_create(
    num_nodes: usize,
    coords: *const f64,        // num_nodes × 3 row-major
    indptr: *const usize,      // num_nodes + 1
    indices: *const usize,     // nnz
    values: *const f64,        // nnz
    nnz: usize,
) -> *mut TdcsHandle {
    clear_last_error();
    if coords.is_null() || indptr.is_null() || (nnz > 0 && (indices.is_null() || values.is_null())) {
        set_last_error("null pointer passed to tdcs_create");
        return std::ptr::null_mut();
    }

    let nodes = match Array2::from_shape_vec((num_nodes, 3), slice::from_raw_parts(coords, num_nodes * 3).to_vec()) {
        Ok(n) => n,
        Err(e) => {
            set_last_error(format!("coordinates: {e}"));
            return std::ptr::null_mut();
        }
    };
    let mesh = match Mesh::from_points(nodes) {
        Ok(m) => m,
        Err(e) => {
            set_last_error(e.to_string());
            return std::ptr::null_mut();
        }
    };

    let indptr = slice::from_raw_parts(indptr, num_nodes + 1).to_vec();
    let (indices, values) = if nnz > 0 {
        (
            slice::from_raw_parts(indices, nnz).to_vec(),
            slice::from_raw_parts(values, nnz).to_vec(),
        )
    } else {
        (Vec::new(), Vec::new())
    };
    // CsMat::new panics on malformed storage; check first.
    if let Err(e) = check_compressed_structure(num_nodes, &indptr, &indices, values.len()) {
        set_last_error(e.to_string());
        return std::ptr::null_mut();
    }
    let stiffness = CsMat::new((num_nodes, num_nodes), indptr, indices, values);

    Box::into_raw(Box::new(TdcsHandle {
        mesh,
        stiffness,
        options: BuilderOptions::default(),
        outcome: None,
    }))
}

/// Free a handle.
///
/// # Safety
/// `handle` must be a pointer returned by `tdcs_create` (or null).
#[no_mangle]
pub unsafe extern "C" fn tdcs_free(handle: *mut TdcsHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Configure builder options.
///
/// # Safety
/// Valid handle.
#[no_mangle]
pub unsafe extern "C" fn tdcs_set_options(
    handle: *mut TdcsHandle,
    check_reference_node: bool,
    remark_zero_stiffness: bool,
) -> i32 {
    let Some(h) = handle.as_mut() else {
        set_last_error("null handle");
        return TDCS_ERROR;
    };
    h.options = BuilderOptions {
        check_reference_node,
        remark_zero_stiffness,
    };
    TDCS_OK
}

// ─────────────────────────────────────────────────────────────
//  Build
// ─────────────────────────────────────────────────────────────

/// Build the TDCS matrix from electrode tables.
///
/// Returns `TDCS_OK`, `TDCS_ERROR` (no matrix) or `TDCS_PARTIAL` (failed,
/// partial matrix retrievable through `tdcs_copy_matrix`).
///
/// # Safety
/// `electrode` and `element_type` hold `num_rows` values, `definition`
/// holds `num_rows * definition_cols` values (row-major).  `impedance` is
/// null or holds `num_rows` values.
#[no_mangle]
pub unsafe extern "C" fn tdcs_build(
    handle: *mut TdcsHandle,
    num_rows: usize,
    electrode: *const f64,
    element_type: *const f64,
    definition: *const f64,
    definition_cols: usize,
    impedance: *const f64,
) -> i32 {
    clear_last_error();
    let Some(h) = handle.as_mut() else {
        set_last_error("null handle");
        return TDCS_ERROR;
    };
    if num_rows > 0 && (electrode.is_null() || element_type.is_null() || definition.is_null()) {
        set_last_error("null electrode table");
        return TDCS_ERROR;
    }

    let tables = match read_tables(num_rows, electrode, element_type, definition, definition_cols, impedance) {
        Ok(t) => t,
        Err(msg) => {
            set_last_error(msg);
            return TDCS_ERROR;
        }
    };

    let outcome = build_tdcs_matrix(&h.mesh, &h.stiffness, &tables, &h.options);
    let rc = match &outcome.status {
        Ok(()) => TDCS_OK,
        Err(e) => {
            set_last_error(e.to_string());
            if outcome.matrix.is_some() { TDCS_PARTIAL } else { TDCS_ERROR }
        }
    };
    h.outcome = Some(outcome);
    rc
}

/// Wrap caller arrays into [`ElectrodeTables`].
unsafe fn read_tables(
    num_rows: usize,
    electrode: *const f64,
    element_type: *const f64,
    definition: *const f64,
    definition_cols: usize,
    impedance: *const f64,
) -> Result<ElectrodeTables, String> {
    let table = |ptr: *const f64, cols: usize, name: &str| -> Result<Array2<f64>, String> {
        let values = if num_rows * cols > 0 {
            slice::from_raw_parts(ptr, num_rows * cols).to_vec()
        } else {
            Vec::new()
        };
        Array2::from_shape_vec((num_rows, cols), values).map_err(|e| format!("{name} table: {e}"))
    };

    let mut tables = ElectrodeTables::new(
        table(electrode, 1, "electrode element")?,
        table(element_type, 1, "element type")?,
        table(definition, definition_cols, "element definition")?,
    );
    if !impedance.is_null() {
        tables = tables.with_contact_impedance(table(impedance, 1, "contact impedance")?);
    }
    Ok(tables)
}

// ─────────────────────────────────────────────────────────────
//  Output
// ─────────────────────────────────────────────────────────────

/// Dimension, stored entries and electrode count of the last built matrix.
///
/// # Safety
/// Valid handle and output pointers.
#[no_mangle]
pub unsafe extern "C" fn tdcs_matrix_info(
    handle: *const TdcsHandle,
    out_dim: *mut usize,
    out_nnz: *mut usize,
    out_num_electrodes: *mut usize,
) -> i32 {
    let Some(h) = handle.as_ref() else {
        set_last_error("null handle");
        return TDCS_ERROR;
    };
    let (Some(outcome), Some(m)) = (h.outcome.as_ref(), h.matrix()) else {
        set_last_error("no matrix built yet");
        return TDCS_ERROR;
    };
    *out_dim = m.rows();
    *out_nnz = m.nnz();
    *out_num_electrodes = outcome.num_electrodes;
    TDCS_OK
}

/// Copy the last built matrix in CSR form.
///
/// # Safety
/// `out_indptr` must hold `dim + 1`, `out_indices` / `out_values` `nnz`
/// entries (see `tdcs_matrix_info`).
#[no_mangle]
pub unsafe extern "C" fn tdcs_copy_matrix(
    handle: *const TdcsHandle,
    out_indptr: *mut usize,
    out_indices: *mut usize,
    out_values: *mut f64,
) -> i32 {
    let Some(h) = handle.as_ref() else {
        set_last_error("null handle");
        return TDCS_ERROR;
    };
    let Some(m) = h.matrix() else {
        set_last_error("no matrix built yet");
        return TDCS_ERROR;
    };

    let indptr = m.indptr();
    let indptr = indptr.raw_storage();
    slice::from_raw_parts_mut(out_indptr, indptr.len()).copy_from_slice(indptr);
    slice::from_raw_parts_mut(out_indices, m.nnz()).copy_from_slice(m.indices());
    slice::from_raw_parts_mut(out_values, m.nnz()).copy_from_slice(m.data());
    TDCS_OK
}

/// 1 if the last matrix has a pinned reference node, 0 if not, -1 if no
/// matrix exists.
///
/// # Safety
/// Valid handle.
#[no_mangle]
pub unsafe extern "C" fn tdcs_has_reference_node(handle: *const TdcsHandle) -> i32 {
    match handle.as_ref().and_then(|h| h.matrix()) {
        Some(m) => has_reference_node(m) as i32,
        None => -1,
    }
}

/// Pin `node` of the last built matrix to zero potential, in place.
///
/// # Safety
/// Valid handle.
#[no_mangle]
pub unsafe extern "C" fn tdcs_apply_reference_node(handle: *mut TdcsHandle, node: usize) -> i32 {
    clear_last_error();
    let Some(h) = handle.as_mut() else {
        set_last_error("null handle");
        return TDCS_ERROR;
    };
    let Some(matrix) = h.outcome.as_mut().and_then(|o| o.matrix.as_mut()) else {
        set_last_error("no matrix built yet");
        return TDCS_ERROR;
    };
    match apply_reference_node(matrix, node) {
        Ok(pinned) => {
            *matrix = pinned;
            TDCS_OK
        }
        Err(e) => {
            set_last_error(e.to_string());
            TDCS_ERROR
        }
    }
}
