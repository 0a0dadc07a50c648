use ndarray::Array2;
use sprs::CsMat;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, warn};

// ─────────────────────────────────────────────────────────────
//  Error type
// ─────────────────────────────────────────────────────────────

/// Unified error type for all fallible operations in the crate.
///
/// Shape and index problems are reported by the validator before any
/// accumulation starts.  Numeric problems (non-finite stiffness entries,
/// degenerate geometry, non-positive impedance) surface during
/// accumulation.  The FFI layer translates these into integer return
/// codes + a thread-local error message.
#[derive(Debug, Error)]
pub enum TdcsError {
    #[error("mesh has no nodes, there is nothing to do")]
    EmptyMesh,

    #[error("mesh node coordinates must have 3 columns, got {0}")]
    MeshCoordinates(usize),

    #[error("mesh element {element} references node {node} (mesh has {num_nodes} nodes)")]
    MeshElementNode { element: usize, node: usize, num_nodes: usize },

    #[error(
        "electrode tables must have the same number of rows \
         (elements {elements}, types {types}, definitions {definitions})"
    )]
    RowCountMismatch { elements: usize, types: usize, definitions: usize },

    #[error(
        "electrode table widths must be element=1, type=1, definition=1..4 \
         (got {elements}, {types}, {definitions})"
    )]
    ColumnWidth { elements: usize, types: usize, definitions: usize },

    #[error("electrode tables have no rows")]
    NoElectrodeElements,

    #[error("{rows} electrode-element rows exceed the {num_nodes} mesh nodes they refer to")]
    TooManyRows { rows: usize, num_nodes: usize },

    #[error("{table} entry ({row},{col}) = {value} is not a valid index")]
    InvalidIndex { table: &'static str, row: usize, col: usize, value: f64 },

    #[error("electrode index {index} in row {row} is out of range (0..{limit})")]
    ElectrodeIndexOutOfRange { row: usize, index: usize, limit: usize },

    #[error(
        "element type {code} in row {row} is not supported, allowed: \
         1 (point), 2 (triangle), 3 (tetrahedron)"
    )]
    UnsupportedElementType { row: usize, code: f64 },

    #[error("node {node} in row {row}, column {col} is out of range (0..{num_nodes})")]
    NodeOutOfRange { row: usize, col: usize, node: usize, num_nodes: usize },

    #[error(
        "row {row} is a {kind} electrode element and needs {required} nodes, \
         the definition table has {available} columns"
    )]
    MissingDefinitionNodes { row: usize, kind: ElementKind, required: usize, available: usize },

    #[error("electrode numbering must start at 0 and be contiguous: {0}")]
    ElectrodeNumbering(String),

    #[error("contact impedance must be {expected_rows}x1, got {rows}x{cols}")]
    ContactImpedanceShape { rows: usize, cols: usize, expected_rows: usize },

    #[error("stiffness matrix: {0}")]
    Stiffness(String),

    #[error("stiffness entry ({row},{col}) is not a valid value: {value}")]
    InvalidStiffnessEntry { row: usize, col: usize, value: f64 },

    #[error("contact impedance {impedance} in row {row} is negative or zero")]
    NonPositiveImpedance { row: usize, impedance: f64 },

    #[error("triangle area should be positive (row {row}, area {area})")]
    DegenerateTriangle { row: usize, area: f64 },

    #[error(
        "tetrahedron in row {row} has a negative/zero jacobian ({det}), \
         check the order of the nodes that define the element"
    )]
    NonPositiveJacobian { row: usize, det: f64 },

    #[error(
        "mesh element {element} has a negative/zero jacobian ({det}), \
         check the order of the nodes that define the element"
    )]
    DegenerateMeshElement { element: usize, det: f64 },

    #[error("conductivity: {0}")]
    Conductivity(String),

    #[error("reference node {node} is out of range (0..{dim})")]
    ReferenceNodeOutOfRange { node: usize, dim: usize },

    #[error("build reported success but holds no matrix")]
    MissingMatrix,
}

impl TdcsError {
    /// `true` for errors raised before accumulation (tables, mesh, stiffness
    /// shape).  These never come with a partial matrix.
    pub fn is_input_error(&self) -> bool {
        !matches!(
            self,
            Self::InvalidStiffnessEntry { .. }
                | Self::NonPositiveImpedance { .. }
                | Self::DegenerateTriangle { .. }
                | Self::NonPositiveJacobian { .. }
                | Self::MissingMatrix
        )
    }
}

// ─────────────────────────────────────────────────────────────
//  Volume mesh
// ─────────────────────────────────────────────────────────────

/// Node coordinates plus element connectivity.  Read-only once built.
#[derive(Debug, Clone)]
pub struct Mesh {
    nodes: Array2<f64>,    // nn × 3
    elements: Array2<usize>, // ne × nodes-per-element
}

impl Mesh {
    /// Build a mesh, checking coordinate width and element node indices.
    pub fn new(nodes: Array2<f64>, elements: Array2<usize>) -> Result<Self, TdcsError> {
        if nodes.ncols() != 3 {
            return Err(TdcsError::MeshCoordinates(nodes.ncols()));
        }
        let nn = nodes.nrows();
        for (e, row) in elements.outer_iter().enumerate() {
            if let Some(&node) = row.iter().find(|&&n| n >= nn) {
                return Err(TdcsError::MeshElementNode { element: e, node, num_nodes: nn });
            }
        }
        Ok(Self { nodes, elements })
    }

    /// Point cloud without connectivity.  Enough for the matrix builder,
    /// which only reads coordinates.
    pub fn from_points(nodes: Array2<f64>) -> Result<Self, TdcsError> {
        Self::new(nodes, Array2::zeros((0, 4)))
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.nrows()
    }

    pub fn num_elements(&self) -> usize {
        self.elements.nrows()
    }

    pub fn nodes(&self) -> &Array2<f64> {
        &self.nodes
    }

    pub fn elements(&self) -> &Array2<usize> {
        &self.elements
    }

    /// Coordinates of node `i`.  Panics if `i` is out of range.
    #[inline]
    pub fn point(&self, i: usize) -> [f64; 3] {
        [self.nodes[[i, 0]], self.nodes[[i, 1]], self.nodes[[i, 2]]]
    }
}

// ─────────────────────────────────────────────────────────────
//  Electrode definition tables  (raw numeric input)
// ─────────────────────────────────────────────────────────────

/// Electrode definition as handed over by the caller: numeric tables with
/// one row per electrode element.  Indices are stored as `f64` and checked
/// for integrality by the validator.
#[derive(Debug, Clone)]
pub struct ElectrodeTables {
    /// Owning electrode index per row (rows × 1).
    pub electrode_elements: Array2<f64>,
    /// Element type code per row (rows × 1): 1 point, 2 triangle, 3 tet.
    pub element_types: Array2<f64>,
    /// Node indices per row (rows × 1..4).
    pub element_definitions: Array2<f64>,
    /// Contact impedance per row (rows × 1).  `None` means unit impedance.
    pub contact_impedance: Option<Array2<f64>>,
}

impl ElectrodeTables {
    pub fn new(
        electrode_elements: Array2<f64>,
        element_types: Array2<f64>,
        element_definitions: Array2<f64>,
    ) -> Self {
        Self {
            electrode_elements,
            element_types,
            element_definitions,
            contact_impedance: None,
        }
    }

    pub fn with_contact_impedance(mut self, impedance: Array2<f64>) -> Self {
        self.contact_impedance = Some(impedance);
        self
    }

    pub fn num_rows(&self) -> usize {
        self.electrode_elements.nrows()
    }
}

// ─────────────────────────────────────────────────────────────
//  Electrode element kinds  (closed variant)
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Point,
    Triangle,
    Tetrahedron,
}

impl ElementKind {
    /// Parse a table type code.  Only exact 1, 2, 3 are accepted.
    pub fn from_code(code: f64) -> Option<Self> {
        if code == 1.0 {
            Some(Self::Point)
        } else if code == 2.0 {
            Some(Self::Triangle)
        } else if code == 3.0 {
            Some(Self::Tetrahedron)
        } else {
            None
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Point => 1,
            Self::Triangle => 2,
            Self::Tetrahedron => 3,
        }
    }

    /// Number of definition columns the kind reads.
    pub fn num_nodes(self) -> usize {
        match self {
            Self::Point => 1,
            Self::Triangle => 3,
            Self::Tetrahedron => 4,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Point => write!(f, "point"),
            Self::Triangle => write!(f, "triangle"),
            Self::Tetrahedron => write!(f, "tetrahedron"),
        }
    }
}

/// Mesh nodes an electrode element touches, tagged by its shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectrodeGeometry {
    Point(usize),
    Triangle([usize; 3]),
    Tetrahedron([usize; 4]),
}

impl ElectrodeGeometry {
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Point(_) => ElementKind::Point,
            Self::Triangle(_) => ElementKind::Triangle,
            Self::Tetrahedron(_) => ElementKind::Tetrahedron,
        }
    }

    pub fn nodes(&self) -> &[usize] {
        match self {
            Self::Point(p) => std::slice::from_ref(p),
            Self::Triangle(p) => &p[..],
            Self::Tetrahedron(p) => &p[..],
        }
    }
}

/// One validated electrode-table row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElectrodeElement {
    /// Row in the input tables, kept for error messages.
    pub row: usize,
    pub electrode: usize,
    pub geometry: ElectrodeGeometry,
    pub impedance: f64,
}

/// Validator output: typed rows + electrode count.
#[derive(Debug, Clone)]
pub struct ElectrodeLayout {
    pub elements: Vec<ElectrodeElement>,
    pub num_electrodes: usize,
    pub num_mesh_nodes: usize,
}

impl ElectrodeLayout {
    /// Virtual node index of electrode `electrode`.
    #[inline]
    pub fn electrode_node(&self, electrode: usize) -> usize {
        self.num_mesh_nodes + electrode
    }

    /// Side length of the augmented system.
    pub fn system_dim(&self) -> usize {
        self.num_mesh_nodes + self.num_electrodes
    }
}

// ─────────────────────────────────────────────────────────────
//  Builder options
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BuilderOptions {
    /// Scan the finished matrix for a pinned reference node and warn if
    /// there is none.
    pub check_reference_node: bool,
    /// Record a remark when a diagonal stiffness entry under an electrode
    /// is exactly zero (usually a unit problem in conductivity or mesh).
    pub remark_zero_stiffness: bool,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            check_reference_node: true,
            remark_zero_stiffness: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Diagnostics  (errors / warnings / remarks for the caller)
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Remark,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

/// Message sink threaded through a build.  Every entry is also emitted as
/// a `tracing` event at the matching level.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remark(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(target: "tdcs", "{message}");
        self.push(Severity::Remark, message);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(target: "tdcs", "{message}");
        self.push(Severity::Warning, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!(target: "tdcs", "{message}");
        self.push(Severity::Error, message);
    }

    fn push(&mut self, severity: Severity, message: String) {
        self.entries.push(Diagnostic { severity, message });
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries.iter().filter(|d| d.severity == severity).count()
    }

    pub fn has_warnings(&self) -> bool {
        self.count(Severity::Warning) > 0
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────
//  Build outcome  (matrix + status, returned from build)
// ─────────────────────────────────────────────────────────────

/// Result of one build.
///
/// `matrix` is `Some` on success and also on the failure paths that
/// finalize a partial accumulator for inspection (tetrahedron with a bad
/// Jacobian or impedance).  `status` says whether the build succeeded.
#[derive(Debug)]
pub struct BuildOutcome {
    pub matrix: Option<CsMat<f64>>,
    pub status: Result<(), TdcsError>,
    pub num_mesh_nodes: usize,
    /// Zero when validation failed.
    pub num_electrodes: usize,
    pub diagnostics: Diagnostics,
}

impl BuildOutcome {
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Partial matrix left behind by a failed build, if any.
    pub fn partial_matrix(&self) -> Option<&CsMat<f64>> {
        match self.status {
            Ok(()) => None,
            Err(_) => self.matrix.as_ref(),
        }
    }

    /// Keep the matrix only if the build succeeded.
    pub fn into_result(self) -> Result<CsMat<f64>, TdcsError> {
        self.status?;
        self.matrix.ok_or(TdcsError::MissingMatrix)
    }
}
