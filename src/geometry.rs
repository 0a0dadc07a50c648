//! Element geometry: triangle area in 3D, tetrahedron Jacobian and linear
//! shape-function gradients.

type Point3 = [f64; 3];

#[inline]
fn sub(a: Point3, b: Point3) -> Point3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn cross(a: Point3, b: Point3) -> Point3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn dot(a: Point3, b: Point3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Area of the triangle (p1, p2, p3): half the magnitude of the cross
/// product of two edge vectors.  Zero for collinear or coincident nodes.
pub fn triangle_area(p1: Point3, p2: Point3, p3: Point3) -> f64 {
    let n = cross(sub(p2, p1), sub(p3, p1));
    0.5 * dot(n, n).sqrt()
}

/// Determinant of the tetrahedron Jacobian, i.e. the 4×4 determinant
///
/// ```text
/// | 1 x1 y1 z1 |
/// | 1 x2 y2 z2 |
/// | 1 x3 y3 z3 |
/// | 1 x4 y4 z4 |
/// ```
///
/// reduced to the triple product of the edges leaving p1.  Positive when
/// p4 lies on the side of (p1, p2, p3) given by the right-hand rule.
pub fn tetrahedron_jacobian(p1: Point3, p2: Point3, p3: Point3, p4: Point3) -> f64 {
    dot(sub(p2, p1), cross(sub(p3, p1), sub(p4, p1)))
}

/// Gradients of the four linear shape functions of a tetrahedron, one row
/// per vertex.  Returns `None` when the Jacobian is zero.
pub fn shape_gradients(p1: Point3, p2: Point3, p3: Point3, p4: Point3) -> Option<[Point3; 4]> {
    let e1 = sub(p2, p1);
    let e2 = sub(p3, p1);
    let e3 = sub(p4, p1);
    let det = dot(e1, cross(e2, e3));
    if det == 0.0 || !det.is_finite() {
        return None;
    }

    // Rows of J⁻ᵀ where J = [e1 e2 e3]: ∇φ2, ∇φ3, ∇φ4.
    let g2 = cross(e2, e3).map(|v| v / det);
    let g3 = cross(e3, e1).map(|v| v / det);
    let g4 = cross(e1, e2).map(|v| v / det);
    let g1 = [
        -(g2[0] + g3[0] + g4[0]),
        -(g2[1] + g3[1] + g4[1]),
        -(g2[2] + g3[2] + g4[2]),
    ];
    Some([g1, g2, g3, g4])
}

/// `a · b` for shape-function gradients.
#[inline]
pub fn gradient_dot(a: Point3, b: Point3) -> f64 {
    dot(a, b)
}
