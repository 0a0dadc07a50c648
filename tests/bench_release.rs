//! Release-mode benchmarks for the TDCS matrix builder.
//!
//! Run with:   cargo test --release --test bench_release -- --nocapture
//!
//! These are not criterion benchmarks (to avoid an extra dependency);
//! instead they time key operations using `std::time::Instant` and print
//! the results.

use ndarray::Array2;
use std::time::Instant;
use tdcs::geometry::tetrahedron_jacobian;
use tdcs::stiffness::assemble_stiffness;
use tdcs::types::*;
use tdcs::build_tdcs_matrix;

// ─────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────

fn node_id(n: usize, i: usize, j: usize, k: usize) -> usize {
    i + (n + 1) * (j + (n + 1) * k)
}

/// `n × n × n` cube grid, 6 positively oriented tetrahedra per cell.
fn cube_mesh(n: usize) -> Mesh {
    let h = 1.0 / n as f64;
    let nn = (n + 1).pow(3);
    let mut coords = Vec::with_capacity(nn * 3);
    for k in 0..=n {
        for j in 0..=n {
            for i in 0..=n {
                coords.extend_from_slice(&[i as f64 * h, j as f64 * h, k as f64 * h]);
            }
        }
    }
    let nodes = Array2::from_shape_vec((nn, 3), coords).unwrap();

    let axes: [[usize; 3]; 6] = [
        [0, 1, 2], [0, 2, 1], [1, 0, 2],
        [1, 2, 0], [2, 0, 1], [2, 1, 0],
    ];
    let point = |v: usize| [nodes[[v, 0]], nodes[[v, 1]], nodes[[v, 2]]];
    let mut tets = Vec::with_capacity(24 * n * n * n);
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                for perm in &axes {
                    let mut offset = [0usize; 3];
                    let mut path = [node_id(n, i, j, k), 0, 0, 0];
                    for (step, &axis) in perm.iter().enumerate() {
                        offset[axis] = 1;
                        path[step + 1] = node_id(n, i + offset[0], j + offset[1], k + offset[2]);
                    }
                    let det = tetrahedron_jacobian(point(path[0]), point(path[1]), point(path[2]), point(path[3]));
                    if det < 0.0 {
                        path.swap(2, 3);
                    }
                    tets.extend_from_slice(&path);
                }
            }
        }
    }
    let elements = Array2::from_shape_vec((tets.len() / 4, 4), tets).unwrap();
    Mesh::new(nodes, elements).unwrap()
}

/// Every top-face cell becomes one triangle pair.  Electrodes are `m × m`
/// patches of cells, numbered row by row.
fn patch_electrodes(n: usize, m: usize) -> ElectrodeTables {
    let per_side = n / m;
    let mut electrode = Vec::new();
    let mut defs = Vec::new();
    for j in 0..per_side * m {
        for i in 0..per_side * m {
            let id = (j / m) * per_side + i / m;
            let a = node_id(n, i, j, n) as f64;
            let b = node_id(n, i + 1, j, n) as f64;
            let c = node_id(n, i + 1, j + 1, n) as f64;
            let d = node_id(n, i, j + 1, n) as f64;
            electrode.extend_from_slice(&[id as f64, id as f64]);
            defs.extend_from_slice(&[a, b, c, a, c, d]);
        }
    }
    let rows = electrode.len();
    ElectrodeTables::new(
        Array2::from_shape_vec((rows, 1), electrode).unwrap(),
        Array2::from_elem((rows, 1), 2.0),
        Array2::from_shape_vec((rows, 3), defs).unwrap(),
    )
}

/// Grid sizes to test.  n×n×n grid → 6·n³ tetrahedra.
///    8  →     3,072 elements
///   16  →    24,576 elements
///   32  →   196,608 elements
///   48  →   663,552 elements
const GRID_SIZES: &[(usize, &str)] = &[
    (8,  "8³"),
    (16, "16³"),
    (32, "32³"),
    (48, "48³"),
];

fn fmt_count(n: usize) -> String {
    if n >= 1_000_000 { format!("{:.2}M", n as f64 / 1e6) }
    else if n >= 1_000 { format!("{:.1}k", n as f64 / 1e3) }
    else { format!("{}", n) }
}

fn fmt_time(us: f64) -> String {
    if us >= 1_000_000.0 { format!("{:.2} s",  us / 1e6) }
    else if us >= 1_000.0 { format!("{:.2} ms", us / 1e3) }
    else { format!("{:.1} μs", us) }
}

// ─────────────────────────────────────────────────────────────
//  Benchmarks
// ─────────────────────────────────────────────────────────────

#[test]
fn bench_stiffness_assembly_scaling() {
    eprintln!("\n┌─────────────────────────────────────────────────────────────────┐");
    eprintln!("│                 STIFFNESS ASSEMBLY  (linear tetrahedra)          │");
    eprintln!("├──────────┬──────────┬───────────┬───────────────────────────────┤");
    eprintln!("│  grid    │ elements │  per-run  │  total (iters)                │");
    eprintln!("├──────────┼──────────┼───────────┼───────────────────────────────┤");

    for &(n, label) in GRID_SIZES {
        let mesh = cube_mesh(n);
        let ne = mesh.num_elements();
        let sigma = vec![0.33; ne];

        // Warm-up
        let _ = assemble_stiffness(&mesh, &sigma).unwrap();

        let iters: usize = if ne < 10_000 { 200 }
            else if ne < 100_000 { 20 }
            else if ne < 500_000 { 3 }
            else { 1 };

        let start = Instant::now();
        for _ in 0..iters {
            let k = assemble_stiffness(&mesh, &sigma).unwrap();
            let _ = std::hint::black_box(k);
        }
        let elapsed = start.elapsed();
        let per_us = elapsed.as_micros() as f64 / iters as f64;

        eprintln!(
            "│  {:<7} │ {:>8} │ {:>9} │  {:.2} ms  ({} iters){}│",
            label,
            fmt_count(ne),
            fmt_time(per_us),
            elapsed.as_secs_f64() * 1000.0,
            iters,
            " ".repeat(3usize.saturating_sub(format!("{}", iters).len())),
        );
    }
    eprintln!("└──────────┴──────────┴───────────┴───────────────────────────────┘\n");
}

#[test]
fn bench_tdcs_build_scaling() {
    eprintln!("\n┌─────────────────────────────────────────────────────────────────┐");
    eprintln!("│           TDCS BUILD  (validate + accumulate + finalize)        │");
    eprintln!("├──────────┬──────────┬───────────┬───────────────────────────────┤");
    eprintln!("│  grid    │  rows    │  per-build│  total (iters)                │");
    eprintln!("├──────────┼──────────┼───────────┼───────────────────────────────┤");

    let options = BuilderOptions {
        check_reference_node: false,
        remark_zero_stiffness: false,
    };

    for &(n, label) in GRID_SIZES {
        let mesh = cube_mesh(n);
        let k = assemble_stiffness(&mesh, &vec![1.0; mesh.num_elements()]).unwrap();
        let tables = patch_electrodes(n, 4);
        let rows = tables.num_rows();

        // Warm-up
        let outcome = build_tdcs_matrix(&mesh, &k, &tables, &options);
        assert!(outcome.is_ok(), "{:?}", outcome.status);
        assert_eq!(outcome.num_electrodes, (n / 4) * (n / 4));

        let iters: usize = if rows < 1_000 { 200 }
            else if rows < 10_000 { 20 }
            else { 3 };

        let start = Instant::now();
        for _ in 0..iters {
            let outcome = build_tdcs_matrix(&mesh, &k, &tables, &options);
            let _ = std::hint::black_box(outcome);
        }
        let elapsed = start.elapsed();
        let per_us = elapsed.as_micros() as f64 / iters as f64;

        eprintln!(
            "│  {:<7} │ {:>8} │ {:>9} │  {:.2} ms  ({} iters){}│",
            label,
            fmt_count(rows),
            fmt_time(per_us),
            elapsed.as_secs_f64() * 1000.0,
            iters,
            " ".repeat(3usize.saturating_sub(format!("{}", iters).len())),
        );
    }
    eprintln!("└──────────┴──────────┴───────────┴───────────────────────────────┘\n");
}
