//! Grid performance benchmarks.
//!
//! Measures the two hot paths of a zone tick that live in this crate:
//!
//! - **A\***: a cold search across a 512x512 map with scattered walls, plus a
//!   warm lookup through the `PathFinder` cache.
//! - **AOI search**: 3x3 neighbourhood queries against an index holding a few
//!   thousand occupants, and the cost of moving an occupant between cells.
//!
//! Run with: `cargo bench --bench grid_benchmarks`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use emberfall_grid::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A map where roughly one cell in `wall_one_in` is blocked. The corners are
/// always kept open so benchmarks can path between them.
fn scattered_map(size: u16, wall_one_in: u32, seed: u64) -> Arc<WalkGrid> {
    let mut rng = Pcg32::seed_from_u64(seed);
    let mut cells: Vec<u8> = (0..usize::from(size) * usize::from(size))
        .map(|_| u8::from(rng.gen_range(0..wall_one_in) != 0))
        .collect();
    let last = cells.len() - 1;
    cells[0] = 1;
    cells[last] = 1;
    Arc::new(WalkGrid::from_cells(size, size, cells).expect("cell count matches"))
}

fn populated_index(count: usize, area: Coord) -> SpatialIndex<u64, u64> {
    let mut rng = Pcg32::seed_from_u64(7);
    let mut index = SpatialIndex::new(area, area, 40);
    for key in 0..count as u64 {
        let pos = GridPos::new(rng.gen_range(0..area), rng.gen_range(0..area));
        index.add(pos, key, key);
    }
    index
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_astar(c: &mut Criterion) {
    let mut group = c.benchmark_group("astar");

    for size in [64u16, 256, 512] {
        let grid = scattered_map(size, 8, 42);
        let end = GridPos::new(i32::from(size) - 1, i32::from(size) - 1);
        let mut solver = AStar::new(Arc::clone(&grid));
        group.bench_with_input(BenchmarkId::new("cold_corner_to_corner", size), &end, |b, end| {
            b.iter(|| {
                let _ = black_box(solver.find_path(GridPos::new(0, 0), *end));
            });
        });
    }

    let grid = scattered_map(256, 8, 42);
    let mut finder = PathFinder::new(Arc::clone(&grid));
    let end = GridPos::new(255, 255);
    let _ = finder.find_path(GridPos::new(0, 0), end);
    group.bench_function("cached_lookup", |b| {
        b.iter(|| {
            let _ = black_box(finder.find_path(GridPos::new(0, 0), end));
        });
    });

    let pool = SolverPool::new(grid);
    group.bench_function("pooled_short_hop", |b| {
        b.iter(|| {
            let _ = black_box(pool.find_path(GridPos::new(0, 0), GridPos::new(20, 20)));
        });
    });

    group.finish();
}

fn bench_aoi(c: &mut Criterion) {
    let mut group = c.benchmark_group("aoi");

    for count in [500usize, 2_000, 8_000] {
        let index = populated_index(count, 1_000);
        group.bench_with_input(BenchmarkId::new("search", count), &index, |b, index| {
            b.iter(|| black_box(index.search(GridPos::new(500, 500))));
        });
    }

    let mut index = populated_index(2_000, 1_000);
    let key = 9_999u64;
    index.add(GridPos::new(100, 100), key, key);
    let mut at = GridPos::new(100, 100);
    group.bench_function("move_across_cells", |b| {
        b.iter(|| {
            let next = GridPos::new(if at.x == 100 { 150 } else { 100 }, 100);
            index.moved(next, at, key, key);
            at = next;
        });
    });

    group.finish();
}

criterion_group!(benches, bench_astar, bench_aoi);
criterion_main!(benches);
