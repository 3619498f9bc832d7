//! Performance benchmarks for service area core operations
//!
//! Run with: `cargo bench -p servicearea-core`
//!
//! These benchmarks measure critical path performance:
//! - Exact geodesic refinement of radius-query candidates
//! - Radius queries end to end (bbox prefilter + refinement)
//! - Closure-table ancestor reads on deep hierarchies

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use servicearea_core::cache::CacheAside;
use servicearea_core::db::DatabaseService;
use servicearea_core::services::geo_query_service::refine_within_radius;
use servicearea_core::{GeoPoint, GeoQueryService, LocationService, NewLocation};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;

const CBD: (f64, f64) = (36.8219, -1.2921);

/// Grid of points spaced ~110 m apart around Nairobi CBD
fn grid(side: usize) -> Vec<GeoPoint> {
    let step = 0.001;
    let offset = step * side as f64 / 2.0;
    (0..side * side)
        .map(|i| {
            GeoPoint::new(
                CBD.0 - offset + step * (i % side) as f64,
                CBD.1 - offset + step * (i / side) as f64,
            )
        })
        .collect()
}

/// Setup services over a fresh database
async fn setup_services() -> (Arc<DatabaseService>, LocationService, GeoQueryService, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Arc::new(
        DatabaseService::new(temp_dir.path().join("bench.db"))
            .await
            .unwrap(),
    );
    let cache = CacheAside::in_memory();
    let locations = LocationService::new(db.clone(), cache.clone());
    let geo = GeoQueryService::new(db.clone(), cache);
    (db, locations, geo, temp_dir)
}

/// Benchmark in-memory geodesic refinement
fn bench_refinement(c: &mut Criterion) {
    let origin = GeoPoint::new(CBD.0, CBD.1);
    let candidates = grid(100);

    c.bench_function("refine_10000_candidates_1km", |b| {
        b.iter(|| {
            let hits = refine_within_radius(
                black_box(&origin),
                black_box(1000.0),
                candidates.clone(),
                |p| Some(p),
            );
            black_box(hits)
        })
    });
}

/// Benchmark radius queries against a populated store
///
/// The cache is bypassed by varying the radius each iteration.
fn bench_radius_query(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (_db, locations, geo, _temp) = rt.block_on(setup_services());
    rt.block_on(async {
        for (i, point) in grid(30).into_iter().enumerate() {
            locations
                .create(NewLocation::new(format!("Area {}", i), "Nairobi").with_center_point(point))
                .await
                .unwrap();
        }
    });

    let origin = GeoPoint::new(CBD.0, CBD.1);
    let mut group = c.benchmark_group("radius_query");
    group.sample_size(20);
    let mut radius = 1000.0;
    group.bench_function("900_locations_1km", |b| {
        b.iter(|| {
            radius += 0.001;
            rt.block_on(async {
                let hits = geo.get_locations_near_point(&origin, radius).await.unwrap();
                black_box(hits)
            })
        })
    });
    group.finish();
}

/// Benchmark ancestor reads at the bottom of a 50-level chain
fn bench_deep_ancestors(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (db, locations, _geo, _temp) = rt.block_on(setup_services());
    let leaf = rt.block_on(async {
        let mut parent: Option<String> = None;
        for depth in 0..50 {
            let mut payload = NewLocation::new(format!("Level {}", depth), "Nairobi");
            if let Some(parent_id) = parent.take() {
                payload = payload.with_parent(parent_id);
            }
            parent = Some(locations.create(payload).await.unwrap().id);
        }
        parent.unwrap()
    });

    let mut group = c.benchmark_group("closure_reads");
    group.sample_size(20);
    group.bench_function("ancestors_depth_50", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ancestors = db.db_get_location_ancestors(&leaf).await.unwrap();
                black_box(ancestors)
            })
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_refinement,
    bench_radius_query,
    bench_deep_ancestors
);
criterion_main!(benches);
