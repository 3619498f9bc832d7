//! Demo seeding tool
//!
//! Loads a small Nairobi catalog (address taxonomy, nested service areas,
//! links and geometry) into the configured database, then prints the location
//! forest, a radius query and one GeoJSON export.
//!
//! Run with: `cargo run -p servicearea-dev-tools --bin seed-demo`
//!
//! Honors `SERVICEAREA_DB_PATH` and the cache TTL variables read by
//! `ServiceAreaConfig::from_env`; log verbosity comes from `RUST_LOG`.

use anyhow::{Context, Result};
use servicearea_core::{
    BoundingBox, GeoPoint, GeoPolygon, LocationTree, NewAddressComponent, NewLocation,
    NewLocationAddressComponent, ServiceAreaConfig, ServiceAreaServices,
};

fn init_tracing() -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("Invalid log filter: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    Ok(())
}

fn print_tree(tree: &LocationTree, depth: usize) {
    let location = &tree.location;
    println!(
        "{}- {} ({}){}",
        "  ".repeat(depth),
        location.local_area_name,
        location.county,
        if location.geofence.is_some() { " [fenced]" } else { "" }
    );
    for child in &tree.children {
        print_tree(child, depth + 1);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = ServiceAreaConfig::from_env().context("Invalid configuration")?;
    tracing::info!("Seeding demo data into {}", config.database_path.display());
    let services = ServiceAreaServices::open(&config)
        .await
        .context("Failed to open the catalog")?;

    // Address taxonomy: county > town > estate
    let county = services
        .address_components
        .upsert_by_type_value_parent(NewAddressComponent::new("county", "Nairobi"))
        .await?;
    let mut estates = Vec::new();
    for (town, town_estates) in [
        ("Westlands", &["Parklands", "Spring Valley"][..]),
        ("Dagoretti North", &["Kilimani", "Kileleshwa", "Lavington"][..]),
    ] {
        let town = services
            .address_components
            .upsert_by_type_value_parent(
                NewAddressComponent::new("town", town).with_parent(county.id.clone()),
            )
            .await?;
        for estate in town_estates {
            estates.push(
                services
                    .address_components
                    .upsert_by_type_value_parent(
                        NewAddressComponent::new("estate", *estate).with_parent(town.id.clone()),
                    )
                    .await?,
            );
        }
    }

    // Service areas
    let nairobi = services
        .locations
        .upsert(
            NewLocation::new("Nairobi", "Nairobi")
                .with_center_point(GeoPoint::new(36.8219, -1.2921))
                .with_geofence(GeoPolygon::from_bbox(&BoundingBox::new(
                    36.65, -1.45, 37.10, -1.16,
                ))),
        )
        .await?;
    let kilimani = services
        .locations
        .upsert(
            NewLocation::new("Kilimani Area", "Nairobi")
                .with_parent(nairobi.id.clone())
                .with_town("Nairobi")
                .with_center_point(GeoPoint::new(36.7834, -1.2921))
                .with_geofence(GeoPolygon::from_bbox(&BoundingBox::new(
                    36.77, -1.30, 36.80, -1.28,
                ))),
        )
        .await?;
    services
        .locations
        .upsert(
            NewLocation::new("Westlands", "Nairobi")
                .with_parent(nairobi.id.clone())
                .with_center_point(GeoPoint::new(36.8070, -1.2676)),
        )
        .await?;

    let links: Vec<NewLocationAddressComponent> = estates
        .iter()
        .filter(|estate| ["Kilimani", "Kileleshwa", "Lavington"].contains(&estate.value.as_str()))
        .enumerate()
        .map(|(i, estate)| {
            let link = NewLocationAddressComponent::new(kilimani.id.clone(), estate.id.clone())
                .with_sequence(i as i64 + 1);
            if i == 0 {
                link.primary()
            } else {
                link
            }
        })
        .collect();
    let counts = services.linkages.bulk_upsert_links(links).await?;
    tracing::info!(
        "Links: {} inserted, {} updated",
        counts.inserted,
        counts.updated
    );

    println!("Location forest:");
    for tree in services.locations.get_root_trees().await? {
        print_tree(&tree, 1);
    }

    let cbd = GeoPoint::new(36.8219, -1.2921);
    println!("\nWithin 5 km of Nairobi CBD:");
    for hit in services.geo.get_locations_near_point(&cbd, 5000.0).await? {
        println!(
            "  {} at {:.0} m",
            hit.location.local_area_name, hit.distance_meters
        );
    }

    if let Some(primary) = services.linkages.get_primary_component(&kilimani.id).await? {
        println!(
            "\nPrimary estate of {}: {}",
            kilimani.local_area_name, primary.component.value
        );
    }

    let geojson = services.geo.export_geojson(&kilimani.id).await?;
    println!("\n{}", serde_json::to_string_pretty(&geojson)?);

    Ok(())
}
