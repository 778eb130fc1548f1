use anyhow::Context;

use tourguide::catalog::CatalogDef;
use tourguide::onboarding::{find_next_unpassed_step, PresetKind};
use tourguide::promo::default_helpers;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: tourguide <catalog.json>");
        std::process::exit(2);
    });

    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let catalog = CatalogDef::from_json(&raw)?;
    let presets = catalog.preset_registry()?;
    let helpers = default_helpers();
    let promos = catalog.promo_registry(&helpers)?;

    tracing::info!(
        presets = presets.len(),
        promos = promos.len(),
        "Catalog is valid"
    );

    println!("Presets:");
    for preset in presets.iter() {
        match &preset.kind {
            PresetKind::Combined(combined) => {
                println!("  {} (combined: {})", preset.slug, combined.internal_presets.join(", "));
            }
            kind => {
                let steps = preset.step_slugs();
                let next = find_next_unpassed_step::<_, &str>(&steps, &[]).unwrap_or("-");
                let label = if matches!(kind, PresetKind::Internal) { " internal" } else { "" };
                println!("  {}{label}: {} (next: {next})", preset.slug, steps.join(" -> "));
            }
        }
    }

    println!("Promo groups:");
    for group in promos.groups() {
        println!("  {}: {}", group.slug, promos.by_priority(&group.slug).join(", "));
    }
    println!("Condition helpers: {}", helpers.names().join(", "));

    Ok(())
}
