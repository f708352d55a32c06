//! Model management commands.

use scmd_local::profiler::FALLBACK_CONTEXT_SIZE;
use scmd_local::server::BinaryLocator;
use scmd_local::{CancellationToken, ModelCatalog, ResourceProfiler, Settings};
use std::path::Path;

use super::diagnostic;
use crate::ModelCommand;

pub(crate) async fn run(
    command: ModelCommand,
    settings: &Settings,
    cancel: &CancellationToken,
) -> miette::Result<()> {
    let catalog = ModelCatalog::new(settings.layout())
        .with_test_mode(settings.test_mode)
        .with_quiet(settings.quiet);

    match command {
        ModelCommand::List => list(&catalog),
        ModelCommand::Pull { name } => {
            pull(&catalog, name.as_deref().unwrap_or(&settings.model), settings, cancel).await
        }
        ModelCommand::Rm { name } => remove(&catalog, &name),
        ModelCommand::Import { path } => import(&catalog, &path),
        ModelCommand::Info => info(&catalog, settings),
    }
}

/// List known and downloaded models.
fn list(catalog: &ModelCatalog) -> miette::Result<()> {
    println!("Available models:");
    for model in catalog.list_known() {
        let marker = if catalog.is_cached(&model.name) {
            "*"
        } else {
            " "
        };
        println!(
            "  {} {:<22} {:<8} ctx {:>6}{}",
            marker,
            model.name,
            model.variant,
            model.native_context,
            if model.supports_tools { "  tools" } else { "" }
        );
    }

    let cached = catalog.list_cached().map_err(diagnostic)?;
    let imported: Vec<_> = cached.iter().filter(|m| m.descriptor.is_none()).collect();
    if !imported.is_empty() {
        println!();
        println!("Imported models:");
        for model in imported {
            println!("    {:<22} {} MiB", model.name, model.size_bytes / (1024 * 1024));
        }
    }

    println!();
    println!("* = downloaded");
    println!(
        "Models directory: {}",
        catalog.layout().models_dir().display()
    );

    Ok(())
}

/// Download a model.
async fn pull(
    catalog: &ModelCatalog,
    name: &str,
    settings: &Settings,
    cancel: &CancellationToken,
) -> miette::Result<()> {
    if catalog.find(name).is_none() {
        return Err(miette::miette!(
            help = "Run `scmd model list` to see available models",
            "Unknown model '{}'",
            name
        ));
    }

    if catalog.is_cached(name) {
        println!("Model '{}' is already downloaded.", name);
        return Ok(());
    }

    if !settings.quiet {
        println!("Downloading model: {}", name);
        println!("This may take a while depending on your connection...");
        println!();
    }

    let path = catalog.resolve(name, cancel).await.map_err(diagnostic)?;

    if !settings.quiet {
        println!();
        println!("Model downloaded successfully!");
    }
    println!("Location: {}", path.display());
    Ok(())
}

fn remove(catalog: &ModelCatalog, name: &str) -> miette::Result<()> {
    let path = catalog.delete(name).map_err(diagnostic)?;
    println!("Removed {}", path.display());
    Ok(())
}

/// Install a model from a local file.
fn import(catalog: &ModelCatalog, source: &Path) -> miette::Result<()> {
    if !source.exists() {
        return Err(miette::miette!("File not found: {}", source.display()));
    }

    let ext = source.extension().and_then(|e| e.to_str());
    if ext != Some("gguf") {
        return Err(miette::miette!(
            "Expected a .gguf file, got: {}",
            source.display()
        ));
    }

    println!("Installing model from: {}", source.display());
    let dest = catalog.import(source).map_err(diagnostic)?;
    println!("Model installed to: {}", dest.display());
    if let Some(stem) = dest.file_stem().and_then(|s| s.to_str()) {
        println!("Use it with: SCMD_MODEL={} scmd complete \"...\"", stem);
    }
    Ok(())
}

/// Show information about models, paths, and hardware.
fn info(catalog: &ModelCatalog, settings: &Settings) -> miette::Result<()> {
    let layout = catalog.layout();

    println!("scmd Local Backend Configuration");
    println!("================================");
    println!();
    println!("Data directory:   {}", layout.root().display());
    println!("Models directory: {}", layout.models_dir().display());
    println!("Server log:       {}", layout.server_log().display());
    println!("PID file:         {}", layout.pid_file().display());
    println!();

    match BinaryLocator::for_layout(layout).locate() {
        Ok(path) => println!("Server binary:    {}", path.display()),
        Err(e) => println!("Server binary:    not found ({})", e),
    }
    println!();

    let resources = ResourceProfiler::detect_or_default();
    println!("CPUs:             {}", resources.cpu_count);
    println!(
        "RAM:              {} MiB total, {} MiB available",
        resources.total_ram_bytes / (1024 * 1024),
        resources.available_ram_bytes / (1024 * 1024)
    );
    println!("GPU:              {:?}", resources.gpu);
    println!();

    println!("Default model:    {}", settings.model);
    println!("  Downloaded: {}", catalog.is_cached(&settings.model));
    if let Some(model) = catalog.find(&settings.model) {
        let path = catalog.cached_path(model);
        if let Ok(meta) = std::fs::metadata(&path) {
            let limit = if model.native_context > 0 {
                model.native_context
            } else {
                FALLBACK_CONTEXT_SIZE
            };
            let rec = ResourceProfiler::recommend(&resources, meta.len(), limit);
            let gpu_layers = if settings.cpu_only { 0 } else { rec.gpu_layers };
            println!(
                "  Recommended: ctx {}, gpu layers {}",
                rec.context_size, gpu_layers
            );
        }
    }
    println!();

    println!("Port:             {}", settings.port);
    println!("CPU only:         {}", settings.cpu_only);
    println!("Autostart:        {}", !settings.no_autostart);

    Ok(())
}
