//! Command handler implementations
//!
//! This module contains the implementation of all CLI commands.

use crate::cli::progress::{
    format_bytes, format_duration, print_divider, print_error, print_header, print_info,
    print_success, print_warning, ScanProgressDisplay,
};
use crate::cli::{Args, CacheCommands, Commands, ConfigCommands};
use crate::core::config::{get_config_path, Config};
use crate::duplicate::{DuplicateGroup, FingerprintCache, PersistentMatchCache, MATCH_INDEX_FILE};
use crate::scan::{ScanCoordinator, ScanEvent, ScanSummary, FINGERPRINT_CACHE_DIR};
use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often the scan loop checks for Ctrl+C between events
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run the appropriate command based on CLI arguments
pub fn run_command(args: &Args, config: &Config, shutdown_flag: Arc<AtomicBool>) -> Result<()> {
    match &args.command {
        Commands::Scan {
            roots,
            threshold,
            min_similar,
            workers,
            no_cache,
            min_images,
            max_images,
            blacklist,
            exclude_regex,
            modified_after,
            modified_before,
            created_after,
            created_before,
            json,
        } => {
            let mut config = config.clone();
            if let Some(threshold) = threshold {
                config.detection.override_threshold(*threshold);
            }
            if let Some(min_similar) = min_similar {
                config.detection.min_similar_images = *min_similar;
            }
            if let Some(workers) = workers {
                config.scan.workers = *workers;
            }
            if *no_cache {
                config.cache.enabled = false;
            }
            if let Some(min_images) = min_images {
                config.detection.min_comic_images = *min_images;
            }
            if let Some(max_images) = max_images {
                config.detection.max_comic_images = *max_images;
            }
            if let Some(folder) = blacklist {
                config.blacklist.folder = Some(folder.clone());
            }
            if let Some(pattern) = exclude_regex {
                config.filter.exclude_regex = Some(pattern.clone());
            }
            if modified_after.is_some() {
                config.filter.modified_after = *modified_after;
            }
            if modified_before.is_some() {
                config.filter.modified_before = *modified_before;
            }
            if created_after.is_some() {
                config.filter.created_after = *created_after;
            }
            if created_before.is_some() {
                config.filter.created_before = *created_before;
            }

            scan_library(&config, roots.clone(), json.as_deref(), shutdown_flag)?;
        }
        Commands::Cache { action } => match action {
            CacheCommands::Stats => cache_stats(config)?,
            CacheCommands::Clear => cache_clear(config)?,
            CacheCommands::Prune { days } => {
                cache_prune(config, days.unwrap_or(config.cache.max_age_days))?
            }
        },
        Commands::Config { action } => match action {
            ConfigCommands::Show => show_config(config),
            ConfigCommands::Generate { output } => generate_config_file(output.clone())?,
        },
    }

    Ok(())
}

// ============================================================================
// Scan
// ============================================================================

/// Scan library roots and report duplicate groups
pub fn scan_library(
    config: &Config,
    roots: Vec<PathBuf>,
    json_output: Option<&Path>,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<()> {
    print_header("Comic Duplicate Scan");
    for root in &roots {
        print_info(&format!("Root: {}", root.display()));
    }
    print_info(&format!(
        "Threshold {} | {} similar pages | {} workers | algorithm {}",
        config.detection.effective_threshold(),
        config.detection.min_similar_images,
        config.scan.workers,
        config.detection.hash_algorithm.name()
    ));
    if config.cache.enabled {
        print_info(&format!("Cache: {}", config.cache.directory.display()));
    }
    println!();

    let coordinator =
        ScanCoordinator::from_config(config).context("Failed to prepare the scan")?;
    if !coordinator.options().blacklist.is_empty() {
        print_info(&format!(
            "Blacklist: {} fingerprints",
            coordinator.options().blacklist.len()
        ));
    }
    coordinator.start(roots)?;

    let mut display = ScanProgressDisplay::new();
    let mut stop_requested = false;

    let terminal = loop {
        if !stop_requested && shutdown_flag.load(Ordering::SeqCst) {
            stop_requested = true;
            display.log("Stopping after the current comic...");
            if let Err(e) = coordinator.stop() {
                warn!("Failed to stop scan: {}", e);
            }
        }

        match coordinator.recv_event_timeout(EVENT_POLL_INTERVAL) {
            Some(event) => {
                display.handle(&event);
                if event.is_terminal() {
                    break event;
                }
            }
            None if !coordinator.is_active() => {
                // the state flips just before the terminal event is sent
                match coordinator.recv_event_timeout(Duration::from_secs(1)) {
                    Some(event) if event.is_terminal() => {
                        display.handle(&event);
                        break event;
                    }
                    Some(event) => display.handle(&event),
                    None => bail!("Scan thread ended without a result"),
                }
            }
            None => {}
        }
    };
    coordinator.wait()?;

    let summary = match terminal {
        ScanEvent::Completed(summary) => summary,
        ScanEvent::Stopped(summary) => {
            print_warning("Scan stopped before finishing; groups below may be incomplete");
            summary
        }
        ScanEvent::Failed { error } => bail!("Scan failed: {}", error),
        _ => bail!("Scan ended unexpectedly"),
    };

    print_summary(&summary);

    if let Some(path) = json_output {
        write_json_report(&summary, path)?;
        print_success(&format!("Report written to {}", path.display()));
    }

    Ok(())
}

fn print_summary(summary: &ScanSummary) {
    print_divider();
    if summary.groups.is_empty() {
        print_success("No duplicate comics found");
    } else {
        for (i, group) in summary.groups.iter().enumerate() {
            print_group(i + 1, group);
        }
    }

    let stats = &summary.stats;
    print_divider();
    print_info(&format!(
        "Comics: {} found, {} fingerprinted, {} errors, {} from cache",
        stats.comics_found, stats.comics_extracted, stats.errors, stats.cache_hits
    ));
    if stats.comics_excluded > 0 {
        print_info(&format!(
            "{} comics excluded by name or date",
            stats.comics_excluded
        ));
    }
    if stats.errors > 0 {
        print_error(&format!(
            "{} comics could not be read and were left out",
            stats.errors
        ));
    }
    print_info(&format!(
        "Images: {} rejected, {} blacklisted",
        stats.rejected_images, stats.blacklisted_images
    ));
    print_info(&format!(
        "Detection: {} candidates, {} compared, {} skipped, {} groups reused",
        stats.candidates, stats.compared, stats.skipped, stats.restored_groups
    ));
    print_success(&format!(
        "{} duplicate groups in {}",
        summary.groups.len(),
        format_duration(summary.elapsed)
    ));
}

fn print_group(number: usize, group: &DuplicateGroup) {
    println!(
        "Group {} ({} comics, {} similar pages)",
        number,
        group.len(),
        group.similarity_count()
    );
    for member in &group.members {
        println!(
            "    {} ({} images, {})",
            member.path.display(),
            member.image_count,
            format_bytes(member.size)
        );
    }
    println!();
}

/// Write the scan summary as pretty JSON
pub fn write_json_report(summary: &ScanSummary, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

// ============================================================================
// Cache
// ============================================================================

fn fingerprint_cache(config: &Config) -> Result<FingerprintCache> {
    let dir = config.cache.directory.join(FINGERPRINT_CACHE_DIR);
    FingerprintCache::open(&dir)
        .with_context(|| format!("Failed to open cache at {}", dir.display()))
}

/// Show cache entry counts and sizes
pub fn cache_stats(config: &Config) -> Result<()> {
    let stats = fingerprint_cache(config)?.stats()?;
    let index_path = config.cache.directory.join(MATCH_INDEX_FILE);

    print_header("Cache");
    print_info(&format!("Directory: {}", config.cache.directory.display()));
    print_info(&format!(
        "Fingerprint entries: {} ({})",
        stats.entries,
        format_bytes(stats.total_bytes)
    ));
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        print_info(&format!(
            "Written between {} and {}",
            oldest.format("%Y-%m-%d %H:%M"),
            newest.format("%Y-%m-%d %H:%M")
        ));
    }
    match fs::metadata(&index_path) {
        Ok(meta) => print_info(&format!("Match index: {}", format_bytes(meta.len()))),
        Err(_) => print_info("Match index: none"),
    }

    Ok(())
}

/// Delete every cached fingerprint and the match index
pub fn cache_clear(config: &Config) -> Result<()> {
    let removed = fingerprint_cache(config)?.clear()?;
    let index_removed =
        PersistentMatchCache::remove_file(&config.cache.directory.join(MATCH_INDEX_FILE))?;

    print_success(&format!("Removed {} fingerprint entries", removed));
    if index_removed {
        print_success("Removed match index");
    }
    Ok(())
}

/// Delete fingerprint entries older than `days`
pub fn cache_prune(config: &Config, days: u32) -> Result<()> {
    let removed = fingerprint_cache(config)?.prune(days)?;
    print_success(&format!(
        "Removed {} fingerprint entries older than {} days",
        removed, days
    ));
    Ok(())
}

// ============================================================================
// Config
// ============================================================================

/// Generate a configuration file at the specified or default location
pub fn generate_config_file(output: Option<PathBuf>) -> Result<()> {
    let output_path = match output {
        Some(path) => path,
        None => get_config_path().context("Could not determine the config directory")?,
    };

    if output_path.exists() {
        bail!(
            "{} already exists; remove it first or pass --output",
            output_path.display()
        );
    }

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&output_path, Config::generate_default_config())?;

    info!("Configuration file: {}", output_path.display());
    info!("Edit this file to customize the scan settings.");
    Ok(())
}

/// Show the current configuration settings
pub fn show_config(config: &Config) {
    let config_path = Config::get_active_config_path();
    info!("Configuration file: {}", config_path.display());
    if !config_path.exists() {
        info!("(Using default settings - no config file found)");
    }
    info!("");
    info!("[scan]");
    info!("  workers = {}", config.scan.workers);
    info!("  image_extensions = {:?}", config.scan.image_extensions);
    info!("  recursive = {}", config.scan.recursive);
    info!("");
    info!("[detection]");
    info!(
        "  hash_algorithm = \"{}\"",
        config.detection.hash_algorithm.name()
    );
    info!("  hash_size = {}", config.detection.hash_size);
    info!(
        "  similarity_threshold = {}",
        config.detection.similarity_threshold
    );
    for (name, threshold) in &config.detection.similarity_thresholds {
        info!("  similarity_thresholds.{} = {}", name, threshold);
    }
    info!(
        "  min_similar_images = {}",
        config.detection.min_similar_images
    );
    info!(
        "  min_image_size = {}x{}",
        config.detection.min_image_width, config.detection.min_image_height
    );
    info!(
        "  comic_images = {}..{}",
        config.detection.min_comic_images,
        match config.detection.max_comic_images {
            0 => "unlimited".to_string(),
            n => n.to_string(),
        }
    );
    info!("");
    info!("[cache]");
    info!("  enabled = {}", config.cache.enabled);
    info!("  directory = \"{}\"", config.cache.directory.display());
    info!("  max_age_days = {}", config.cache.max_age_days);
    info!("");
    info!("[blacklist]");
    info!(
        "  folder = {:?}",
        config
            .blacklist
            .folder
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    info!("  hashes = {} entries", config.blacklist.hashes.len());
    info!("");
    info!("[filter]");
    let filter = &config.filter;
    if let Some(pattern) = &filter.exclude_regex {
        info!("  exclude_regex = {:?}", pattern);
    }
    for (key, day) in [
        ("created_after", filter.created_after),
        ("created_before", filter.created_before),
        ("modified_after", filter.modified_after),
        ("modified_before", filter.modified_before),
    ] {
        if let Some(day) = day {
            info!("  {} = {}", key, day);
        }
    }
    info!("");
    info!("[logging]");
    info!("  level = \"{}\"", config.logging.level);
    info!("  log_to_file = {}", config.logging.log_to_file);
    if let Err(e) = config.validate() {
        info!("");
        warn!("{}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicate::GroupMember;
    use crate::duplicate::CacheKey;
    use tempfile::TempDir;

    #[test]
    fn test_json_report_shape() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("report.json");

        let summary = ScanSummary {
            groups: vec![DuplicateGroup {
                members: vec![GroupMember {
                    path: PathBuf::from("/lib/a"),
                    cache_key: CacheKey::from("abc"),
                    image_count: 12,
                    size: 4096,
                }],
                evidence: Vec::new(),
            }],
            completed: true,
            ..Default::default()
        };
        write_json_report(&summary, &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["completed"], true);
        assert_eq!(value["groups"][0]["members"][0]["image_count"], 12);
        assert_eq!(value["groups"][0]["members"][0]["size"], 4096);
    }

    #[test]
    fn test_generate_config_refuses_to_overwrite() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        generate_config_file(Some(path.clone())).unwrap();
        assert!(Config::load(&path).is_ok());
        assert!(generate_config_file(Some(path)).is_err());
    }

    #[test]
    fn test_cache_clear_removes_match_index() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.cache.directory = temp.path().to_path_buf();

        let index = temp.path().join(MATCH_INDEX_FILE);
        fs::write(&index, "{}").unwrap();

        cache_clear(&config).unwrap();
        assert!(!index.exists());
    }
}
