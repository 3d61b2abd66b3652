//! Command-line argument definitions
//!
//! This module defines all CLI arguments and subcommands using clap.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Find near-duplicate comics by comparing perceptual fingerprints of their pages
#[derive(Parser, Debug)]
#[command(name = "comic-dupes")]
#[command(author = "Vihaan Reddy M")]
#[command(version)]
#[command(about = "Find near-duplicate comics by comparing the pages they share", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace (overrides config)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan one or more library folders for duplicate comics
    Scan {
        /// Library folders to scan
        #[arg(required = true, value_name = "ROOT")]
        roots: Vec<PathBuf>,

        /// Maximum Hamming distance for two pages to count as similar
        #[arg(short, long)]
        threshold: Option<u32>,

        /// Distinct similar pages needed before two comics are duplicates
        #[arg(short = 'm', long)]
        min_similar: Option<usize>,

        /// Number of extraction workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Ignore and do not write the fingerprint and match caches
        #[arg(long)]
        no_cache: bool,

        /// Skip comics with fewer images than this
        #[arg(long, value_name = "COUNT")]
        min_images: Option<usize>,

        /// Skip comics with more images than this (0 = unlimited)
        #[arg(long, value_name = "COUNT")]
        max_images: Option<usize>,

        /// Folder of images to ignore (credit pages, scanner logos)
        #[arg(long, value_name = "FOLDER")]
        blacklist: Option<PathBuf>,

        /// Skip comics whose file name matches this regex
        #[arg(long, value_name = "REGEX")]
        exclude_regex: Option<String>,

        /// Skip comics modified before this day (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        modified_after: Option<NaiveDate>,

        /// Skip comics modified after this day (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        modified_before: Option<NaiveDate>,

        /// Skip comics created before this day (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        created_after: Option<NaiveDate>,

        /// Skip comics created after this day (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        created_before: Option<NaiveDate>,

        /// Write the scan summary and groups as JSON to this file
        #[arg(long, value_name = "FILE")]
        json: Option<PathBuf>,
    },

    /// Inspect or clean the on-disk caches
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },

    /// Show or generate the configuration file
    ///
    /// The config file is looked up at ./config.toml, ./comic_dupes.toml and
    /// then the standard location:
    /// - Windows: %APPDATA%\comic_dupe_finder\config.toml
    /// - Linux: ~/.config/comic_dupe_finder/config.toml
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show entry counts and sizes
    Stats,

    /// Delete every cached fingerprint and the match index
    Clear,

    /// Delete fingerprint entries older than a number of days
    Prune {
        /// Maximum age in days (defaults to cache.max_age_days)
        #[arg(short, long)]
        days: Option<u32>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Write a commented default configuration file
    Generate {
        /// Output path (defaults to the standard location)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
