//! This build script validates the default configuration file (`default_config.toml`)

#![allow(dead_code, reason = "Some items may be unused in this build script context")]

use core::str::FromStr;
use ohno::{IntoAppError, app_err};
use std::env;
use std::path::PathBuf;
use std::process;
use strum::IntoEnumIterator;

type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

#[path = "src/enrichment/source_name.rs"]
mod source_name;

use source_name::{ResourceName, SourceName};

fn main() {
    match inner_main() {
        Ok(warnings) => {
            if !warnings.is_empty() {
                for warning in warnings {
                    eprintln!("cargo:warning=Config validation warning: {warning}");
                }

                process::exit(1);
            }

            println!("cargo:rerun-if-changed=default_config.toml");
            println!("cargo:rerun-if-changed=src/enrichment/source_name.rs");
            process::exit(0);
        }
        Err(e) => {
            eprintln!("unable to load default_config.toml: {e:?}");
            process::exit(1);
        }
    }
}

fn inner_main() -> Result<Vec<String>> {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").into_app_err("CARGO_MANIFEST_DIR should be set during build")?;
    let config_path = PathBuf::from(&manifest_dir).join("default_config.toml");

    let text = std::fs::read_to_string(&config_path).into_app_err("unable to read default_config.toml")?;
    let table: toml::Table = toml::from_str(&text).into_app_err("unable to parse default_config.toml")?;

    let mut warnings = Vec::new();

    let freshness = table
        .get("freshness")
        .and_then(toml::Value::as_table)
        .ok_or_else(|| app_err!("default_config.toml has no [freshness] table"))?;

    for name in freshness.keys() {
        if SourceName::from_str(name).is_err() {
            warnings.push(format!("[freshness] names unknown source '{name}'"));
        }
    }

    for source in SourceName::iter() {
        if !freshness.contains_key(source.name()) {
            warnings.push(format!("[freshness] has no max age for source '{source}'"));
        }
    }

    let rate_limits = table
        .get("rate_limits")
        .and_then(toml::Value::as_table)
        .ok_or_else(|| app_err!("default_config.toml has no [rate_limits] table"))?;

    for name in rate_limits.keys() {
        if ResourceName::from_str(name).is_err() {
            warnings.push(format!("[rate_limits] names unknown resource '{name}'"));
        }
    }

    for resource in ResourceName::iter() {
        if !rate_limits.contains_key(resource.name()) {
            warnings.push(format!("[rate_limits] has no bucket for resource '{resource}'"));
        }
    }

    Ok(warnings)
}
