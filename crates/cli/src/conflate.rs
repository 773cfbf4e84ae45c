//! `geomerge run | validate | import`.

use std::path::{Path, PathBuf};

use geomerge_conflate::{DatasetConfig, Session};

use crate::exit_codes::EXIT_ERROR;
use crate::CliError;

fn load_config(path: &Path) -> Result<DatasetConfig, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::usage(format!("cannot read config {}: {e}", path.display())))?;
    Ok(DatasetConfig::from_toml(&text)?)
}

fn open_store(store: Option<&Path>) -> Result<Session, CliError> {
    let session = match store {
        Some(path) => Session::open(path)?,
        None => Session::open_in_memory()?,
    };
    Ok(session)
}

pub fn cmd_run(
    config_path: PathBuf,
    store: Option<PathBuf>,
    out_dir: PathBuf,
    json_output: bool,
    output_file: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let mut session = open_store(store.as_deref())?;

    // Source file is resolved against the config file's directory.
    if let Some(ref file) = config.source.file {
        let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        let csv_path = base_dir.join(file);
        let csv_data = std::fs::read_to_string(&csv_path)
            .map_err(|e| CliError::usage(format!("cannot read {}: {e}", csv_path.display())))?;
        session.import_csv(&config.source.table, &csv_data)?;
    } else if store.is_none() {
        return Err(CliError::usage("nothing to read: no --store and no [source] file")
            .with_hint("pass --store <db> or set source.file in the config"));
    }

    // An empty map side would report every official record as missing.
    if session.count_map_features()? == 0 {
        let hint = if store.is_some() {
            "load the map_feature table into the store first"
        } else {
            "pass --store <db> holding the map_feature table"
        };
        return Err(CliError::usage("no map features to conflate against").with_hint(hint));
    }

    let result = geomerge_conflate::run(&session, &config)?;

    std::fs::create_dir_all(&out_dir)
        .map_err(|e| CliError::export(format!("cannot create {}: {e}", out_dir.display())))?;
    let written = geomerge_conflate::write_reports(&result, &config, &out_dir)?;

    let json_str = serde_json::to_string_pretty(&result).map_err(|e| CliError {
        code: EXIT_ERROR,
        message: format!("JSON serialization error: {e}"),
        hint: None,
    })?;

    if let Some(ref path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| CliError::export(format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if json_output {
        println!("{json_str}");
    }

    let s = &result.summary;
    eprintln!(
        "{} ({}): {} matched, {} missing from map, {} missing from official, {} possible merges; {} report file(s)",
        result.meta.dataset,
        result.meta.mode,
        s.matched,
        s.missing_from_map,
        s.missing_from_official,
        s.possible_merges,
        written.len(),
    );
    let st = &result.stats;
    if st.skipped_rows > 0 || st.tag_failures > 0 {
        eprintln!(
            "data quality: {} source row(s) skipped, {} tag mapping failure(s)",
            st.skipped_rows, st.tag_failures,
        );
    }

    Ok(())
}

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let mode = if config.is_geo_only() { "geo-only" } else { "identifier" };
    eprintln!(
        "{}: ok ({mode} matching, {} m, table '{}')",
        config.name, config.conflation_distance, config.source.table,
    );
    Ok(())
}

pub fn cmd_import(file: PathBuf, store: PathBuf, table: String) -> Result<(), CliError> {
    let csv_data = std::fs::read_to_string(&file)
        .map_err(|e| CliError::usage(format!("cannot read {}: {e}", file.display())))?;
    let mut session = Session::open(&store)?;
    let rows = session.import_csv(&table, &csv_data)?;
    eprintln!("imported {rows} row(s) into '{table}' ({})", store.display());
    Ok(())
}
