mod args;
mod ui;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser as _;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use splat_actions::apply_actions;
use splat_process::{WriteOptions, combine, read_file, split_environment, write_file};
use splat_table::DataTable;

use args::{Cli, FileSpec, parse_lod_select, parse_pipeline};
use ui::ReadUi;

fn main() -> ExitCode {
    // Every user-facing failure exits 1; clap's default would be 2.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let ok = matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            );
            let _ = err.print();
            return if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE };
        }
    };

    let multi = MultiProgress::new();
    let level = if cli.quiet { "error" } else { "info" };
    let logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .build();
    LogWrapper::new(multi.clone(), logger)
        .try_init()
        .expect("Logger init only happens once");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to initialize tokio runtime");

    match runtime.block_on(run(cli, multi)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Generator params travel separately from the table-level actions.
fn generator_params(spec: &FileSpec) -> Vec<(String, String)> {
    spec.actions
        .iter()
        .filter_map(|action| match action {
            splat_actions::ProcessAction::Param { name, value } => {
                Some((name.clone(), value.clone()))
            }
            _ => None,
        })
        .collect()
}

async fn load_input(spec: FileSpec, ui: &ReadUi) -> Result<DataTable> {
    let params = generator_params(&spec);
    let (bar, progress) = ui.reader_progress(&spec.name);
    let table = read_file(&spec.name, &params, Some(progress)).await?;
    bar.finish_and_clear();

    let table = apply_actions(table, &spec.actions)
        .with_context(|| format!("Applying actions to {}", spec.name))?;
    anyhow::ensure!(
        table.num_rows() > 0,
        "No splats left in {} after filtering",
        spec.name
    );
    Ok(table)
}

async fn run(cli: Cli, multi: MultiProgress) -> Result<()> {
    let pipeline = parse_pipeline(&cli.files)?;
    let ui = ReadUi::new(multi, cli.quiet);

    if cli.cpu {
        log::debug!("Forcing CPU k-means");
    }

    let viewer_settings = match &cli.viewer_settings {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Reading viewer settings {}", path.display()))?;
            Some(serde_json::from_slice(&bytes).context("Viewer settings are not valid JSON")?)
        }
        None => None,
    };

    // Inputs are independent; read them concurrently.
    let input_count = pipeline.inputs.len();
    let mut joins = tokio::task::JoinSet::new();
    for (index, spec) in pipeline.inputs.into_iter().enumerate() {
        let task_ui = ui.clone();
        joins.spawn(async move {
            let table = load_input(spec, &task_ui).await;
            (index, table)
        });
    }

    let mut tables: Vec<Option<DataTable>> = (0..input_count).map(|_| None).collect();
    while let Some(joined) = joins.join_next().await {
        let (index, table) = joined.context("Input reader task failed")?;
        tables[index] = Some(table?);
    }
    let tables: Vec<DataTable> = tables
        .into_iter()
        .map(|t| t.expect("Every input task reported back"))
        .collect();

    let combined = combine(&tables)?;
    drop(tables);

    let combined = apply_actions(combined, &pipeline.output.actions)
        .with_context(|| format!("Applying actions to {}", pipeline.output.name))?;
    anyhow::ensure!(
        combined.num_rows() > 0,
        "No splats left to write after filtering"
    );

    let (main_table, environment) = split_environment(combined);

    let options = WriteOptions {
        overwrite: cli.overwrite,
        unbundled: cli.unbundled,
        iterations: cli.iterations,
        viewer_settings,
        lod_select: cli
            .lod_select
            .as_deref()
            .map(parse_lod_select)
            .transpose()?,
        lod_chunk_count: cli.lod_chunk_count,
        lod_chunk_extent: cli.lod_chunk_extent,
    };

    write_file(
        &pipeline.output.name,
        &main_table,
        environment.as_ref(),
        &options,
    )
    .await?;

    log::info!(
        "Done: {} splats -> {}",
        main_table.num_rows(),
        pipeline.output.name
    );
    Ok(())
}
