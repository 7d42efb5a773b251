use airlift::adapters::airtable::AirtableClient;
use airlift::adapters::credentials::DropboxCredentials;
use airlift::adapters::dropbox::{empty_folder, DropboxClient};
use airlift::adapters::RetryPolicy;
use airlift::config::{DropboxConfig, RunConfig, RunMode};
use airlift::core::attachments::{AttachmentResolver, ScratchUploader};
use airlift::domain::ports::{AttachmentUploader, Pipeline, RecordStore};
use airlift::utils::{logger, validation::Validate};
use airlift::{AirliftError, CliArgs, EtlEngine, UploadPipeline};
use anyhow::Context;
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

#[tokio::main]
async fn main() {
    let config = match CliArgs::parse().load_run_config() {
        Ok(config) => config,
        Err(e) => fail(&e.into()),
    };

    if let Err(e) = logger::init_cli_logger(config.verbose, config.log_file.as_deref()) {
        fail(&e.into());
    }
    tracing::debug!("Run config: {:?}", redacted(&config));

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        fail(&e.into());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_signal = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("Interrupted; finishing in-flight uploads before stopping (Ctrl-C again to quit)");
        stop_signal.store(true, Ordering::SeqCst);

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("❌ Aborted");
            std::process::exit(130);
        }
    });

    let result = match config.mode {
        RunMode::Upload => run_upload(&config, stop).await,
        RunMode::RefreshDropboxToken => refresh_token(&config).await,
        RunMode::DeleteAllRecords => delete_all_records(&config).await,
        RunMode::EmptyDropboxFolder => empty_dropbox_folder(&config).await,
    };

    match result {
        Ok(()) => tracing::info!("Done!"),
        Err(e) => fail(&e),
    }
}

fn fail(error: &anyhow::Error) -> ! {
    match error.downcast_ref::<AirliftError>() {
        Some(e) => {
            tracing::error!(
                "❌ {:#} (Category: {:?}, Severity: {:?})",
                error,
                e.category(),
                e.severity()
            );
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 {}", e.recovery_suggestion());
            std::process::exit(e.exit_code().max(1));
        }
        None => {
            tracing::error!("❌ {:#}", error);
            eprintln!("❌ {:#}", error);
            std::process::exit(1);
        }
    }
}

fn redacted(config: &RunConfig) -> RunConfig {
    let mut shown = config.clone();
    if let Some(airtable) = shown.airtable.as_mut() {
        airtable.token = "***".to_string();
    }
    shown
}

async fn run_upload(config: &RunConfig, stop: Arc<AtomicBool>) -> anyhow::Result<()> {
    let input = config.input()?;
    let airtable = config.airtable()?;
    let store: Arc<dyn RecordStore> = Arc::new(
        AirtableClient::new(
            &airtable.api_url,
            airtable.token.clone(),
            airtable.base.clone(),
            airtable.table.clone(),
            config.retry.clone(),
        )
        .map_err(AirliftError::from)?,
    );

    tracing::info!("Validating {} against the Airtable schema", input.display());
    let pipeline = UploadPipeline::new(input, store)
        .with_duplicate_policy(config.duplicate_policy)
        .with_reconcile_options(config.reconcile_options())
        .with_workers(config.workers)
        .with_stop_flag(stop)
        .with_progress(config.show_progress);

    // Bad input must fail before any token exchange or folder creation.
    let records = pipeline.extract().await?;
    let resolver = attachment_resolver(config, input).await?;

    let engine = EtlEngine::new_with_monitoring(pipeline.with_resolver(resolver), config.monitor);
    let report = engine.run_extracted(records).await?;

    println!(
        "✅ Uploaded {} of {} records ({} failed)",
        report.uploaded(),
        report.total(),
        report.failed()
    );
    if report.attachment_failures > 0 {
        println!(
            "⚠️  {} attachments could not be uploaded and were left empty",
            report.attachment_failures
        );
    }
    Ok(())
}

async fn attachment_resolver(config: &RunConfig, input: &Path) -> anyhow::Result<AttachmentResolver> {
    let columns = config.attachment_columns.clone();
    let mappings = config.attachment_mappings.clone();
    if columns.is_empty() && mappings.is_empty() {
        return Ok(AttachmentResolver::disabled());
    }

    let Some(dropbox) = &config.dropbox else {
        tracing::warn!("No --dropbox-token given; attachment columns are uploaded as plain text");
        return Ok(AttachmentResolver::new(None, columns, mappings));
    };

    let client = connect_dropbox(dropbox, config.retry.clone()).await?;
    let uploader: Arc<dyn AttachmentUploader> = Arc::new(ScratchUploader::new(
        client,
        dropbox.root_folder(),
        chrono::Local::now().naive_local(),
    ));
    let resolver = AttachmentResolver::new(Some(uploader), columns, mappings);
    Ok(match input.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => resolver.with_base_dir(dir),
        _ => resolver,
    })
}

async fn connect_dropbox(dropbox: &DropboxConfig, retry: RetryPolicy) -> anyhow::Result<DropboxClient> {
    let mut credentials = DropboxCredentials::load(&dropbox.credentials)?;
    let refresh_token = credentials
        .ensure_refresh_token(&dropbox.endpoints, prompt_for_code)
        .await?;
    let client = DropboxClient::connect(
        &dropbox.endpoints,
        credentials.app_key(),
        &refresh_token,
        retry,
    )
    .await
    .map_err(|e| AirliftError::CredentialError {
        message: format!("failed to create the Dropbox client: {e}"),
    })?;
    Ok(client)
}

fn prompt_for_code(authorize_url: &Url) -> std::io::Result<String> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "1. Go to: {}", authorize_url)?;
    writeln!(stdout, "2. Click \"Allow\" (you might have to log in first).")?;
    writeln!(stdout, "3. Copy the authorization code.")?;
    write!(stdout, "Enter the authorization code here: ")?;
    stdout.flush()?;

    let mut code = String::new();
    std::io::stdin().lock().read_line(&mut code)?;
    Ok(code.trim().to_string())
}

async fn refresh_token(config: &RunConfig) -> anyhow::Result<()> {
    let dropbox = config.dropbox()?;
    let mut credentials = DropboxCredentials::load(&dropbox.credentials)?;
    credentials
        .replace_refresh_token(&dropbox.endpoints, prompt_for_code)
        .await?;
    println!("✅ Refresh token updated in {}", dropbox.credentials.display());
    Ok(())
}

async fn delete_all_records(config: &RunConfig) -> anyhow::Result<()> {
    let airtable = config.airtable()?;
    let client = AirtableClient::new(
        &airtable.api_url,
        airtable.token.clone(),
        airtable.base.clone(),
        airtable.table.clone(),
        config.retry.clone(),
    )
    .map_err(AirliftError::from)?;

    let deleted = client
        .delete_all_records()
        .await
        .map_err(AirliftError::from)
        .with_context(|| format!("could not empty table {}", airtable.table))?;
    println!("✅ Deleted {} records from {}", deleted, airtable.table);
    Ok(())
}

async fn empty_dropbox_folder(config: &RunConfig) -> anyhow::Result<()> {
    let dropbox = config.dropbox()?;
    let client = connect_dropbox(dropbox, config.retry.clone()).await?;
    let root = dropbox.root_folder();

    let removed = empty_folder(&client, root)
        .await
        .map_err(AirliftError::from)
        .with_context(|| format!("could not empty {root}"))?;
    println!("✅ Deleted {} entries from {}", removed, root);
    Ok(())
}
