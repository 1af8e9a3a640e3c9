use std::future::Future;

use anyhow::{Result, bail};
use log::{debug, error, info};
use reqwest::{Client, Url};
use serde::Serialize;

use crate::event_log::EventLog;

/// An external spreadsheet that crossing rows are mirrored to.
pub trait SheetSync: Send + Sync {
    /// Appends `rows` in a single request.
    fn append_rows(&self, rows: Vec<Vec<String>>) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Serialize)]
struct AppendRows {
    rows: Vec<Vec<String>>,
}

/// Posts rows as `{"rows": [[...], ...]}` to a JSON webhook.
#[derive(Debug, Clone)]
pub struct WebhookSheet {
    client: Client,
    url: Url,
}

impl WebhookSheet {
    pub fn new(url: &str) -> Result<Self> {
        if url.is_empty() {
            bail!("webhook url not provided");
        }
        let Ok(url) = Url::try_from(url) else {
            bail!("failed to parse webhook url");
        };

        Ok(Self {
            client: Client::new(),
            url,
        })
    }
}

impl SheetSync for WebhookSheet {
    async fn append_rows(&self, rows: Vec<Vec<String>>) -> Result<()> {
        self.client
            .post(self.url.clone())
            .json(&AppendRows { rows })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Uploads the unsynced rows of `log` to `sheet` then marks them synced.
///
/// Returns the number of rows uploaded. Nothing is marked when the upload fails.
pub async fn sync_events(log: &EventLog, sheet: &impl SheetSync) -> Result<usize> {
    if !log.try_start_sync() {
        bail!("sheet sync is already running");
    }
    let result = sync_events_inner(log, sheet).await;
    log.end_sync();
    result
}

async fn sync_events_inner(log: &EventLog, sheet: &impl SheetSync) -> Result<usize> {
    let batch = log.begin_sync()?;
    if batch.is_empty() {
        debug!(target: "sheet", "nothing to sync");
        return Ok(0);
    }

    let count = batch.rows.len();
    sheet
        .append_rows(batch.rows.clone())
        .await
        .inspect_err(|err| error!(target: "sheet", "appending {count} rows failed {err:#}"))?;
    log.finish_sync(&batch)?;
    info!(target: "sheet", "synced {count} rows");

    Ok(count)
}
