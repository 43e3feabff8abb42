use crate::cli::actions::Action;
use crate::email::{EmailSender, HttpEmailSender, LogEmailSender};
use crate::ensaluti;
use crate::store::{IdentityStore, MemoryIdentityStore, PgIdentityStore};
use crate::workflow::{AuthWorkflow, WorkflowConfig};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            base_url,
            email_relay_url,
            landing_path,
        } => {
            let base_url =
                Url::parse(&base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;

            let config = WorkflowConfig::new(base_url).with_default_landing(landing_path);

            let store: Arc<dyn IdentityStore> = match dsn {
                Some(dsn) => {
                    // Connect to database
                    let pool = PgPoolOptions::new()
                        .min_connections(1)
                        .max_connections(5)
                        .max_lifetime(Duration::from_secs(60 * 2))
                        .test_before_acquire(true)
                        .connect(&dsn)
                        .await
                        .context("Failed to connect to database")?;

                    Arc::new(PgIdentityStore::new(pool))
                }
                None => {
                    warn!("No DSN configured, accounts will live in memory only");

                    Arc::new(MemoryIdentityStore::new())
                }
            };

            let mailer: Arc<dyn EmailSender> = match email_relay_url {
                Some(relay) => {
                    let relay = Url::parse(&relay)
                        .with_context(|| format!("Invalid email relay URL: {relay}"))?;

                    Arc::new(HttpEmailSender::new(relay)?)
                }
                None => {
                    warn!("No email relay configured, confirmation emails will be logged");

                    Arc::new(LogEmailSender)
                }
            };

            let workflow = Arc::new(AuthWorkflow::new(store, mailer, config));

            ensaluti::new(port, workflow).await?;
        }
    }

    Ok(())
}
