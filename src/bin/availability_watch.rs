// Signs in, keeps one resource type/date in sync and logs the slot board whenever it changes.
//
//   availability_watch <Room|Desk|ParkingSpot> [YYYY-MM-DD]

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use tracing::{info, warn};

use slot_sync::config::ClientConfig;
use slot_sync::engine::BookingEngine;
use slot_sync::logging::init_tracing;
use slot_sync::models::ResourceType;
use slot_sync::resolver::{SlotBoard, SlotStatus};
use slot_sync::session::FileSessionStorage;

const EMAIL_VAR: &str = "SLOT_SYNC_EMAIL";
const PASSWORD_VAR: &str = "SLOT_SYNC_PASSWORD";
const SESSION_FILE_VAR: &str = "SLOT_SYNC_SESSION_FILE";
const DEFAULT_SESSION_FILE: &str = ".slot_sync/session.json";
const REFRESH_EVERY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let Some(raw_type) = args.next() else {
        bail!("usage: availability_watch <Room|Desk|ParkingSpot> [YYYY-MM-DD]");
    };
    let resource_type: ResourceType = raw_type.parse().map_err(anyhow::Error::msg)?;

    let config = ClientConfig::from_env();
    let session_file =
        std::env::var(SESSION_FILE_VAR).unwrap_or_else(|_| DEFAULT_SESSION_FILE.to_string());
    let engine = BookingEngine::connect(config, FileSessionStorage::new(session_file))
        .context("failed to set up the booking engine")?;

    let date = match args.next() {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .with_context(|| format!("invalid date '{}'", raw))?,
        None => engine.today(),
    };

    if !engine.session().is_signed_in() {
        let email = std::env::var(EMAIL_VAR)
            .with_context(|| format!("no stored session, set {} and {}", EMAIL_VAR, PASSWORD_VAR))?;
        let password = std::env::var(PASSWORD_VAR)
            .with_context(|| format!("{} is not set", PASSWORD_VAR))?;
        engine.login(&email, &password).await.context("sign-in failed")?;
    }

    if !engine.watch(resource_type, date).await? {
        bail!(
            "nothing to watch: no {} resources, or {} is outside the booking window",
            resource_type,
            date
        );
    }
    info!(%resource_type, %date, "watching availability");

    let mut sync_state = engine.sync().watch_state();
    let mut ticker = tokio::time::interval(REFRESH_EVERY);
    let mut last: Option<SlotBoard> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            changed = sync_state.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *sync_state.borrow_and_update();
                info!(?state, "sync state");
            }
            _ = ticker.tick() => {
                match engine.board(resource_type, date).await {
                    Ok(board) if last.as_ref() != Some(&board) => {
                        log_board(&board);
                        last = Some(board);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "could not resolve board"),
                }
            }
        }
    }

    engine.unwatch();
    Ok(())
}

fn log_board(board: &SlotBoard) {
    let window = match (board.hours.first(), board.hours.last()) {
        (Some(first), Some(last)) => format!("{:02}-{:02}", first, last + 1),
        _ => String::new(),
    };

    for row in &board.rows {
        let slots: String = row
            .statuses
            .iter()
            .map(|status| match status {
                SlotStatus::Available => '.',
                SlotStatus::Yours => '*',
                SlotStatus::Unavailable => 'x',
                SlotStatus::Past => '-',
                SlotStatus::Disabled => ' ',
            })
            .collect();
        info!(resource = %row.resource_name, hours = %window, %slots, "board");
    }
}
