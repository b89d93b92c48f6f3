use futures::Stream;
use pin_project_lite::pin_project;
use postgres::time::micros_since_postgres_epoch;
use postgres_replication::LogicalReplicationStream;
use postgres_replication::protocol::{LogicalReplicationMessage, ReplicationMessage};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio_postgres::types::PgLsn;
use tracing::debug;

use crate::cdc_error;
use crate::error::{CdcError, CdcResult, ErrorKind};

/// Minimum time between two unforced reports of the same confirmed position.
const REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Progress of a streaming session as reported in standby status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandbyProgress {
    /// Last WAL position received from the server.
    pub received_lsn: PgLsn,
    /// Last WAL position whose record the consumer accepted. Reported as both flushed and
    /// applied, so the server may recycle WAL up to it.
    pub confirmed_lsn: PgLsn,
}

/// Last confirmed position sent to the server and when.
#[derive(Debug, Clone, Copy)]
struct LastReport {
    at: Instant,
    confirmed_lsn: PgLsn,
}

impl LastReport {
    /// An unforced report is redundant when it confirms nothing new shortly after the previous
    /// one. The received position is not compared as it moves with every message.
    fn makes_redundant(&self, progress: &StandbyProgress, now: Instant) -> bool {
        progress.confirmed_lsn == self.confirmed_lsn
            && now.saturating_duration_since(self.at) < REPORT_INTERVAL
    }
}

pin_project! {
    /// Replication messages of a logical replication session.
    ///
    /// Also carries the reverse channel of the session, see [`EventsStream::report_progress`].
    #[must_use = "streams do nothing unless polled"]
    pub struct EventsStream {
        #[pin]
        stream: LogicalReplicationStream,
        last_report: Option<LastReport>,
    }
}

impl EventsStream {
    pub fn wrap(stream: LogicalReplicationStream) -> Self {
        Self {
            stream,
            last_report: None,
        }
    }

    /// Sends `progress` to the server as a standby status update.
    ///
    /// Unless `force` is set, nothing is sent when the confirmed position was already reported
    /// less than [`REPORT_INTERVAL`] ago.
    pub async fn report_progress(
        self: Pin<&mut Self>,
        progress: StandbyProgress,
        force: bool,
    ) -> CdcResult<()> {
        let this = self.project();
        let now = Instant::now();

        if !force
            && let Some(last_report) = this.last_report
            && last_report.makes_redundant(&progress, now)
        {
            return Ok(());
        }

        let sent_at = micros_since_postgres_epoch().map_err(|err| {
            cdc_error!(
                ErrorKind::InvalidState,
                "System clock is before the Postgres epoch",
                err.to_string()
            )
        })?;

        let StandbyProgress {
            received_lsn,
            confirmed_lsn,
        } = progress;
        this.stream
            .standby_status_update(received_lsn, confirmed_lsn, confirmed_lsn, sent_at, 0)
            .await?;

        debug!(%received_lsn, %confirmed_lsn, force, "reported progress");

        *this.last_report = Some(LastReport {
            at: now,
            confirmed_lsn,
        });

        Ok(())
    }
}

impl Stream for EventsStream {
    type Item = CdcResult<ReplicationMessage<LogicalReplicationMessage>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project()
            .stream
            .poll_next(cx)
            .map(|message| message.map(|message| message.map_err(CdcError::from)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(received: u64, confirmed: u64) -> StandbyProgress {
        StandbyProgress {
            received_lsn: PgLsn::from(received),
            confirmed_lsn: PgLsn::from(confirmed),
        }
    }

    #[test]
    fn repeated_confirmation_is_redundant_within_interval() {
        let now = Instant::now();
        let last_report = LastReport {
            at: now,
            confirmed_lsn: PgLsn::from(10),
        };

        assert!(last_report.makes_redundant(&progress(50, 10), now));
        assert!(!last_report.makes_redundant(&progress(50, 10), now + REPORT_INTERVAL));
    }

    #[test]
    fn new_confirmation_is_never_redundant() {
        let now = Instant::now();
        let last_report = LastReport {
            at: now,
            confirmed_lsn: PgLsn::from(10),
        };

        assert!(!last_report.makes_redundant(&progress(50, 20), now));
    }
}
