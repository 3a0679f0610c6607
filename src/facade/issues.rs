//! Lazy stream over the issues of one analysis.

use crate::error::FacadeError;
use crate::rpc::daemon_service::AnalysisDaemonClient;
use crate::rpc::{AnalysisId, Issue};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::debug;

use super::{request_context, FACADE_TARGET};

/// Issues of a running analysis, fetched page by page as the stream is polled.
///
/// The stream is forward-only and cannot be restarted. It ends with `None`
/// once the daemon reports no more issues; a failure is yielded once as
/// `Some(Err(_))` and then the stream ends. Dropping the stream before the end
/// asks the daemon to discard the remaining issues.
pub struct IssueStream {
    id: AnalysisId,
    client: AnalysisDaemonClient,
    timeout: Duration,
    finished: Arc<AtomicBool>,
    inner: BoxStream<'static, Result<Issue, FacadeError>>,
}

struct Cursor {
    client: AnalysisDaemonClient,
    id: AnalysisId,
    timeout: Duration,
    buffered: VecDeque<Issue>,
    exhausted: bool,
    finished: Arc<AtomicBool>,
}

impl IssueStream {
    /// `timeout` bounds each page request.
    pub(crate) fn new(client: AnalysisDaemonClient, id: AnalysisId, timeout: Duration) -> Self {
        let finished = Arc::new(AtomicBool::new(false));
        let cursor = Cursor {
            client: client.clone(),
            id,
            timeout,
            buffered: VecDeque::new(),
            exhausted: false,
            finished: finished.clone(),
        };
        Self {
            id,
            client,
            timeout,
            finished,
            inner: stream::unfold(cursor, next_issue).boxed(),
        }
    }

    /// The daemon-side analysis this stream reads from.
    pub fn id(&self) -> AnalysisId {
        self.id
    }
}

async fn next_issue(mut cursor: Cursor) -> Option<(Result<Issue, FacadeError>, Cursor)> {
    loop {
        if let Some(issue) = cursor.buffered.pop_front() {
            return Some((Ok(issue), cursor));
        }
        if cursor.exhausted {
            cursor.finished.store(true, Ordering::Release);
            return None;
        }
        match fetch_page(&cursor.client, cursor.id, cursor.timeout).await {
            Ok(Some(page)) => cursor.buffered.extend(page),
            Ok(None) => cursor.exhausted = true,
            Err(e) => {
                cursor.exhausted = true;
                cursor.finished.store(true, Ordering::Release);
                return Some((Err(e), cursor));
            }
        }
    }
}

async fn fetch_page(
    client: &AnalysisDaemonClient,
    id: AnalysisId,
    timeout: Duration,
) -> Result<Option<Vec<Issue>>, FacadeError> {
    Ok(client.next_issues(request_context(timeout), id).await??)
}

impl Stream for IssueStream {
    type Item = Result<Issue, FacadeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for IssueStream {
    fn drop(&mut self) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.client.clone();
        let id = self.id;
        let ctx = request_context(self.timeout);
        runtime.spawn(async move {
            if let Err(e) = client.cancel_analysis(ctx, id).await {
                debug!(target: FACADE_TARGET, id, error = %e, "failed to cancel abandoned analysis");
            }
        });
    }
}
