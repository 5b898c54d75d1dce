use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::domain::AdmissionRecord;
use super::ports::{Notification, NotificationDispatcher, NotificationTemplate};

/// Best-effort wrapper around the notification port. Failures and timeouts are
/// logged and swallowed.
#[derive(Clone)]
pub(crate) struct Notifier {
    dispatcher: Arc<dyn NotificationDispatcher>,
    timeout: Duration,
}

impl Notifier {
    pub(crate) fn new(dispatcher: Arc<dyn NotificationDispatcher>, timeout: Duration) -> Self {
        Self {
            dispatcher,
            timeout,
        }
    }

    pub(crate) async fn send(
        &self,
        record: &AdmissionRecord,
        template: NotificationTemplate,
        mut payload: BTreeMap<String, String>,
    ) {
        let destination = record
            .guardian
            .contact
            .destination()
            .or(record.applicant.contact.destination());
        let Some(destination) = destination else {
            debug!(
                admission_id = %record.admission_id,
                ?template,
                "no contact on file; notification skipped"
            );
            return;
        };

        payload
            .entry("temporary_id".to_string())
            .or_insert_with(|| record.temporary_id.to_string());
        payload
            .entry("applicant_name".to_string())
            .or_insert_with(|| record.applicant.full_name());

        let notification = Notification {
            destination: destination.to_string(),
            template,
            admission_id: record.admission_id,
            payload,
        };

        match tokio::time::timeout(self.timeout, self.dispatcher.send(notification)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                admission_id = %record.admission_id,
                ?template,
                error = %err,
                "notification failed"
            ),
            Err(_) => warn!(
                admission_id = %record.admission_id,
                ?template,
                "notification timed out"
            ),
        }
    }
}
